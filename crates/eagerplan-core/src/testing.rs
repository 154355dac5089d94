//! Shared schema and data for unit tests.

use crate::catalog::{EntityDef, ObjectField, Registry, RelationDef, RootField, TypeDef};
use crate::hint::{BatchLoadHint, Hint};
use crate::store::MemoryStore;
use eagerplan_proto::{Expr, FilterExpr, OrderSpec, Row, Value};

pub(crate) fn registry() -> Registry {
    Registry::builder()
        .entity(EntityDef::new("User", "id").with_fields(&["name", "email", "age"]))
        .entity(EntityDef::new("Post", "id").with_fields(&["title", "author_id", "published", "views"]))
        .entity(EntityDef::new("Comment", "id").with_fields(&["post_id", "body", "author_id"]))
        .entity(
            EntityDef::new("Media", "id")
                .with_discriminator("kind")
                .with_fields(&["title", "owner_id"]),
        )
        .entity(EntityDef::new("Book", "id").with_field("isbn").subtype_of("Media", "book"))
        .entity(EntityDef::new("Movie", "id").with_field("runtime").subtype_of("Media", "movie"))
        .entity(EntityDef::new("Podcast", "id").with_field("host").subtype_of("Media", "podcast"))
        .entity(EntityDef::new("Chapter", "id").with_fields(&["book_id", "title"]))
        .relation_pair(
            RelationDef::one_to_many("posts", "User", "id", "Post", "author_id"),
            "author",
        )
        .relation_pair(
            RelationDef::one_to_many("comments", "Post", "id", "Comment", "post_id"),
            "post",
        )
        .relation_pair(
            RelationDef::many_to_one("author", "Comment", "author_id", "User", "id"),
            "comments",
        )
        .relation_pair(
            RelationDef::one_to_many("media", "User", "id", "Media", "owner_id"),
            "owner",
        )
        .relation_pair(
            RelationDef::one_to_many("chapters", "Book", "id", "Chapter", "book_id"),
            "book",
        )
        .type_def(
            TypeDef::object("User", "User")
                .with_scalars(&["id", "name", "email", "age"])
                .with_field(ObjectField::relation("posts", "posts", "Post"))
                .with_field(ObjectField::connection("postsConnection", "posts", "Post"))
                .with_field(ObjectField::relation("comments", "comments", "Comment"))
                .with_field(ObjectField::relation("media", "media", "Media"))
                .with_field(
                    ObjectField::relation("publishedPosts", "posts", "Post").with_hint(
                        BatchLoadHint::new("posts")
                            .with_filter(FilterExpr::eq("published", true))
                            .cache_as("published_posts"),
                    ),
                )
                .with_field(
                    ObjectField::relation("popularPosts", "posts", "Post")
                        .with_hint(BatchLoadHint::new("posts").with_order(OrderSpec::desc("views"))),
                )
                .with_field(
                    ObjectField::relation("viewerPosts", "posts", "Post").with_dynamic_hint(|ctx| {
                        let published = ctx
                            .attribute("published")
                            .cloned()
                            .unwrap_or(Value::Bool(true));
                        vec![BatchLoadHint::new("posts")
                            .with_filter(FilterExpr::eq("published", published))
                            .cache_as("viewer_posts")
                            .into()]
                    }),
                )
                .with_field(
                    ObjectField::computed("postCount").with_hint(Hint::annotate("post_count", Expr::count("posts"))),
                )
                .with_field(ObjectField::computed("displayName").with_hint(Hint::projection(&["name", "email"])))
                .with_field(ObjectField::relation("legacyPosts", "posts", "Post").without_optimization()),
        )
        .type_def(
            TypeDef::object("Post", "Post")
                .with_scalars(&["id", "title", "published", "views"])
                .with_field(ObjectField::relation("author", "author", "User"))
                .with_field(ObjectField::relation("comments", "comments", "Comment"))
                .with_field(
                    ObjectField::connection("commentsConnection", "comments", "Comment")
                        .with_default_order(OrderSpec::desc("id")),
                )
                .with_field(ObjectField::computed("authorName").with_hint(Hint::projection(&["author.name"])))
                .with_field(ObjectField::computed("score").with_hint(Hint::annotate("score", Expr::column("views"))))
                .with_field(
                    ObjectField::computed("popularity").with_hint(Hint::annotate("score", Expr::count("comments"))),
                )
                .with_field(ObjectField::relation("writer", "author", "User").with_hint(Hint::batch("author"))),
        )
        .type_def(
            TypeDef::object("Comment", "Comment")
                .with_scalars(&["id", "body"])
                .with_field(ObjectField::relation("author", "author", "User"))
                .with_field(ObjectField::relation("post", "post", "Post")),
        )
        .type_def(
            TypeDef::interface("Media", "Media", &["Book", "Movie", "Podcast"])
                .with_scalars(&["id", "title"])
                .with_field(ObjectField::relation("owner", "owner", "User")),
        )
        .type_def(
            TypeDef::object("Book", "Book")
                .implements("Media")
                .with_scalars(&["id", "title", "isbn"])
                .with_field(ObjectField::relation("owner", "owner", "User"))
                .with_field(ObjectField::relation("chapters", "chapters", "Chapter")),
        )
        .type_def(
            TypeDef::object("Movie", "Movie")
                .implements("Media")
                .with_scalars(&["id", "title", "runtime"])
                .with_field(ObjectField::relation("owner", "owner", "User")),
        )
        .type_def(
            TypeDef::object("Podcast", "Podcast")
                .implements("Media")
                .with_scalars(&["id", "title", "host"])
                .with_field(ObjectField::relation("owner", "owner", "User")),
        )
        .type_def(TypeDef::object("Chapter", "Chapter").with_scalars(&["id", "title"]))
        .root(RootField::list("users", "User"))
        .root(RootField::connection("usersConnection", "User"))
        .root(RootField::list("posts", "Post"))
        .root(RootField::connection("postsConnection", "Post"))
        .root(RootField::list("media", "Media"))
        .root(RootField::connection("mediaConnection", "Media"))
        .build()
        .expect("fixture registry is valid")
}

pub(crate) fn store(registry: &Registry) -> MemoryStore {
    let store = MemoryStore::new(registry);
    let rows = [
        ("User", Row::new("User").with("id", 1i64).with("name", "Alice").with("email", "alice@example.com").with("age", 30i64)),
        ("User", Row::new("User").with("id", 2i64).with("name", "Bob").with("email", "bob@example.com").with("age", 25i64)),
        ("User", Row::new("User").with("id", 3i64).with("name", "Carol").with("email", "carol@example.com").with("age", Value::Null)),
        ("Post", post(10, "Intro", Some(1), true, 100)),
        ("Post", post(11, "Draft", Some(1), false, 5)),
        ("Post", post(12, "Rust", Some(1), true, 250)),
        ("Post", post(13, "Hello", Some(2), true, 40)),
        ("Post", post(14, "Orphan", None, true, 1)),
        ("Comment", comment(100, 10, "nice", 2)),
        ("Comment", comment(101, 10, "thanks", 1)),
        ("Comment", comment(102, 12, "great", 3)),
        ("Comment", comment(103, 13, "hi", 1)),
        ("Book", Row::new("Book").with("id", 1000i64).with("title", "Dune").with("owner_id", 1i64).with("isbn", "978-0441")),
        ("Movie", Row::new("Movie").with("id", 1001i64).with("title", "Alien").with("owner_id", 1i64).with("runtime", 117i64)),
        ("Podcast", Row::new("Podcast").with("id", 1002i64).with("title", "Talk").with("owner_id", 2i64).with("host", "Sam")),
        ("Book", Row::new("Book").with("id", 1003i64).with("title", "Emma").with("owner_id", 3i64).with("isbn", "978-0141")),
        ("Chapter", Row::new("Chapter").with("id", 5000i64).with("book_id", 1000i64).with("title", "Sand")),
        ("Chapter", Row::new("Chapter").with("id", 5001i64).with("book_id", 1000i64).with("title", "Spice")),
        ("Chapter", Row::new("Chapter").with("id", 5002i64).with("book_id", 1003i64).with("title", "Highbury")),
    ];
    for (entity, row) in rows {
        store.insert(entity, row).expect("fixture row is valid");
    }
    store
}

fn post(id: i64, title: &str, author: Option<i64>, published: bool, views: i64) -> Row {
    Row::new("Post")
        .with("id", id)
        .with("title", title)
        .with("author_id", author)
        .with("published", published)
        .with("views", views)
}

fn comment(id: i64, post: i64, body: &str, author: i64) -> Row {
    Row::new("Comment")
        .with("id", id)
        .with("post_id", post)
        .with("body", body)
        .with("author_id", author)
}
