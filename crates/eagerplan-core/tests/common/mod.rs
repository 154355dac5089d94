//! Shared fixture for the integration tests: projects with tasks, people
//! assigned to tasks, and polymorphic attachments.

#![allow(dead_code)]

use eagerplan_core::{
    BaseQuery, BatchLoadHint, EntityDef, Hint, MemoryStore, ObjectField, Optimizer, PlannerConfig,
    QueryOutput, Registry, RelationDef, RequestContext, Result, RootField, TypeDef,
};
use eagerplan_core::store::LoggedQuery;
use eagerplan_proto::{Document, Expr, FilterExpr, FieldSelection, OrderSpec, Row};

pub const PROJECTS: i64 = 5;
pub const TASKS_PER_PROJECT: i64 = 10;

pub struct TestContext {
    pub optimizer: Optimizer<MemoryStore>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(PlannerConfig::default())
    }

    pub fn with_config(config: PlannerConfig) -> Self {
        init_tracing();
        let registry = registry();
        let store = MemoryStore::new(&registry);
        seed_projects(&store);
        Self {
            optimizer: Optimizer::new(registry, store).with_config(config),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        self.optimizer.store()
    }

    pub fn execute(&self, root: FieldSelection) -> Result<QueryOutput> {
        self.optimizer.execute(&Document::new(root), &RequestContext::new())
    }

    /// Entities read by the logged statements, in order.
    pub fn logged_entities(&self) -> Vec<String> {
        self.store()
            .queries()
            .iter()
            .map(|q| q.entity().to_string())
            .collect()
    }

    /// Projections of the logged fetches of `entity`.
    pub fn projections_of(&self, entity: &str) -> Vec<Vec<String>> {
        self.store()
            .queries()
            .into_iter()
            .filter_map(|q| match q {
                LoggedQuery::Fetch(fetch) if fetch.entity == entity => Some(fetch.projection),
                _ => None,
            })
            .collect()
    }

    /// Insert attachments of the given kinds with ids from 1000 upwards.
    pub fn seed_attachments(&self, kinds: &[&str]) {
        for (i, kind) in kinds.iter().enumerate() {
            let id = 1000 + i as i64;
            let row = Row::new(*kind).with("id", id).with("name", format!("file-{id}"));
            let row = match *kind {
                "Image" => row.with("width", 640i64),
                "Document" => row.with("pages", 12i64),
                _ => row.with("url", format!("https://example.com/{id}")),
            };
            self.store().insert(kind, row).unwrap();
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn registry() -> Registry {
    Registry::builder()
        .entity(EntityDef::new("Project", "id").with_field("name"))
        .entity(
            EntityDef::new("Task", "id")
                .with_fields(&["project_id", "title", "priority", "done", "assignee_id"]),
        )
        .entity(EntityDef::new("Person", "id").with_field("name"))
        .entity(EntityDef::new("Attachment", "id").with_discriminator("kind").with_field("name"))
        .entity(EntityDef::new("Image", "id").with_field("width").subtype_of("Attachment", "image"))
        .entity(EntityDef::new("Document", "id").with_field("pages").subtype_of("Attachment", "document"))
        .entity(EntityDef::new("Link", "id").with_field("url").subtype_of("Attachment", "link"))
        .relation_pair(
            RelationDef::one_to_many("tasks", "Project", "id", "Task", "project_id"),
            "project",
        )
        .relation_pair(
            RelationDef::many_to_one("assignee", "Task", "assignee_id", "Person", "id"),
            "assigned",
        )
        .type_def(
            TypeDef::object("Project", "Project")
                .with_scalars(&["id", "name"])
                .with_field(ObjectField::relation("tasks", "tasks", "Task"))
                .with_field(ObjectField::connection("tasksConnection", "tasks", "Task"))
                .with_field(
                    ObjectField::relation("openTasks", "tasks", "Task")
                        .with_hint(BatchLoadHint::new("tasks").with_filter(FilterExpr::eq("done", false))),
                )
                .with_field(
                    ObjectField::relation("pendingTasks", "tasks", "Task").with_hint(
                        BatchLoadHint::new("tasks")
                            .with_filter(FilterExpr::eq("done", false))
                            .cache_as("pending_tasks"),
                    ),
                ),
        )
        .type_def(
            TypeDef::object("Task", "Task")
                .with_scalars(&["id", "title", "priority", "done"])
                .with_field(ObjectField::relation("assignee", "assignee", "Person"))
                .with_field(ObjectField::relation("project", "project", "Project"))
                .with_field(ObjectField::computed("urgency").with_hint(Hint::annotate("rank", Expr::column("priority"))))
                .with_field(ObjectField::computed("lateness").with_hint(Hint::annotate("rank", Expr::column("done")))),
        )
        .type_def(TypeDef::object("Person", "Person").with_scalars(&["id", "name"]))
        .type_def(TypeDef::interface("Attachment", "Attachment", &["Image", "Document", "Link"]).with_scalars(&["id", "name"]))
        .type_def(TypeDef::object("Image", "Image").implements("Attachment").with_scalars(&["id", "name", "width"]))
        .type_def(TypeDef::object("Document", "Document").implements("Attachment").with_scalars(&["id", "name", "pages"]))
        .type_def(TypeDef::object("Link", "Link").implements("Attachment").with_scalars(&["id", "name", "url"]))
        .root(RootField::list("projects", "Project"))
        .root(RootField::connection("projectsConnection", "Project"))
        .root(
            RootField::connection("projectsNewestFirst", "Project")
                .with_base(BaseQuery::new().with_order(OrderSpec::desc("id"))),
        )
        .root(RootField::list("attachments", "Attachment"))
        .build()
        .unwrap()
}

/// Projects 1..=5, each with ten tasks numbered `project * 100 + 1..=10`.
fn seed_projects(store: &MemoryStore) {
    store.insert("Person", Row::new("Person").with("id", 1i64).with("name", "Ann")).unwrap();
    store.insert("Person", Row::new("Person").with("id", 2i64).with("name", "Ben")).unwrap();

    for project in 1..=PROJECTS {
        store
            .insert(
                "Project",
                Row::new("Project").with("id", project).with("name", format!("P{project}")),
            )
            .unwrap();
        for n in 1..=TASKS_PER_PROJECT {
            let id = project * 100 + n;
            store
                .insert(
                    "Task",
                    Row::new("Task")
                        .with("id", id)
                        .with("project_id", project)
                        .with("title", format!("T{id}"))
                        .with("priority", n % 3)
                        .with("done", n % 2 == 0)
                        .with("assignee_id", 1 + n % 2),
                )
                .unwrap();
        }
    }
}
