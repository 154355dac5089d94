//! Plan executor.
//!
//! Runs a [`CompiledQuery`] against a [`RelationalStore`]:
//!
//! 1. the root rows are read with their joins and annotations in one query,
//! 2. rows of a polymorphic type are resolved to their concrete subtype and
//!    each subtype with a deferred plan gets one extra query,
//! 3. every batch load issues one query for all parents of its level,
//!    keyed by the parents' relation keys, and attaches the results,
//! 4. the same steps repeat for the loaded rows.
//!
//! The number of queries depends on the shape of the plan, never on the
//! number of rows.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, instrument};

use super::compiler::CompiledQuery;
use super::pagination::Slice;
use super::plan::{BatchLoadDescriptor, CompiledPlan, JoinPlan};
use crate::catalog::Registry;
use crate::error::Result;
use crate::store::{CountQuery, FetchQuery, JoinSpec, RelationalStore, WindowSpec};
use eagerplan_proto::{FilterExpr, Page, Related, Row, Value};

/// Result of executing a root request.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Rows of a list root.
    Rows(Vec<Row>),
    /// A page of a connection root.
    Page(Page),
}

impl QueryOutput {
    /// The root rows in order.
    pub fn rows(&self) -> Vec<&Row> {
        match self {
            QueryOutput::Rows(rows) => rows.iter().collect(),
            QueryOutput::Page(page) => page.nodes(),
        }
    }

    /// The page of a connection root.
    pub fn page(&self) -> Option<&Page> {
        match self {
            QueryOutput::Page(page) => Some(page),
            QueryOutput::Rows(_) => None,
        }
    }
}

/// Executes compiled plans.
pub struct PlanExecutor<'a, S: RelationalStore + ?Sized> {
    store: &'a S,
    registry: &'a Registry,
}

impl<'a, S: RelationalStore + ?Sized> PlanExecutor<'a, S> {
    /// Create an executor over a store.
    pub fn new(store: &'a S, registry: &'a Registry) -> Self {
        Self { store, registry }
    }

    /// Execute a compiled query.
    #[instrument(skip_all, fields(root = %query.root_field))]
    pub fn execute(&self, query: &CompiledQuery) -> Result<QueryOutput> {
        let plan = &query.plan;
        let mut fetch = fetch_query(plan);
        if let Some(filter) = &query.filter {
            fetch = fetch.with_filter(filter.clone());
        }

        let Some(window) = &query.window else {
            let mut rows = self.store.fetch(&fetch.with_order(query.order.clone()))?;
            debug!(entity = %plan.entity, rows = rows.len(), "root fetch");
            self.load_level(plan, rows.iter_mut().collect())?;
            return Ok(QueryOutput::Rows(rows));
        };

        fetch = fetch.with_order(window.query_order());
        if let Some(seek) = window.seek_filter() {
            fetch = fetch.with_filter(seek);
        }
        if let Some(limit) = window.fetch_limit() {
            fetch = fetch.with_limit(limit);
        }

        let rows = self.store.fetch(&fetch)?;
        debug!(entity = %plan.entity, rows = rows.len(), "root fetch");
        let mut slice = window.slice(rows);
        self.load_level(plan, slice.rows.iter_mut().collect())?;

        let Some(connection) = query.connection else {
            return Ok(QueryOutput::Rows(slice.rows));
        };
        let total_count = if connection.total_count {
            let mut count = CountQuery::new(plan.entity.clone());
            if let Some(filter) = &query.filter {
                count = count.with_filter(filter.clone());
            }
            Some(self.store.count(&count)?)
        } else {
            None
        };
        Ok(QueryOutput::Page(slice.into_page(&window.order, total_count)?))
    }

    /// Load everything the plan needs beyond the rows' own columns.
    fn load_level(&self, plan: &CompiledPlan, mut rows: Vec<&mut Row>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if !plan.deferred.is_empty() {
            self.load_deferred(plan, &mut rows)?;
        }
        for batch in plan.batches.values() {
            let parents = descend(rows.iter_mut().map(|r| &mut **r).collect(), &batch.join_path);
            self.load_batch(batch, parents)?;
        }
        Ok(())
    }

    fn load_deferred(&self, plan: &CompiledPlan, rows: &mut [&mut Row]) -> Result<()> {
        let identity = self.registry.entity(&plan.entity)?.identity_field.clone();

        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, row) in rows.iter_mut().enumerate() {
            let Some(concrete) = self.registry.concrete_type_for(&plan.type_name, row) else {
                continue;
            };
            row.entity = concrete.entity.clone();
            if plan.deferred.contains_key(&concrete.name) {
                groups.entry(concrete.name.clone()).or_default().push(index);
            }
        }

        for (type_name, indexes) in groups {
            let Some(deferred) = plan.deferred.get(&type_name) else {
                continue;
            };
            let ids: Vec<Value> = indexes
                .iter()
                .map(|&i| rows[i].get_or_null(&identity).clone())
                .filter(|id| !id.is_null())
                .collect();
            if ids.is_empty() {
                continue;
            }

            let query = fetch_query(deferred).with_filter(FilterExpr::in_values(identity.clone(), ids));
            let fetched = self.store.fetch(&query)?;
            debug!(type_name = %type_name, rows = fetched.len(), "deferred fetch");

            let mut by_id: HashMap<Value, Row> = fetched
                .into_iter()
                .filter_map(|row| row.get(&identity).cloned().map(|id| (id, row)))
                .collect();
            for &i in &indexes {
                if let Some(extra) = by_id.remove(rows[i].get_or_null(&identity)) {
                    rows[i].absorb(extra);
                }
            }

            let members: HashSet<usize> = indexes.into_iter().collect();
            let targets: Vec<&mut Row> = rows
                .iter_mut()
                .enumerate()
                .filter(|(i, _)| members.contains(i))
                .map(|(_, row)| &mut **row)
                .collect();
            self.load_level(deferred, targets)?;
        }
        Ok(())
    }

    fn load_batch(&self, batch: &BatchLoadDescriptor, mut parents: Vec<&mut Row>) -> Result<()> {
        if parents.is_empty() {
            return Ok(());
        }
        let relation = &batch.relation;

        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        for parent in &parents {
            let key = parent.get_or_null(&relation.from_field);
            if !key.is_null() && seen.insert(key.clone()) {
                keys.push(key.clone());
            }
        }

        let mut grouped: HashMap<Value, Vec<Row>> = HashMap::new();
        let mut counts: HashMap<Value, u64> = HashMap::new();
        if !keys.is_empty() {
            let mut query = fetch_query(&batch.plan)
                .with_filter(FilterExpr::in_values(relation.to_field.clone(), keys.clone()));
            if let Some(filter) = &batch.filter {
                query = query.with_filter(filter.clone());
            }
            query = match &batch.window {
                Some(window) => {
                    if let Some(seek) = window.seek_filter() {
                        query = query.with_filter(seek);
                    }
                    query.with_window(WindowSpec {
                        partition_by: relation.to_field.clone(),
                        order_by: window.query_order(),
                        max_rank: window.fetch_limit(),
                    })
                }
                None => query.with_order(batch.order.clone()),
            };

            let rows = self.store.fetch(&query)?;
            debug!(
                relation = %relation.name,
                slot = %batch.attribute,
                parents = parents.len(),
                keys = keys.len(),
                rows = rows.len(),
                "batch load"
            );
            for row in rows {
                let key = row.get_or_null(&relation.to_field).clone();
                grouped.entry(key).or_default().push(row);
            }

            if batch.wants_total_count() {
                let mut count = CountQuery::new(relation.to_entity.clone())
                    .with_filter(FilterExpr::in_values(relation.to_field.clone(), keys));
                if let Some(filter) = &batch.filter {
                    count = count.with_filter(filter.clone());
                }
                counts = self.store.count_by(&count, &relation.to_field)?;
            }
        }

        let mut slices: HashMap<Value, Slice> = grouped
            .into_iter()
            .map(|(key, rows)| (key, self.slice(batch, rows)))
            .collect();
        let loaded: Vec<&mut Row> = slices.values_mut().flat_map(|s| s.rows.iter_mut()).collect();
        self.load_level(&batch.plan, loaded)?;

        let mut attached: HashMap<Value, Related> = HashMap::new();
        for parent in parents.iter_mut() {
            let key = parent.get_or_null(&relation.from_field).clone();
            let related = match attached.get(&key) {
                Some(related) => related.clone(),
                None => {
                    let slice = match slices.get(&key) {
                        Some(slice) if !key.is_null() => slice.clone(),
                        _ => self.slice(batch, Vec::new()),
                    };
                    let total = batch
                        .wants_total_count()
                        .then(|| counts.get(&key).copied().unwrap_or(0));
                    let related = self.related(batch, slice, total)?;
                    attached.insert(key, related.clone());
                    related
                }
            };
            for key in batch.attach_keys() {
                parent.attach(key, related.clone());
            }
        }
        Ok(())
    }

    fn slice(&self, batch: &BatchLoadDescriptor, rows: Vec<Row>) -> Slice {
        match &batch.window {
            Some(window) => window.slice(rows),
            None => Slice {
                rows,
                has_next_page: false,
                has_previous_page: false,
            },
        }
    }

    fn related(&self, batch: &BatchLoadDescriptor, slice: Slice, total: Option<u64>) -> Result<Related> {
        if !batch.relation.is_to_many() {
            return Ok(Related::One(slice.rows.into_iter().next().map(Box::new)));
        }
        match (&batch.window, batch.connection) {
            (Some(window), Some(_)) => Ok(Related::Page(slice.into_page(&window.order, total)?)),
            _ => Ok(Related::Many(slice.rows)),
        }
    }
}

/// Follow to-one joins from `rows`; rows without a joined target drop out.
fn descend<'r>(rows: Vec<&'r mut Row>, path: &[String]) -> Vec<&'r mut Row> {
    let mut current = rows;
    for segment in path {
        current = current
            .into_iter()
            .filter_map(|row| match row.relations.get_mut(segment) {
                Some(Related::One(Some(target))) => Some(&mut **target),
                _ => None,
            })
            .collect();
    }
    current
}

fn fetch_query(plan: &CompiledPlan) -> FetchQuery {
    let mut query = FetchQuery::new(plan.entity.clone()).with_projection(plan.projection.iter().cloned());
    for join in plan.joins.values() {
        query = query.with_join(join_spec(join));
    }
    for (name, expr) in &plan.annotations {
        query = query.with_annotation(name.clone(), expr.clone());
    }
    query
}

fn join_spec(join: &JoinPlan) -> JoinSpec {
    JoinSpec {
        relation: join.relation.clone(),
        entity: join.entity.clone(),
        source_field: join.source_field.clone(),
        target_field: join.target_field.clone(),
        projection: join.projection.iter().cloned().collect(),
        annotations: join.annotations.clone(),
        joins: join.joins.values().map(join_spec).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerConfig;
    use crate::context::RequestContext;
    use crate::error::Error;
    use crate::query::compiler::PlanCompiler;
    use crate::query::walker::SelectionWalker;
    use crate::store::{LoggedQuery, MemoryStore};
    use crate::testing;
    use eagerplan_proto::{Document, FieldSelection, Selection};
    use pretty_assertions::assert_eq;

    fn run_on(store: &MemoryStore, registry: &Registry, root: FieldSelection) -> Result<QueryOutput> {
        let config = PlannerConfig::default();
        let ctx = RequestContext::new();
        let node = SelectionWalker::new(registry, &config, &ctx).walk(&Document::new(root))?;
        let query = PlanCompiler::new(registry, &config, &ctx).compile(&node)?;
        PlanExecutor::new(store, registry).execute(&query)
    }

    fn ids(rows: &[&Row]) -> Vec<i64> {
        rows.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)).collect()
    }

    #[test]
    fn test_nested_batches_issue_one_query_per_level() {
        let registry = testing::registry();
        let store = testing::store(&registry);

        let output = run_on(
            &store,
            &registry,
            FieldSelection::new("users").fields(&["name"]).select(
                FieldSelection::new("posts")
                    .fields(&["title"])
                    .select(FieldSelection::new("comments").fields(&["body"])),
            ),
        )
        .unwrap();

        assert_eq!(store.query_count(), 3);
        let users = output.rows();
        assert_eq!(ids(&users), vec![1, 2, 3]);

        let alice_posts = users[0].related_rows("posts");
        assert_eq!(ids(&alice_posts), vec![10, 11, 12]);
        assert_eq!(ids(&alice_posts[0].related_rows("comments")), vec![100, 101]);
        assert!(alice_posts[1].related_rows("comments").is_empty());
        assert_eq!(users[2].related("posts"), Some(&Related::Many(Vec::new())));
    }

    #[test]
    fn test_joins_load_in_the_root_query() {
        let registry = testing::registry();
        let store = testing::store(&registry);

        let output = run_on(
            &store,
            &registry,
            FieldSelection::new("posts")
                .fields(&["title"])
                .select(FieldSelection::new("author").fields(&["name"])),
        )
        .unwrap();

        assert_eq!(store.query_count(), 1);
        let posts = output.rows();
        assert_eq!(
            posts[0].one("author").and_then(|a| a.get("name")),
            Some(&Value::from("Alice"))
        );
        let orphan = posts.iter().find(|p| p.get("id") == Some(&Value::from(14i64))).unwrap();
        assert_eq!(orphan.related("author"), Some(&Related::One(None)));
    }

    #[test]
    fn test_polymorphic_rows_load_subtype_columns() {
        let registry = testing::registry();
        let store = testing::store(&registry);

        let output = run_on(
            &store,
            &registry,
            FieldSelection::new("media")
                .fields(&["title"])
                .select(Selection::on("Book", vec![FieldSelection::new("isbn").into()]))
                .select(Selection::on("Podcast", vec![FieldSelection::new("host").into()])),
        )
        .unwrap();

        let queries = store.queries();
        let entities: Vec<&str> = queries.iter().map(LoggedQuery::entity).collect();
        assert_eq!(entities, vec!["Media", "Book", "Podcast"]);

        let rows = output.rows();
        let kinds: Vec<&str> = rows.iter().map(|r| r.entity.as_str()).collect();
        assert_eq!(kinds, vec!["Book", "Movie", "Podcast", "Book"]);
        assert_eq!(rows[0].get("isbn"), Some(&Value::from("978-0441")));
        assert_eq!(rows[1].get("runtime"), None);
        assert_eq!(rows[2].get("host"), Some(&Value::from("Sam")));
    }

    #[test]
    fn test_subtype_batches_load_once_for_that_subtype() {
        let registry = testing::registry();
        let store = testing::store(&registry);

        let output = run_on(
            &store,
            &registry,
            FieldSelection::new("media").fields(&["title"]).select(Selection::on(
                "Book",
                vec![FieldSelection::new("chapters").fields(&["title"]).into()],
            )),
        )
        .unwrap();

        let queries = store.queries();
        let entities: Vec<&str> = queries.iter().map(LoggedQuery::entity).collect();
        assert_eq!(entities, vec!["Media", "Book", "Chapter"]);

        let rows = output.rows();
        assert_eq!(ids(&rows[0].related_rows("chapters")), vec![5000, 5001]);
        assert_eq!(ids(&rows[3].related_rows("chapters")), vec![5002]);
        assert_eq!(rows[1].related("chapters"), None);
        assert_eq!(rows[2].related("chapters"), None);
    }

    #[test]
    fn test_connection_pages_per_parent() {
        let registry = testing::registry();
        let store = testing::store(&registry);

        let output = run_on(
            &store,
            &registry,
            FieldSelection::new("users").select(
                FieldSelection::new("postsConnection")
                    .arg("first", 2i64)
                    .select(
                        FieldSelection::new("edges")
                            .select(FieldSelection::new("cursor"))
                            .select(FieldSelection::new("node").fields(&["title"])),
                    )
                    .select(FieldSelection::new("pageInfo").fields(&["hasNextPage"]))
                    .select(FieldSelection::new("totalCount")),
            ),
        )
        .unwrap();

        assert_eq!(store.query_count(), 3);
        let users = output.rows();

        let alice = users[0].page("postsConnection").unwrap();
        assert_eq!(ids(&alice.nodes()), vec![10, 11]);
        assert!(alice.page_info.has_next_page);
        assert_eq!(alice.total_count, Some(3));

        let bob = users[1].page("postsConnection").unwrap();
        assert_eq!(ids(&bob.nodes()), vec![13]);
        assert!(!bob.page_info.has_next_page);
        assert_eq!(bob.total_count, Some(1));

        let carol = users[2].page("postsConnection").unwrap();
        assert!(carol.edges.is_empty());
        assert_eq!(carol.total_count, Some(0));
        assert_eq!(carol.page_info.end_cursor, None);
    }

    #[test]
    fn test_root_connection_resumes_from_cursor() {
        let registry = testing::registry();
        let store = testing::store(&registry);
        let page = |after: Option<String>| {
            let mut root = FieldSelection::new("usersConnection")
                .arg("first", 2i64)
                .select(FieldSelection::new("nodes").fields(&["name"]))
                .select(FieldSelection::new("pageInfo").fields(&["endCursor"]));
            if let Some(cursor) = after {
                root = root.arg("after", cursor);
            }
            run_on(&store, &registry, root).unwrap()
        };

        let first = page(None);
        let first = first.page().unwrap();
        assert_eq!(ids(&first.nodes()), vec![1, 2]);
        assert!(first.page_info.has_next_page);
        assert!(!first.page_info.has_previous_page);

        let second = page(first.page_info.end_cursor.clone());
        let second = second.page().unwrap();
        assert_eq!(ids(&second.nodes()), vec![3]);
        assert!(!second.page_info.has_next_page);
        assert!(second.page_info.has_previous_page);
    }

    #[test]
    fn test_store_failure_aborts_request() {
        let registry = testing::registry();
        let store = testing::store(&registry);
        store.fail_on("Comment");

        let result = run_on(
            &store,
            &registry,
            FieldSelection::new("posts").select(FieldSelection::new("comments").fields(&["body"])),
        );

        assert!(matches!(result, Err(Error::Execution(_))));
    }
}
