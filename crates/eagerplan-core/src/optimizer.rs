//! Request entry point.
//!
//! [`Optimizer`] owns a schema registry and a store and runs the full
//! pipeline for one selection document: walk, compile, execute.

use tracing::instrument;

use crate::catalog::Registry;
use crate::config::PlannerConfig;
use crate::context::RequestContext;
use crate::error::Result;
use crate::query::{CompiledQuery, PlanCompiler, PlanExecutor, PlanSummary, QueryOutput, SelectionWalker};
use crate::store::RelationalStore;
use eagerplan_proto::Document;

/// Plans and runs selection documents against one store.
pub struct Optimizer<S: RelationalStore> {
    registry: Registry,
    store: S,
    config: PlannerConfig,
}

impl<S: RelationalStore> Optimizer<S> {
    /// Create an optimizer with the default configuration.
    pub fn new(registry: Registry, store: S) -> Self {
        Self {
            registry,
            store,
            config: PlannerConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Compile a document without running it.
    ///
    /// Every validation and merge error surfaces here, before the store is
    /// touched.
    pub fn compile(&self, document: &Document, ctx: &RequestContext) -> Result<CompiledQuery> {
        let node = SelectionWalker::new(&self.registry, &self.config, ctx).walk(document)?;
        PlanCompiler::new(&self.registry, &self.config, ctx).compile(&node)
    }

    /// Describe the plan of a document.
    pub fn explain(&self, document: &Document, ctx: &RequestContext) -> Result<PlanSummary> {
        let query = self.compile(document, ctx)?;
        Ok(PlanSummary::from_query(&query))
    }

    /// Compile and run a document.
    #[instrument(skip_all, fields(root = %document.root.name))]
    pub fn execute(&self, document: &Document, ctx: &RequestContext) -> Result<QueryOutput> {
        let query = self.compile(document, ctx)?;
        self.run(&query)
    }

    /// Run an already compiled query.
    pub fn run(&self, query: &CompiledQuery) -> Result<QueryOutput> {
        PlanExecutor::new(&self.store, &self.registry).execute(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergePolicy;
    use crate::error::Error;
    use crate::store::MemoryStore;
    use crate::testing;
    use eagerplan_proto::{FieldSelection, Selection, Value};
    use pretty_assertions::assert_eq;

    fn optimizer() -> Optimizer<MemoryStore> {
        let registry = testing::registry();
        let store = testing::store(&registry);
        Optimizer::new(registry, store)
    }

    #[test]
    fn test_execute_runs_the_whole_pipeline() {
        let optimizer = optimizer();
        let document = Document::new(
            FieldSelection::new("users")
                .fields(&["name"])
                .select(FieldSelection::new("posts").fields(&["title"])),
        );

        let output = optimizer.execute(&document, &RequestContext::new()).unwrap();

        assert_eq!(optimizer.store().query_count(), 2);
        let users = output.rows();
        assert_eq!(users.len(), 3);
        assert_eq!(users[1].get("name"), Some(&Value::from("Bob")));
        assert_eq!(users[1].related_rows("posts").len(), 1);
    }

    #[test]
    fn test_compile_errors_issue_no_queries() {
        let optimizer = optimizer();
        let document = Document::new(FieldSelection::new("posts").fields(&["score", "popularity"]));

        let result = optimizer.execute(&document, &RequestContext::new());

        assert!(matches!(result, Err(Error::UnsafeMerge { .. })));
        assert_eq!(optimizer.store().query_count(), 0);
    }

    #[test]
    fn test_unsafe_policy_records_override() {
        let optimizer = optimizer().with_config(PlannerConfig::default().with_merge_policy(MergePolicy::Unsafe));
        let document = Document::new(FieldSelection::new("posts").fields(&["score", "popularity"]));

        let query = optimizer.compile(&document, &RequestContext::new()).unwrap();

        assert_eq!(query.unsafe_merges.len(), 1);
        assert_eq!(optimizer.config().merge_policy, MergePolicy::Unsafe);
    }

    #[test]
    fn test_explain_estimate_matches_issued_queries() {
        let optimizer = optimizer();
        let document = Document::new(
            FieldSelection::new("usersConnection")
                .arg("first", 2i64)
                .select(FieldSelection::new("totalCount"))
                .select(
                    FieldSelection::new("nodes").select(
                        FieldSelection::new("media")
                            .fields(&["title"])
                            .select(Selection::on("Book", vec![FieldSelection::new("isbn").into()])),
                    ),
                ),
        );
        let ctx = RequestContext::new();

        let summary = optimizer.explain(&document, &ctx).unwrap();
        assert_eq!(optimizer.store().query_count(), 0);

        optimizer.execute(&document, &ctx).unwrap();
        assert_eq!(optimizer.store().query_count(), summary.estimated_round_trips);
    }
}
