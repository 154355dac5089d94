//! Plan explanation.
//!
//! Summarizes a compiled query without executing it: what each level
//! selects, which relations are joined or batch-loaded, and how many store
//! round trips the plan costs.

use std::fmt;

use serde::Serialize;

use super::compiler::CompiledQuery;
use super::plan::{BatchLoadDescriptor, CompiledPlan};

/// Summary of a compiled query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    /// Root listing name.
    pub root: String,
    /// Plan of the root rows.
    pub plan: LevelSummary,
    /// Whether the root is paginated.
    pub paginated: bool,
    /// Whether the root needs a count query.
    pub total_count: bool,
    /// Upper bound of store statements for one execution.
    pub estimated_round_trips: usize,
    /// Whether the plan depends on the request context.
    pub context_dependent: bool,
    /// Conflicts accepted under the unsafe merge policy.
    pub unsafe_merges: Vec<String>,
}

/// Summary of the plan for one set of rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSummary {
    /// Schema type.
    pub type_name: String,
    /// Backing entity.
    pub entity: String,
    /// Selected columns.
    pub projection: Vec<String>,
    /// Joined relation paths, dotted.
    pub joins: Vec<String>,
    /// Annotation names.
    pub annotations: Vec<String>,
    /// Secondary loads.
    pub batches: Vec<BatchSummary>,
    /// Subtype plans.
    pub deferred: Vec<LevelSummary>,
}

/// Summary of one batch load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Slot key.
    pub slot: String,
    /// Relation followed.
    pub relation: String,
    /// Attributes the rows attach under.
    pub attributes: Vec<String>,
    /// Whether a base filter applies.
    pub filtered: bool,
    /// Whether rows are paginated per parent.
    pub paginated: bool,
    /// Whether a grouped count query runs.
    pub total_count: bool,
    /// Plan of the loaded rows.
    pub plan: LevelSummary,
}

impl PlanSummary {
    /// Summarize a compiled query.
    pub fn from_query(query: &CompiledQuery) -> Self {
        let total_count = query.connection.is_some_and(|c| c.total_count);
        Self {
            root: query.root_field.clone(),
            plan: summarize_level(&query.plan),
            paginated: query.window.is_some(),
            total_count,
            estimated_round_trips: 1 + usize::from(total_count) + level_round_trips(&query.plan),
            context_dependent: query.plan.context_dependent,
            unsafe_merges: query.unsafe_merges.iter().map(ToString::to_string).collect(),
        }
    }

    /// JSON rendering of the summary.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Query Plan for {}", self.root)?;
        writeln!(f, "{}", "=".repeat(40))?;
        writeln!(f, "Round trips: {}", self.estimated_round_trips)?;
        if self.paginated {
            let count = if self.total_count { " (with total count)" } else { "" };
            writeln!(f, "Pagination: keyset{count}")?;
        }
        if self.context_dependent {
            writeln!(f, "Plan depends on the request context")?;
        }
        for merge in &self.unsafe_merges {
            writeln!(f, "Unsafe merge: {merge}")?;
        }
        writeln!(f)?;
        write_level(f, &self.plan, 0)
    }
}

fn write_level(f: &mut fmt::Formatter<'_>, level: &LevelSummary, depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    writeln!(f, "{indent}{} ({})", level.type_name, level.entity)?;
    writeln!(f, "{indent}  Fields: {}", level.projection.join(", "))?;
    if !level.joins.is_empty() {
        writeln!(f, "{indent}  Joins: {}", level.joins.join(", "))?;
    }
    if !level.annotations.is_empty() {
        writeln!(f, "{indent}  Annotations: {}", level.annotations.join(", "))?;
    }
    for batch in &level.batches {
        let mut flags = Vec::new();
        if batch.filtered {
            flags.push("filtered");
        }
        if batch.paginated {
            flags.push("paginated");
        }
        if batch.total_count {
            flags.push("counted");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        writeln!(
            f,
            "{indent}  Batch {} via {}{flags}:",
            batch.attributes.join(", "),
            batch.relation
        )?;
        write_level(f, &batch.plan, depth + 2)?;
    }
    for deferred in &level.deferred {
        writeln!(f, "{indent}  Subtype:")?;
        write_level(f, deferred, depth + 2)?;
    }
    Ok(())
}

fn summarize_level(plan: &CompiledPlan) -> LevelSummary {
    LevelSummary {
        type_name: plan.type_name.clone(),
        entity: plan.entity.clone(),
        projection: plan.projection.iter().cloned().collect(),
        joins: plan.join_paths().iter().map(|p| p.join(".")).collect(),
        annotations: plan.annotations.keys().cloned().collect(),
        batches: plan.batches.values().map(summarize_batch).collect(),
        deferred: plan.deferred.values().map(summarize_level).collect(),
    }
}

fn summarize_batch(batch: &BatchLoadDescriptor) -> BatchSummary {
    BatchSummary {
        slot: batch.slot(),
        relation: batch.relation.name.clone(),
        attributes: batch.attach_keys(),
        filtered: batch.filter.is_some(),
        paginated: batch.window.is_some(),
        total_count: batch.wants_total_count(),
        plan: summarize_level(&batch.plan),
    }
}

/// Statements issued below a level: one per deferred subtype and one per
/// batch (plus its count), recursively.
fn level_round_trips(plan: &CompiledPlan) -> usize {
    let batches: usize = plan
        .batches
        .values()
        .map(|b| 1 + usize::from(b.wants_total_count()) + level_round_trips(&b.plan))
        .sum();
    let deferred: usize = plan.deferred.values().map(|d| 1 + level_round_trips(d)).sum();
    batches + deferred
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerConfig;
    use crate::context::RequestContext;
    use crate::query::compiler::PlanCompiler;
    use crate::query::walker::SelectionWalker;
    use crate::testing;
    use eagerplan_proto::{Document, FieldSelection, Selection};
    use pretty_assertions::assert_eq;

    fn summarize(root: FieldSelection) -> PlanSummary {
        let registry = testing::registry();
        let config = PlannerConfig::default();
        let ctx = RequestContext::new();
        let node = SelectionWalker::new(&registry, &config, &ctx)
            .walk(&Document::new(root))
            .unwrap();
        let query = PlanCompiler::new(&registry, &config, &ctx).compile(&node).unwrap();
        PlanSummary::from_query(&query)
    }

    #[test]
    fn test_round_trip_estimate() {
        let summary = summarize(
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

        // root, root count, media batch, Book subtype
        assert_eq!(summary.estimated_round_trips, 4);
        assert!(summary.paginated);
        assert!(summary.total_count);
        assert_eq!(summary.plan.batches[0].slot, "media");
        assert_eq!(summary.plan.batches[0].plan.deferred[0].type_name, "Book");
    }

    #[test]
    fn test_text_and_json_rendering() {
        let summary = summarize(
            FieldSelection::new("posts")
                .fields(&["title"])
                .select(FieldSelection::new("author").fields(&["name"])),
        );

        let text = summary.to_string();
        assert!(text.starts_with("Query Plan for posts"));
        assert!(text.contains("Joins: author"));
        assert_eq!(summary.estimated_round_trips, 1);

        let json = summary.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["root"], "posts");
        assert_eq!(value["plan"]["joins"][0], "author");
    }
}
