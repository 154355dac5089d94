//! The relational store collaborator.
//!
//! The executor talks to storage only through [`RelationalStore`]. A query
//! object describes one round trip: a projected, filtered and ordered read
//! of one entity, optionally expanding to-one joins inline, injecting named
//! annotations, and row-numbering the result per partition.

mod filter;
mod memory;

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use eagerplan_proto::{Expr, FilterExpr, OrderSpec, Row, Value};

pub use filter::FilterEvaluator;
pub use memory::{compare_rows, LoggedQuery, MemoryStore};

/// Errors raised by a relational store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The entity has no table.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// An annotation or join references a relation the store does not know.
    #[error("unknown relation '{relation}' on entity '{entity}'")]
    UnknownRelation { entity: String, relation: String },

    /// The backend failed.
    #[error("backend error: {0}")]
    Backend(String),
}

/// A to-one relation expanded inline.
///
/// Each result row carries the matching target row (or nothing) under
/// `relation` as [`eagerplan_proto::Related::One`].
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    /// Attribute the joined row is stored under.
    pub relation: String,
    /// Target entity.
    pub entity: String,
    /// Column on the source row.
    pub source_field: String,
    /// Column on the target row.
    pub target_field: String,
    /// Target columns to read (empty reads all).
    pub projection: Vec<String>,
    /// Annotations computed on the target row.
    pub annotations: BTreeMap<String, Expr>,
    /// Joins continuing from the target row.
    pub joins: Vec<JoinSpec>,
}

/// Row numbering per partition.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    /// Column the rows are partitioned by.
    pub partition_by: String,
    /// Order rows are numbered in within a partition.
    pub order_by: Vec<OrderSpec>,
    /// Keep rows numbered `1..=max_rank` in each partition.
    pub max_rank: Option<usize>,
}

/// One read of an entity.
///
/// Rows come back in `order_by` order. With a window, rows are grouped by
/// partition (partitions in ascending key order) and ordered by the
/// window's order inside each partition; `order_by` and `limit` are then
/// ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    /// Entity to read.
    pub entity: String,
    /// Columns to read (empty reads all).
    pub projection: Vec<String>,
    /// Row filter.
    pub filter: Option<FilterExpr>,
    /// Inline to-one joins.
    pub joins: Vec<JoinSpec>,
    /// Named computed values.
    pub annotations: BTreeMap<String, Expr>,
    /// Result ordering.
    pub order_by: Vec<OrderSpec>,
    /// Maximum number of rows.
    pub limit: Option<usize>,
    /// Per-partition row numbering.
    pub window: Option<WindowSpec>,
}

impl FetchQuery {
    /// Read every column of every row of an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            projection: Vec::new(),
            filter: None,
            joins: Vec::new(),
            annotations: BTreeMap::new(),
            order_by: Vec::new(),
            limit: None,
            window: None,
        }
    }

    /// Restrict the columns read.
    pub fn with_projection(mut self, columns: impl IntoIterator<Item = String>) -> Self {
        self.projection = columns.into_iter().collect();
        self
    }

    /// Add a filter, conjoined with any filter already present.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => FilterExpr::and_all([existing, filter]),
            None => filter,
        });
        self
    }

    /// Add an inline join.
    pub fn with_join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }

    /// Add an annotation.
    pub fn with_annotation(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.annotations.insert(name.into(), expr);
        self
    }

    /// Set the ordering.
    pub fn with_order(mut self, order_by: Vec<OrderSpec>) -> Self {
        self.order_by = order_by;
        self
    }

    /// Set the row limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Number rows per partition.
    pub fn with_window(mut self, window: WindowSpec) -> Self {
        self.window = Some(window);
        self
    }
}

/// A row count of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CountQuery {
    /// Entity to count.
    pub entity: String,
    /// Row filter.
    pub filter: Option<FilterExpr>,
}

impl CountQuery {
    /// Count every row of an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filter: None,
        }
    }

    /// Count only rows matching `filter`.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// A relational backend able to answer plan queries.
///
/// Each call is one round trip.
pub trait RelationalStore {
    /// Read rows.
    fn fetch(&self, query: &FetchQuery) -> Result<Vec<Row>, StoreError>;

    /// Count matching rows.
    fn count(&self, query: &CountQuery) -> Result<u64, StoreError>;

    /// Count matching rows per distinct value of `group_by`.
    fn count_by(&self, query: &CountQuery, group_by: &str)
        -> Result<HashMap<Value, u64>, StoreError>;
}
