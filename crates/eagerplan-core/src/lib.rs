//! eagerplan core - eager-load planning and execution for selection trees.
//!
//! A selection document is walked into a normalized field tree, the hints
//! each schema field declares are merged into one compiled plan per root,
//! and the plan is executed against a [`RelationalStore`] with a number of
//! round trips that depends only on the shape of the selection.
//!
//! # Modules
//!
//! - [`catalog`] - Entities, relations and selectable types
//! - [`hint`] - Eager-load hints declared by schema fields
//! - [`merge`] - Structural merge of hint trees and plans
//! - [`query`] - Walker, compiler, cursor pagination, executor and explain
//! - [`store`] - The relational store trait and an in-memory store
//! - [`optimizer`] - Walk, compile and execute in one call

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod hint;
pub mod merge;
pub mod optimizer;
pub mod query;
pub mod store;

#[cfg(test)]
mod testing;

pub use catalog::{
    Cardinality, EntityDef, FieldKind, ObjectField, Registry, RegistryBuilder, RelationDef,
    RootField, TypeDef, TypeKind,
};
pub use config::{MergePolicy, PlannerConfig};
pub use context::RequestContext;
pub use error::{Error, Result};
pub use hint::{AnnotationHint, BaseQuery, BatchLoadHint, FieldHints, Hint, HintSource};
pub use merge::{merge, MergeConflict, Mergeable, Merged};
pub use optimizer::Optimizer;
pub use query::{
    BatchLoadDescriptor, CompiledPlan, CompiledQuery, FieldNode, JoinPlan, PageWindow,
    PlanSummary, QueryOutput,
};
pub use store::{CountQuery, FetchQuery, JoinSpec, MemoryStore, RelationalStore, StoreError, WindowSpec};

/// Re-export protocol types.
pub use eagerplan_proto as proto;
