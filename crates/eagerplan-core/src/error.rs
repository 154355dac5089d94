//! Core error types.

use thiserror::Error;

use crate::merge::MergeConflict;
use crate::store::StoreError;
use eagerplan_proto::CursorError;

/// Errors raised while walking, compiling or executing a plan.
///
/// Everything except [`Error::Execution`] is raised before the first query
/// is issued.
#[derive(Debug, Error)]
pub enum Error {
    /// Two hints for the same path or annotation cannot be combined.
    #[error("unsafe merge at '{path}': {reason}")]
    UnsafeMerge { path: String, reason: String },

    /// A cursor token does not decode to the expected tuple.
    #[error("invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),

    /// `first` or `last` is above the configured maximum.
    #[error("requested page size {requested} exceeds maximum {max}")]
    PageSizeExceeded { requested: usize, max: usize },

    /// Cursor pagination over an order that is not deterministic.
    #[error("ambiguous ordering: {0}")]
    AmbiguousOrdering(String),

    /// A type name is not in the registry.
    #[error("unknown type '{0}'")]
    UnknownType(String),

    /// A field is not declared on a type.
    #[error("unknown field '{field}' on type '{type_name}'")]
    UnknownField { type_name: String, field: String },

    /// A relation is not declared on an entity.
    #[error("unknown relation '{relation}' on entity '{entity}'")]
    UnknownRelation { entity: String, relation: String },

    /// A fragment's type condition can never match the selected type.
    #[error("type condition '{condition}' cannot apply to '{type_name}'")]
    IncompatibleTypeCondition { condition: String, type_name: String },

    /// A fragment spread names a fragment that was not supplied.
    #[error("unknown fragment '{0}'")]
    UnknownFragment(String),

    /// A `$variable` is referenced but not supplied.
    #[error("missing variable '${0}'")]
    MissingVariable(String),

    /// The selection is malformed.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    /// A declared hint cannot be applied to its field.
    #[error("invalid hint: {0}")]
    InvalidHint(String),

    /// The registry definitions are inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// The selection nests deeper than allowed.
    #[error("selection depth exceeds maximum {max}")]
    DepthExceeded { max: usize },

    /// The relational store failed while the plan was running.
    #[error("execution failed: {0}")]
    Execution(#[from] StoreError),
}

impl From<MergeConflict> for Error {
    fn from(conflict: MergeConflict) -> Self {
        Error::UnsafeMerge {
            path: conflict.path,
            reason: conflict.reason,
        }
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
