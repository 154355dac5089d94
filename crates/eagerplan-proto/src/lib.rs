//! eagerplan protocol types.
//!
//! This crate defines the plain data shared between callers and the plan
//! engine.
//!
//! # Modules
//!
//! - [`value`] - Runtime values with a total order
//! - [`query`] - Filters, ordering, pagination requests, annotation expressions
//! - [`selection`] - Field-selection documents from the transport layer
//! - [`result`] - Materialized rows and pages
//! - [`cursor`] - Opaque cursor token codec
//! - [`error`] - Protocol error types

pub mod cursor;
pub mod error;
pub mod query;
pub mod result;
pub mod selection;
pub mod value;

pub use cursor::{decode_cursor, encode_cursor};
pub use error::CursorError;
pub use query::{
    AggregateFunction, Expr, FilterExpr, NullsOrder, OrderDirection, OrderSpec, PageRequest,
};
pub use result::{Edge, Page, PageInfo, Related, Row};
pub use selection::{
    Directive, Document, FieldSelection, FragmentDefinition, InputValue, Selection,
};
pub use value::Value;
