//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding an opaque cursor token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    /// The token is empty.
    #[error("cursor token is empty")]
    Empty,

    /// The token is longer than any cursor this crate produces.
    #[error("cursor token exceeds max length: {len} chars (max {max})")]
    TooLong { len: usize, max: usize },

    /// The token is not valid hex.
    #[error("cursor token is not valid hex: {0}")]
    InvalidEncoding(String),

    /// The payload does not decode to a value tuple.
    #[error("cursor payload is undecodable: {0}")]
    Undecodable(String),

    /// The payload was produced by an incompatible encoder.
    #[error("unsupported cursor version {0}")]
    UnsupportedVersion(u8),

    /// The value tuple does not match the ordering it is used with.
    #[error("cursor has {actual} values but the ordering has {expected} terms")]
    ArityMismatch { expected: usize, actual: usize },
}
