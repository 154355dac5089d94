//! Opaque cursor token codec.
//!
//! A cursor is the tuple of ordering-key values of one row. The tuple is
//! serialized with rkyv and hex-encoded so the token is URL-safe and
//! carries no structure the caller could rely on. The codec knows nothing
//! about orderings; matching a tuple against an ordering is the pagination
//! planner's job.

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::error::CursorError;
use crate::value::Value;

/// Version byte written into every payload.
pub const CURSOR_VERSION: u8 = 1;

// Decode bound for untrusted token input.
const MAX_CURSOR_TOKEN_LEN: usize = 8 * 1024;

#[derive(Debug, Archive, Serialize, Deserialize)]
struct CursorPayload {
    version: u8,
    values: Vec<Value>,
}

/// Encode an ordering-key tuple as an opaque token.
pub fn encode_cursor(values: &[Value]) -> Result<String, CursorError> {
    let payload = CursorPayload {
        version: CURSOR_VERSION,
        values: values.to_vec(),
    };
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&payload)
        .map_err(|e| CursorError::Undecodable(e.to_string()))?;
    Ok(hex::encode(bytes.as_slice()))
}

/// Decode an opaque token back into its ordering-key tuple.
pub fn decode_cursor(token: &str) -> Result<Vec<Value>, CursorError> {
    let token = token.trim();

    if token.is_empty() {
        return Err(CursorError::Empty);
    }

    if token.len() > MAX_CURSOR_TOKEN_LEN {
        return Err(CursorError::TooLong {
            len: token.len(),
            max: MAX_CURSOR_TOKEN_LEN,
        });
    }

    let raw = hex::decode(token).map_err(|e| CursorError::InvalidEncoding(e.to_string()))?;

    // rkyv validates alignment, so the decoded bytes are copied into an
    // aligned buffer before access.
    let mut aligned = AlignedVec::<16>::with_capacity(raw.len());
    aligned.extend_from_slice(&raw);

    let payload = rkyv::from_bytes::<CursorPayload, rkyv::rancor::Error>(&aligned)
        .map_err(|e| CursorError::Undecodable(e.to_string()))?;

    if payload.version != CURSOR_VERSION {
        return Err(CursorError::UnsupportedVersion(payload.version));
    }

    Ok(payload.values)
}
