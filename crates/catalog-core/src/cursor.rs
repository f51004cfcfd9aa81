//! Pagination cursor codec
//!
//! A cursor is an opaque token naming a position in the `(created_at, id)`
//! ordering of a collection. Tokens carry their schema version so a token
//! minted by a different codec version is rejected instead of misread.

use crate::{CatalogError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version embedded in every token this codec emits.
pub const CURSOR_VERSION: u32 = 1;

/// Longest token accepted before decoding is attempted.
pub const MAX_CURSOR_LEN: usize = 512;

/// Composite ordering key: primary order field plus identifier tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SortKey {
    /// Creation time in microseconds since the epoch
    pub created_at: i64,
    pub id: Uuid,
}

impl SortKey {
    pub fn new(created_at: i64, id: Uuid) -> Self {
        Self { created_at, id }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CursorPayload {
    v: u32,
    k: i64,
    id: Uuid,
}

/// Encode a sort key as an opaque, URL-safe token.
pub fn encode(key: &SortKey) -> String {
    let payload = CursorPayload {
        v: CURSOR_VERSION,
        k: key.created_at,
        id: key.id,
    };
    // Serializing three plain fields cannot fail
    let json = serde_json::to_vec(&payload).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a token produced by [`encode`].
pub fn decode(token: &str) -> Result<SortKey> {
    if token.is_empty() {
        return Err(CatalogError::MalformedCursor("cursor is empty".to_string()));
    }
    if token.len() > MAX_CURSOR_LEN {
        return Err(CatalogError::MalformedCursor(format!(
            "cursor too long: {} > {} characters",
            token.len(),
            MAX_CURSOR_LEN
        )));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| CatalogError::MalformedCursor(format!("invalid encoding: {}", e)))?;

    let payload: CursorPayload = serde_json::from_slice(&bytes)
        .map_err(|e| CatalogError::MalformedCursor(format!("invalid payload: {}", e)))?;

    if payload.v != CURSOR_VERSION {
        return Err(CatalogError::MalformedCursor(format!(
            "unsupported cursor version {} (expected {})",
            payload.v, CURSOR_VERSION
        )));
    }

    Ok(SortKey::new(payload.k, payload.id))
}
