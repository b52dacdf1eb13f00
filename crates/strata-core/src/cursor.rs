//! Opaque, self-describing pagination cursors.
//!
//! A cursor is URL-safe base64 over a small JSON envelope carrying a format
//! version, a kind tag, and the position payload. Decoding never fails loudly:
//! anything malformed, from another kind, or from another format version
//! decodes to `None`, and callers treat that as "first page".

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current cursor format version.
pub const CURSOR_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    v: u8,
    k: String,
    p: T,
}

/// Encode a position of the given kind into a token.
pub fn encode<T: Serialize>(kind: &str, position: &T) -> String {
    let envelope = Envelope {
        v: CURSOR_VERSION,
        k: kind.to_string(),
        p: position,
    };
    let json = serde_json::to_vec(&envelope).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a token of the given kind. Returns `None` for anything that is
/// not a well-formed current-version cursor of that kind.
pub fn decode<T: DeserializeOwned>(kind: &str, token: &str) -> Option<T> {
    let bytes = URL_SAFE_NO_PAD.decode(token.trim()).ok()?;
    let envelope: Envelope<T> = serde_json::from_slice(&bytes).ok()?;
    if envelope.v != CURSOR_VERSION || envelope.k != kind {
        return None;
    }
    Some(envelope.p)
}

/// Which side of a cursor a page request wants.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PageDirection {
    #[default]
    Forward,
    Backward,
}

/// Slice bounds for a page of `limit` items around a located boundary.
///
/// `boundary` is the index of the cursor's own item in the ordering, or
/// `None` when there is no usable cursor (first page). Forward pages start
/// after the boundary; backward pages end just before it. The boundary item
/// itself is never included.
pub fn page_bounds(
    len: usize,
    boundary: Option<usize>,
    direction: PageDirection,
    limit: usize,
) -> (usize, usize) {
    match (boundary, direction) {
        (None, _) => (0, limit.min(len)),
        (Some(i), PageDirection::Forward) => {
            let start = (i + 1).min(len);
            (start, (start + limit).min(len))
        }
        (Some(i), PageDirection::Backward) => {
            let end = i.min(len);
            (end.saturating_sub(limit), end)
        }
    }
}
