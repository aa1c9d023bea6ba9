//! Decoders for RESULT payloads.
//!
//! Ticket lists are plain comma-separated ids. Field and attachment lists are
//! comma-separated `key:value` pairs with both halves base64-encoded. Views and
//! attachment contents are single base64 blobs. A bad entry in a list is
//! replaced by a placeholder so the rest of the batch still comes through.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Key shown in place of an entry that could not be decoded.
pub const INVALID_ENTRY_KEY: &str = "<invalid entry>";

/// One decoded `key:value` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn is_placeholder(&self) -> bool {
        self.key == INVALID_ENTRY_KEY
    }
}

/// Split a ticket-list payload into ticket ids, skipping empty entries.
pub fn split_ticket_list(payload: &str) -> Vec<String> {
    payload
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decode comma-separated `base64(key):base64(value)` pairs.
pub fn decode_key_values(payload: &str) -> Vec<KeyValue> {
    payload
        .split(',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            decode_pair(entry).unwrap_or_else(|err| KeyValue {
                key: INVALID_ENTRY_KEY.to_string(),
                value: format!("failed to decode {entry:?}: {err:#}"),
            })
        })
        .collect()
}

fn decode_pair(entry: &str) -> Result<KeyValue> {
    let (key, value) = entry
        .split_once(':')
        .ok_or_else(|| anyhow!("missing ':' separator"))?;
    Ok(KeyValue {
        key: decode_text(key).context("bad key")?,
        value: decode_text(value).context("bad value")?,
    })
}

/// Decode a base64 blob into raw bytes.
pub fn decode_bytes(payload: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(payload.trim())
        .with_context(|| format!("invalid base64 payload ({} chars)", payload.len()))
}

/// Decode a base64 blob holding UTF-8 text; invalid sequences are replaced.
pub fn decode_text(payload: &str) -> Result<String> {
    let bytes = decode_bytes(payload)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
