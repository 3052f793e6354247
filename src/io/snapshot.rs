//! Snapshot text encodings
//!
//! A snapshot travels either as plain JSON or as base64-encoded JSON for
//! transports that mangle braces and quotes. [`decode_snapshot`] accepts both.

use crate::core::Snapshot;
use crate::types::{LedgerError, LedgerResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Text form of an exported snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotEncoding {
    #[default]
    Json,
    Base64,
}

/// Serialize a snapshot
pub fn encode_snapshot(snapshot: &Snapshot, encoding: SnapshotEncoding) -> LedgerResult<String> {
    match encoding {
        SnapshotEncoding::Json => Ok(serde_json::to_string_pretty(snapshot)?),
        SnapshotEncoding::Base64 => Ok(STANDARD.encode(serde_json::to_vec(snapshot)?)),
    }
}

/// Parse a snapshot in either encoding
///
/// Input starting with `{` (after whitespace) is read as JSON, anything else
/// as base64 of JSON.
pub fn decode_snapshot(text: &str) -> LedgerResult<Snapshot> {
    let text = text.trim();
    if text.starts_with('{') {
        return Ok(serde_json::from_str(text)?);
    }
    let bytes = STANDARD
        .decode(text)
        .map_err(|e| LedgerError::Serialization {
            message: format!("invalid base64 snapshot: {}", e),
        })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write an encoded snapshot to a file
pub fn write_snapshot_file(path: &Path, snapshot: &Snapshot, encoding: SnapshotEncoding) -> LedgerResult<()> {
    std::fs::write(path, encode_snapshot(snapshot, encoding)?)?;
    Ok(())
}

/// Read a snapshot file in either encoding
pub fn read_snapshot_file(path: &Path) -> LedgerResult<Snapshot> {
    decode_snapshot(&std::fs::read_to_string(path)?)
}
