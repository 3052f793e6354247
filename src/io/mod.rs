//! I/O module
//!
//! Handles everything that leaves the process as text.
//!
//! # Components
//!
//! - `csv_format` - CSV output for top lists and wallet history
//! - `snapshot` - JSON and base64 encodings of backup snapshots

pub mod csv_format;
pub mod snapshot;

pub use csv_format::{write_history_csv, write_top_list_csv};
pub use snapshot::{
    decode_snapshot, encode_snapshot, read_snapshot_file, write_snapshot_file, SnapshotEncoding,
};
