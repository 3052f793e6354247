//! CSV output for top lists and wallet history
//!
//! All functions write to any `Write` and are easy to test against a `Vec<u8>`.
//! Amounts are written as exact decimal integers.

use crate::core::RankedBalance;
use crate::types::{HistoryEntry, LedgerError, LedgerResult};
use std::io::Write;

fn csv_error(context: &str, error: csv::Error) -> LedgerError {
    LedgerError::Io {
        message: format!("{}: {}", context, error),
    }
}

/// Write a top list as CSV
///
/// Columns: `rank, identity, nickname, balance`. Ranks start at `offset + 1`
/// so paginated output keeps global positions.
///
/// # Arguments
///
/// * `rows` - Ranked balances in display order
/// * `offset` - Offset the page was fetched with
/// * `output` - Writer receiving the CSV
pub fn write_top_list_csv(
    rows: &[RankedBalance],
    offset: usize,
    output: &mut dyn Write,
) -> LedgerResult<()> {
    let mut writer = csv::Writer::from_writer(output);

    writer
        .write_record(["rank", "identity", "nickname", "balance"])
        .map_err(|e| csv_error("Failed to write CSV header", e))?;

    for (position, row) in rows.iter().enumerate() {
        writer
            .write_record(&[
                (offset + position + 1).to_string(),
                row.identity.to_string(),
                row.nickname.clone(),
                row.balance.to_string(),
            ])
            .map_err(|e| csv_error("Failed to write top list record", e))?;
    }

    writer.flush()?;
    Ok(())
}

/// Write history entries as CSV, oldest first
///
/// Columns: `timestamp, delta, reason`; the timestamp is RFC 3339 in UTC.
pub fn write_history_csv(entries: &[HistoryEntry], output: &mut dyn Write) -> LedgerResult<()> {
    let mut writer = csv::Writer::from_writer(output);

    writer
        .write_record(["timestamp", "delta", "reason"])
        .map_err(|e| csv_error("Failed to write CSV header", e))?;

    for entry in entries {
        let timestamp = chrono::DateTime::from_timestamp(entry.timestamp, 0)
            .map(|date| date.to_rfc3339())
            .unwrap_or_else(|| entry.timestamp.to_string());
        writer
            .write_record(&[timestamp, entry.delta.to_string(), entry.reason.clone()])
            .map_err(|e| csv_error("Failed to write history record", e))?;
    }

    writer.flush()?;
    Ok(())
}
