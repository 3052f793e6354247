//! History entries and balance records exchanged with store backends

use super::balance::Balance;
use super::error::{LedgerError, LedgerResult};
use super::identity::IdentityKey;
use serde::{Deserialize, Serialize};

/// Maximum length of a history reason, in characters
pub const MAX_REASON_LEN: usize = 255;

/// One append-only history record
///
/// `delta` is signed: credits are positive, debits negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub identity: IdentityKey,
    pub delta: Balance,
    pub reason: String,
    /// Unix seconds
    pub timestamp: i64,
}

impl HistoryEntry {
    /// Create an entry stamped with the current time
    pub fn now(identity: IdentityKey, delta: Balance, reason: &str) -> Self {
        Self {
            identity,
            delta,
            reason: reason.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Check a reason string before any mutation uses it
pub fn validate_reason(reason: &str) -> LedgerResult<()> {
    let length = reason.chars().count();
    if length > MAX_REASON_LEN {
        return Err(LedgerError::reason_too_long(length, MAX_REASON_LEN));
    }
    Ok(())
}

/// An identity together with its stored balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub identity: IdentityKey,
    pub balance: Balance,
}

impl BalanceRecord {
    pub fn new(identity: IdentityKey, balance: Balance) -> Self {
        Self { identity, balance }
    }
}
