//! Types module
//!
//! Contains core data structures used throughout the ledger.
//! - `identity`: identity keys, actor handles and the identity codec
//! - `balance`: arbitrary-precision balance values
//! - `history`: history entries and balance records
//! - `error`: error types for the ledger

pub mod balance;
pub mod error;
pub mod history;
pub mod identity;

pub use balance::{AmountInput, Balance, Converted, MAX_SAFE_INTEGER};
pub use error::{LedgerError, LedgerResult};
pub use history::{validate_reason, BalanceRecord, HistoryEntry, MAX_REASON_LEN};
pub use identity::{ActorHandle, IdentityCodec, IdentityFormat, IdentityInput, IdentityKey};
