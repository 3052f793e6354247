//! Core ledger logic
//!
//! This module contains the wallet cache and write-coalescing components:
//! - `wallet` - One identity's balance and unflushed history
//! - `save_queue` - Ordered set of wallets awaiting a flush
//! - `scheduler` - Debounced, retrying write-back task
//! - `bank` - Wallet cache and façade over the store backend
//! - `nickname` - Coalesced display-name writes
//! - `transfer` - Wallet-to-wallet payments with a funds check
//! - `backup` - Whole-store snapshots, import and reset

pub mod backup;
pub mod bank;
pub mod nickname;
mod save_queue;
mod scheduler;
pub mod transfer;
pub mod wallet;

pub use backup::{export_snapshot, import_snapshot, reset_store, ImportConfirmation, Snapshot, CONFIRMATION_PHRASE};
pub use bank::{Bank, FlushReport, RankedBalance};
pub use nickname::NicknameCoalescer;
pub use transfer::{TransferPolicy, TransferReceipt};
pub use wallet::Wallet;
