//! Wallet Ledger Library
//! # Overview
//!
//! This library provides per-identity balances with append-only history,
//! fronted by an in-memory write-back cache and persisted through pluggable
//! store backends.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (identities, balances, history, errors)
//! - [`store`] - The [`store::StoreBackend`] contract and its memory, sled and SQLite backends
//! - [`core`] - Business logic components:
//!   - [`core::wallet`] - One identity's balance and unflushed history
//!   - [`core::bank`] - Wallet cache, save queue and batched write-back
//!   - [`core::nickname`] - Coalesced display-name updates
//!   - [`core::transfer`] - Payments with a funds check
//!   - [`core::backup`] - Whole-store snapshots
//! - [`io`] - CSV output and snapshot encodings
//! - [`config`] - TOML configuration
//! - [`cli`] - CLI arguments parsing and command execution
//!
//! # Write-back
//!
//! Mutating a wallet never touches the store directly. The wallet queues itself
//! with its bank, and the bank's scheduler flushes all queued wallets in one
//! batch once saves have been quiet for the flush interval, or at the latest
//! after the max-wait ceiling:
//!
//! ```no_run
//! use std::sync::Arc;
//! use wallet_ledger::{Balance, Bank, BankConfig, IdentityCodec, MemoryStore};
//!
//! # async fn demo() -> wallet_ledger::LedgerResult<()> {
//! let bank = Bank::new(Arc::new(MemoryStore::new()), BankConfig::default(), IdentityCodec::default());
//! let alice = bank.resolve("alice+alice/alice+alice/ali=")?;
//! bank.get_wallet(&alice).await?.add_balance(Balance::from(100), "welcome bonus")?;
//! bank.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod store;
pub mod types;

pub use config::{BankConfig, CurrencyConfig, LedgerConfig, RetryPolicy};
pub use core::{Bank, FlushReport, ImportConfirmation, RankedBalance, Snapshot, TransferPolicy, Wallet};
pub use store::{open_store, BackendConfig, MemoryStore, SledStore, SqlStore, StoreBackend};
pub use types::{
    ActorHandle, AmountInput, Balance, BalanceRecord, HistoryEntry, IdentityCodec, IdentityFormat,
    IdentityInput, IdentityKey, LedgerError, LedgerResult,
};
