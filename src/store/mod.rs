//! Store backends for balances, history and nicknames
//!
//! The [`StoreBackend`] trait is the only persistence boundary the ledger core
//! talks to. Every operation is batched so a flush costs one round trip per
//! record type, whatever the number of wallets involved.
//!
//! # Backends
//!
//! - [`MemoryStore`] - process-local maps, nothing survives a restart
//! - [`SledStore`] - embedded key/value store on disk
//! - [`SqlStore`] - relational store (SQLite) with an idempotent schema bootstrap
//!
//! All three must behave identically for every operation; the contract tests in
//! `tests/backend_contract.rs` run the same cases against each of them.

use crate::types::{Balance, BalanceRecord, HistoryEntry, IdentityKey, LedgerResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

pub mod kv;
pub mod memory;
pub mod sql;

pub use kv::SledStore;
pub use memory::MemoryStore;
pub use sql::SqlStore;

/// Persistence contract driven by the bank
///
/// Implementations must treat an empty input batch as a no-op that does not
/// touch the underlying storage.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Fetch balances; identities without a record map to zero
    async fn get_balances(
        &self,
        identities: &[IdentityKey],
    ) -> LedgerResult<HashMap<IdentityKey, Balance>>;

    /// Upsert balances; the last record per identity in the batch wins
    async fn set_balances(&self, records: &[BalanceRecord]) -> LedgerResult<()>;

    /// Append history entries
    async fn add_history(&self, entries: &[HistoryEntry]) -> LedgerResult<()>;

    /// The `limit` most recent entries for one identity, oldest first
    async fn get_history(
        &self,
        identity: &IdentityKey,
        limit: usize,
    ) -> LedgerResult<Vec<HistoryEntry>>;

    /// Every stored balance record
    async fn get_all_balances(&self) -> LedgerResult<BTreeMap<IdentityKey, Balance>>;

    /// Every history entry, grouped by identity, oldest first
    async fn get_all_history(&self) -> LedgerResult<BTreeMap<IdentityKey, Vec<HistoryEntry>>>;

    /// Every stored nickname
    async fn get_all_nicknames(&self) -> LedgerResult<BTreeMap<IdentityKey, String>>;

    /// Upsert display names
    async fn update_nicknames(&self, nicknames: &HashMap<IdentityKey, String>) -> LedgerResult<()>;

    /// Fetch display names; identities without one map to themselves
    async fn get_nicknames(
        &self,
        identities: &[IdentityKey],
    ) -> LedgerResult<HashMap<IdentityKey, String>>;

    /// Balances sorted descending (ties by identity), paginated
    async fn get_top_list(&self, offset: usize, limit: usize) -> LedgerResult<Vec<BalanceRecord>>;

    /// Delete all balance, history and nickname records
    async fn reset(&self) -> LedgerResult<()>;
}

/// Which backend to open at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory,
    Sled { path: PathBuf },
    Sqlite { url: String },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory
    }
}

/// Open the backend selected by `config`
///
/// The relational backend is connected and bootstrapped before it is returned.
pub async fn open_store(config: &BackendConfig) -> LedgerResult<Arc<dyn StoreBackend>> {
    let store: Arc<dyn StoreBackend> = match config {
        BackendConfig::Memory => Arc::new(MemoryStore::new()),
        BackendConfig::Sled { path } => Arc::new(SledStore::open(path)?),
        BackendConfig::Sqlite { url } => Arc::new(SqlStore::connect(url).await?),
    };
    tracing::info!(backend = store.name(), "store backend opened");
    Ok(store)
}

/// Collapse a batch so each identity appears once, keeping its last record
pub(crate) fn last_write_wins(records: &[BalanceRecord]) -> Vec<BalanceRecord> {
    let mut latest: HashMap<&IdentityKey, usize> = HashMap::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        latest.insert(&record.identity, index);
    }
    records
        .iter()
        .enumerate()
        .filter(|(index, record)| latest.get(&record.identity) == Some(index))
        .map(|(_, record)| record.clone())
        .collect()
}

/// Sort records for a top list and cut out one page
pub(crate) fn rank(mut records: Vec<BalanceRecord>, offset: usize, limit: usize) -> Vec<BalanceRecord> {
    records.sort_by(|a, b| {
        b.balance
            .cmp(&a.balance)
            .then_with(|| a.identity.cmp(&b.identity))
    });
    records.into_iter().skip(offset).take(limit).collect()
}
