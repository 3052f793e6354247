//! Key/value store backend on top of sled
//!
//! ## Tree Layout
//!
//! | Tree        | Key                               | Value                  |
//! |-------------|-----------------------------------|------------------------|
//! | `balances`  | identity (UTF-8)                  | decimal balance string |
//! | `history`   | identity, `0x00`, id (8B BE)      | JSON `HistoryEntry`    |
//! | `nicknames` | identity (UTF-8)                  | display name (UTF-8)   |
//!
//! History ids come from `Db::generate_id`, which is monotonic, so a prefix scan
//! over one identity yields its entries in insertion order. Identities never
//! contain a NUL byte, which keeps one identity's prefix from matching another.
//!
//! sled calls are synchronous and fast; they run directly on the calling task.

use super::{last_write_wins, rank, StoreBackend};
use crate::types::{Balance, BalanceRecord, HistoryEntry, IdentityKey, LedgerError, LedgerResult};
use async_trait::async_trait;
use sled::{Batch, Db, IVec, Tree};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const BACKEND: &str = "sled";

/// Embedded on-disk store backend
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    balances: Tree,
    history: Tree,
    nicknames: Tree,
}

impl SledStore {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Temporary database, removed when dropped
    pub fn temporary() -> LedgerResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> LedgerResult<Self> {
        Ok(Self {
            balances: db.open_tree("balances")?,
            history: db.open_tree("history")?,
            nicknames: db.open_tree("nicknames")?,
            db,
        })
    }

    fn history_prefix(identity: &IdentityKey) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(identity.as_str().len() + 1);
        prefix.extend_from_slice(identity.as_str().as_bytes());
        prefix.push(0);
        prefix
    }

    async fn persist(&self) -> LedgerResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

fn decode_text(bytes: &IVec) -> LedgerResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| LedgerError::backend_failure(BACKEND, format!("corrupt text record: {}", e)))
}

fn decode_balance(bytes: &IVec) -> LedgerResult<Balance> {
    decode_text(bytes)?
        .parse()
        .map_err(|e| LedgerError::backend_failure(BACKEND, format!("corrupt balance record: {}", e)))
}

fn decode_entry(bytes: &IVec) -> LedgerResult<HistoryEntry> {
    serde_json::from_slice(bytes)
        .map_err(|e| LedgerError::backend_failure(BACKEND, format!("corrupt history record: {}", e)))
}

#[async_trait]
impl StoreBackend for SledStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get_balances(
        &self,
        identities: &[IdentityKey],
    ) -> LedgerResult<HashMap<IdentityKey, Balance>> {
        let mut balances = HashMap::with_capacity(identities.len());
        for identity in identities {
            let balance = match self.balances.get(identity.as_str())? {
                Some(bytes) => decode_balance(&bytes)?,
                None => Balance::zero(),
            };
            balances.insert(identity.clone(), balance);
        }
        Ok(balances)
    }

    async fn set_balances(&self, records: &[BalanceRecord]) -> LedgerResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut batch = Batch::default();
        for record in last_write_wins(records) {
            batch.insert(record.identity.as_str(), record.balance.to_string().as_bytes());
        }
        self.balances.apply_batch(batch)?;
        self.persist().await
    }

    async fn add_history(&self, entries: &[HistoryEntry]) -> LedgerResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut batch = Batch::default();
        for entry in entries {
            let mut key = Self::history_prefix(&entry.identity);
            key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
            batch.insert(key, serde_json::to_vec(entry)?);
        }
        self.history.apply_batch(batch)?;
        self.persist().await
    }

    async fn get_history(
        &self,
        identity: &IdentityKey,
        limit: usize,
    ) -> LedgerResult<Vec<HistoryEntry>> {
        let mut window = Vec::with_capacity(limit.min(64));
        for item in self
            .history
            .scan_prefix(Self::history_prefix(identity))
            .rev()
            .take(limit)
        {
            let (_, value) = item?;
            window.push(decode_entry(&value)?);
        }
        window.reverse();
        Ok(window)
    }

    async fn get_all_balances(&self) -> LedgerResult<BTreeMap<IdentityKey, Balance>> {
        let mut balances = BTreeMap::new();
        for item in self.balances.iter() {
            let (key, value) = item?;
            balances.insert(IdentityKey::from_trusted(decode_text(&key)?), decode_balance(&value)?);
        }
        Ok(balances)
    }

    async fn get_all_history(&self) -> LedgerResult<BTreeMap<IdentityKey, Vec<HistoryEntry>>> {
        let mut history: BTreeMap<IdentityKey, Vec<HistoryEntry>> = BTreeMap::new();
        for item in self.history.iter() {
            let (_, value) = item?;
            let entry = decode_entry(&value)?;
            history.entry(entry.identity.clone()).or_default().push(entry);
        }
        Ok(history)
    }

    async fn get_all_nicknames(&self) -> LedgerResult<BTreeMap<IdentityKey, String>> {
        let mut nicknames = BTreeMap::new();
        for item in self.nicknames.iter() {
            let (key, value) = item?;
            nicknames.insert(IdentityKey::from_trusted(decode_text(&key)?), decode_text(&value)?);
        }
        Ok(nicknames)
    }

    async fn update_nicknames(&self, nicknames: &HashMap<IdentityKey, String>) -> LedgerResult<()> {
        if nicknames.is_empty() {
            return Ok(());
        }
        let mut batch = Batch::default();
        for (identity, nickname) in nicknames {
            batch.insert(identity.as_str(), nickname.as_bytes());
        }
        self.nicknames.apply_batch(batch)?;
        self.persist().await
    }

    async fn get_nicknames(
        &self,
        identities: &[IdentityKey],
    ) -> LedgerResult<HashMap<IdentityKey, String>> {
        let mut nicknames = HashMap::with_capacity(identities.len());
        for identity in identities {
            let nickname = match self.nicknames.get(identity.as_str())? {
                Some(bytes) => decode_text(&bytes)?,
                None => identity.to_string(),
            };
            nicknames.insert(identity.clone(), nickname);
        }
        Ok(nicknames)
    }

    async fn get_top_list(&self, offset: usize, limit: usize) -> LedgerResult<Vec<BalanceRecord>> {
        let records = self
            .get_all_balances()
            .await?
            .into_iter()
            .map(|(identity, balance)| BalanceRecord::new(identity, balance))
            .collect();
        Ok(rank(records, offset, limit))
    }

    async fn reset(&self) -> LedgerResult<()> {
        self.balances.clear()?;
        self.history.clear()?;
        self.nicknames.clear()?;
        self.persist().await
    }
}
