//! In-memory store backend
//!
//! Uses `DashMap` for the three record types, so concurrent calls on different
//! identities never block each other. Nothing is persisted.

use super::{last_write_wins, rank, StoreBackend};
use crate::types::{Balance, BalanceRecord, HistoryEntry, IdentityKey, LedgerResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};

/// Process-local store backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    balances: DashMap<IdentityKey, Balance>,
    history: DashMap<IdentityKey, Vec<HistoryEntry>>,
    nicknames: DashMap<IdentityKey, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_balances(
        &self,
        identities: &[IdentityKey],
    ) -> LedgerResult<HashMap<IdentityKey, Balance>> {
        Ok(identities
            .iter()
            .map(|identity| {
                let balance = self
                    .balances
                    .get(identity)
                    .map(|entry| entry.value().clone())
                    .unwrap_or_default();
                (identity.clone(), balance)
            })
            .collect())
    }

    async fn set_balances(&self, records: &[BalanceRecord]) -> LedgerResult<()> {
        for record in last_write_wins(records) {
            self.balances.insert(record.identity, record.balance);
        }
        Ok(())
    }

    async fn add_history(&self, entries: &[HistoryEntry]) -> LedgerResult<()> {
        for entry in entries {
            self.history
                .entry(entry.identity.clone())
                .or_default()
                .push(entry.clone());
        }
        Ok(())
    }

    async fn get_history(
        &self,
        identity: &IdentityKey,
        limit: usize,
    ) -> LedgerResult<Vec<HistoryEntry>> {
        Ok(self
            .history
            .get(identity)
            .map(|entries| {
                let start = entries.len().saturating_sub(limit);
                entries[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn get_all_balances(&self) -> LedgerResult<BTreeMap<IdentityKey, Balance>> {
        Ok(self
            .balances
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn get_all_history(&self) -> LedgerResult<BTreeMap<IdentityKey, Vec<HistoryEntry>>> {
        Ok(self
            .history
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn get_all_nicknames(&self) -> LedgerResult<BTreeMap<IdentityKey, String>> {
        Ok(self
            .nicknames
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn update_nicknames(&self, nicknames: &HashMap<IdentityKey, String>) -> LedgerResult<()> {
        for (identity, nickname) in nicknames {
            self.nicknames.insert(identity.clone(), nickname.clone());
        }
        Ok(())
    }

    async fn get_nicknames(
        &self,
        identities: &[IdentityKey],
    ) -> LedgerResult<HashMap<IdentityKey, String>> {
        Ok(identities
            .iter()
            .map(|identity| {
                let nickname = self
                    .nicknames
                    .get(identity)
                    .map(|entry| entry.value().clone())
                    .unwrap_or_else(|| identity.to_string());
                (identity.clone(), nickname)
            })
            .collect())
    }

    async fn get_top_list(&self, offset: usize, limit: usize) -> LedgerResult<Vec<BalanceRecord>> {
        let records = self
            .balances
            .iter()
            .map(|entry| BalanceRecord::new(entry.key().clone(), entry.value().clone()))
            .collect();
        Ok(rank(records, offset, limit))
    }

    async fn reset(&self) -> LedgerResult<()> {
        self.balances.clear();
        self.history.clear();
        self.nicknames.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(value: &str) -> IdentityKey {
        IdentityKey::from_trusted(value)
    }

    #[tokio::test]
    async fn test_absent_identity_has_zero_balance() {
        let store = MemoryStore::new();
        let balances = store.get_balances(&[key("a")]).await.unwrap();
        assert_eq!(balances[&key("a")], Balance::zero());
    }

    #[tokio::test]
    async fn test_history_window_is_oldest_first() {
        let store = MemoryStore::new();
        let entries: Vec<HistoryEntry> = (1..=5)
            .map(|i| HistoryEntry {
                identity: key("a"),
                delta: Balance::from(i),
                reason: format!("entry {}", i),
                timestamp: i,
            })
            .collect();
        store.add_history(&entries).await.unwrap();

        let window = store.get_history(&key("a"), 2).await.unwrap();
        let deltas: Vec<String> = window.iter().map(|e| e.delta.to_string()).collect();
        assert_eq!(deltas, vec!["4", "5"]);
    }

    #[tokio::test]
    async fn test_nickname_only_identity_not_ranked() {
        let store = MemoryStore::new();
        let nicknames = HashMap::from([(key("a"), "Alice".to_string())]);
        store.update_nicknames(&nicknames).await.unwrap();

        assert!(store.get_top_list(0, 10).await.unwrap().is_empty());
        assert!(store.get_all_balances().await.unwrap().is_empty());
    }
}
