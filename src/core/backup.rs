//! Whole-store export, import and reset
//!
//! A [`Snapshot`] holds every balance, history entry and nickname of a store.
//! Importing one or resetting the store is destructive, so both require an
//! [`ImportConfirmation`], which can only be built from the literal
//! [`CONFIRMATION_PHRASE`].

use super::bank::Bank;
use crate::store::StoreBackend;
use crate::types::{
    Balance, BalanceRecord, HistoryEntry, IdentityCodec, IdentityKey, LedgerError, LedgerResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Phrase a caller must repeat to run a destructive operation
pub const CONFIRMATION_PHRASE: &str = "I understand that this wipes all ledger data";

/// Proof that a destructive operation was explicitly confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportConfirmation(());

impl ImportConfirmation {
    /// Accept exactly [`CONFIRMATION_PHRASE`]
    pub fn from_phrase(phrase: &str) -> LedgerResult<Self> {
        if phrase.trim() == CONFIRMATION_PHRASE {
            Ok(Self(()))
        } else {
            Err(LedgerError::Config {
                message: format!(
                    "destructive operation not confirmed, repeat the phrase \"{}\"",
                    CONFIRMATION_PHRASE
                ),
            })
        }
    }
}

/// Full content of a store at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub date: DateTime<Utc>,
    pub balances: BTreeMap<IdentityKey, Balance>,
    pub history: BTreeMap<IdentityKey, Vec<HistoryEntry>>,
    pub nicknames: BTreeMap<IdentityKey, String>,
}

impl Snapshot {
    /// Check every identity against a codec
    ///
    /// Snapshots come from files, so their keys are untrusted until checked.
    pub fn validate(&self, codec: &IdentityCodec) -> LedgerResult<()> {
        let history_identities = self
            .history
            .iter()
            .flat_map(|(identity, entries)| {
                std::iter::once(identity).chain(entries.iter().map(|entry| &entry.identity))
            });
        for identity in self
            .balances
            .keys()
            .chain(self.nicknames.keys())
            .chain(history_identities)
        {
            codec.resolve_str(identity.as_str())?;
        }
        for (identity, entries) in &self.history {
            if let Some(entry) = entries.iter().find(|entry| &entry.identity != identity) {
                return Err(LedgerError::Serialization {
                    message: format!(
                        "history entry of {} filed under {}",
                        entry.identity, identity
                    ),
                });
            }
            for entry in entries {
                crate::types::validate_reason(&entry.reason)?;
            }
        }
        Ok(())
    }

    pub fn history_len(&self) -> usize {
        self.history.values().map(Vec::len).sum()
    }
}

/// Read the whole store
pub async fn export_snapshot(store: &dyn StoreBackend) -> LedgerResult<Snapshot> {
    let (balances, history, nicknames) = futures::try_join!(
        store.get_all_balances(),
        store.get_all_history(),
        store.get_all_nicknames()
    )?;
    Ok(Snapshot {
        date: Utc::now(),
        balances,
        history,
        nicknames,
    })
}

/// Wipe the store
pub async fn reset_store(store: &dyn StoreBackend, _confirmation: ImportConfirmation) -> LedgerResult<()> {
    store.reset().await
}

/// Replace the store content with a snapshot
pub async fn import_snapshot(
    store: &dyn StoreBackend,
    snapshot: &Snapshot,
    confirmation: ImportConfirmation,
) -> LedgerResult<()> {
    reset_store(store, confirmation).await?;

    let records: Vec<BalanceRecord> = snapshot
        .balances
        .iter()
        .map(|(identity, balance)| BalanceRecord::new(identity.clone(), balance.clone()))
        .collect();
    let entries: Vec<HistoryEntry> = snapshot.history.values().flatten().cloned().collect();
    let nicknames: HashMap<IdentityKey, String> = snapshot
        .nicknames
        .iter()
        .map(|(identity, nickname)| (identity.clone(), nickname.clone()))
        .collect();

    store.set_balances(&records).await?;
    store.add_history(&entries).await?;
    store.update_nicknames(&nicknames).await?;
    Ok(())
}

impl Bank {
    /// Flush pending wallets and read the whole store
    pub async fn export_snapshot(&self) -> LedgerResult<Snapshot> {
        self.flush_queue().await?;
        let snapshot = export_snapshot(self.store().as_ref()).await?;
        tracing::info!(
            balances = snapshot.balances.len(),
            entries = snapshot.history_len(),
            nicknames = snapshot.nicknames.len(),
            "snapshot exported"
        );
        Ok(snapshot)
    }

    /// Replace the store content with a validated snapshot
    ///
    /// Pending wallets are flushed first and the wallet cache is dropped, so
    /// later `get_wallet` calls see the imported balances.
    pub async fn import_snapshot(
        &self,
        snapshot: &Snapshot,
        confirmation: ImportConfirmation,
    ) -> LedgerResult<()> {
        snapshot.validate(&self.codec())?;
        self.flush_and_invalidate().await?;
        import_snapshot(self.store().as_ref(), snapshot, confirmation).await?;
        tracing::warn!(
            balances = snapshot.balances.len(),
            entries = snapshot.history_len(),
            nicknames = snapshot.nicknames.len(),
            taken = %snapshot.date,
            "store replaced from snapshot"
        );
        Ok(())
    }

    /// Delete every balance, history entry and nickname
    pub async fn reset(&self, confirmation: ImportConfirmation) -> LedgerResult<()> {
        self.flush_and_invalidate().await?;
        reset_store(self.store().as_ref(), confirmation).await?;
        tracing::warn!("store reset");
        Ok(())
    }
}
