//! Wallet cache and write-back coordinator
//!
//! This module provides the `Bank` struct, the façade front-ends talk to. It
//! hands out [`Wallet`] handles, collects the ones that changed and persists
//! them in batches through a [`StoreBackend`].
//!
//! # Architecture
//!
//! ```text
//! Bank (cheap Clone handle)
//!     ├── DashMap<IdentityKey, Wallet>   (wallet cache, one live wallet per identity)
//!     ├── Arc<SaveQueue>                 (wallets awaiting a flush)
//!     ├── tokio Mutex flush gate         (at most one flush in flight)
//!     ├── scheduler task                 (debounce + max-wait + retry)
//!     └── NicknameCoalescer              (batched display-name writes)
//! ```
//!
//! # Write-through mode
//!
//! A flush interval of `0` disables the cache. Every mutation is flushed right
//! away, and every `get_wallet` flushes whatever is still queued before it
//! builds a new wallet from the store.

use super::nickname::NicknameCoalescer;
use super::save_queue::SaveQueue;
use super::scheduler;
use super::wallet::Wallet;
use crate::config::BankConfig;
use crate::store::StoreBackend;
use crate::types::{
    Balance, BalanceRecord, HistoryEntry, IdentityCodec, IdentityInput, IdentityKey, LedgerResult,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Wallets whose balance was written
    pub wallets: usize,
    /// History entries appended
    pub entries: usize,
}

/// One row of a top list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedBalance {
    pub identity: IdentityKey,
    pub balance: Balance,
    /// Stored display name, or the identity itself when none is known
    pub nickname: String,
}

struct BankInner {
    store: Arc<dyn StoreBackend>,
    codec: IdentityCodec,
    config: BankConfig,
    cache: DashMap<IdentityKey, Wallet>,
    queue: Arc<SaveQueue>,
    flush_gate: Arc<tokio::sync::Mutex<()>>,
    nicknames: NicknameCoalescer,
    cancel: CancellationToken,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

/// Wallet cache and batched write-back over a store backend
#[derive(Clone)]
pub struct Bank {
    inner: Arc<BankInner>,
}

impl Bank {
    /// Create a bank and start its background tasks
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `store` - Backend all wallets are persisted to
    /// * `config` - Timer and retry settings
    /// * `codec` - Codec used by [`Bank::resolve`] and the nickname coalescer
    pub fn new(store: Arc<dyn StoreBackend>, config: BankConfig, codec: IdentityCodec) -> Self {
        let cancel = CancellationToken::new();
        let nicknames = NicknameCoalescer::new(
            store.clone(),
            codec,
            config.nickname_quiet(),
            cancel.child_token(),
        );

        let bank = Self {
            inner: Arc::new(BankInner {
                store,
                codec,
                config,
                cache: DashMap::new(),
                queue: Arc::new(SaveQueue::new()),
                flush_gate: Arc::new(tokio::sync::Mutex::new(())),
                nicknames,
                cancel: cancel.clone(),
                scheduler: Mutex::new(None),
            }),
        };

        let handle = tokio::spawn(scheduler::run(bank.clone(), cancel));
        *bank.inner.scheduler.lock() = Some(handle);

        tracing::info!(
            backend = bank.inner.store.name(),
            flush_interval_ms = bank.inner.config.flush_interval_ms,
            caching = bank.inner.config.caching_enabled(),
            "bank started"
        );
        bank
    }

    pub fn config(&self) -> &BankConfig {
        &self.inner.config
    }

    pub fn codec(&self) -> IdentityCodec {
        self.inner.codec
    }

    pub fn store(&self) -> &Arc<dyn StoreBackend> {
        &self.inner.store
    }

    pub fn nicknames(&self) -> &NicknameCoalescer {
        &self.inner.nicknames
    }

    pub(crate) fn save_queue(&self) -> Arc<SaveQueue> {
        self.inner.queue.clone()
    }

    /// Resolve a raw identity or an actor handle with the bank's codec
    pub fn resolve<'a>(&self, input: impl Into<IdentityInput<'a>>) -> LedgerResult<IdentityKey> {
        self.inner.codec.resolve(input.into())
    }

    /// Number of wallets waiting for the next flush
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Number of cached wallets
    pub fn cached(&self) -> usize {
        self.inner.cache.len()
    }

    /// Get the wallet of an identity
    ///
    /// A cached wallet is returned as is. Otherwise the balance is loaded from
    /// the store (zero when absent) and the new wallet is cached. If another
    /// task cached a wallet for the same identity while the load was in
    /// flight, that wallet wins and the freshly loaded one is dropped.
    ///
    /// Without caching every call builds a fresh wallet, so the queue is
    /// flushed first and the load sees every earlier mutation.
    ///
    /// # Errors
    ///
    /// Propagates backend failures of the balance load, and of the preceding
    /// flush when caching is disabled.
    pub async fn get_wallet(&self, identity: &IdentityKey) -> LedgerResult<Wallet> {
        let caching = self.inner.config.caching_enabled();
        if caching {
            if let Some(wallet) = self.inner.cache.get(identity) {
                return Ok(wallet.value().clone());
            }
        } else {
            self.flush_queue().await?;
        }

        let balance = self
            .inner
            .store
            .get_balances(std::slice::from_ref(identity))
            .await?
            .remove(identity)
            .unwrap_or_default();

        let wallet = Wallet::new(
            identity.clone(),
            balance,
            self.inner.store.clone(),
            self.inner.queue.clone(),
        );
        if !caching {
            return Ok(wallet);
        }

        Ok(self
            .inner
            .cache
            .entry(identity.clone())
            .or_insert_with(|| wallet)
            .clone())
    }

    /// Queue a wallet for the next flush
    ///
    /// Mutations queue their wallet themselves; this is for callers that want
    /// to force a rewrite of an unchanged balance.
    pub fn queue_save(&self, wallet: &Wallet) {
        self.inner.queue.push(wallet);
    }

    /// Persist every queued wallet in one batch
    ///
    /// Balances and history go out as one `set_balances` and one `add_history`
    /// call, issued concurrently. An empty queue makes no store call.
    ///
    /// # Errors
    ///
    /// On a backend failure the wallets are queued again and history that was
    /// not written is put back in front of their pending entries, so the next
    /// flush writes it in the original order.
    pub async fn flush_queue(&self) -> LedgerResult<FlushReport> {
        let _gate = self.inner.flush_gate.lock().await;

        let wallets = self.inner.queue.drain();
        if wallets.is_empty() {
            return Ok(FlushReport::default());
        }

        let mut records = Vec::with_capacity(wallets.len());
        let mut entries: Vec<HistoryEntry> = Vec::new();
        for wallet in &wallets {
            let (balance, history) = wallet.drain_history();
            records.push(BalanceRecord::new(wallet.identity().clone(), balance));
            entries.extend(history);
        }

        let store = &self.inner.store;
        let (balances_written, history_written) =
            futures::join!(store.set_balances(&records), store.add_history(&entries));

        // History that reached the store must not be restored, or a retry
        // would append it twice. Balance writes are idempotent.
        let history_failed = history_written.is_err();
        for wallet in &wallets {
            wallet.settle_history(!history_failed);
        }
        let error = match (balances_written, history_written) {
            (Ok(()), Ok(())) => {
                return Ok(FlushReport {
                    wallets: records.len(),
                    entries: entries.len(),
                })
            }
            (Err(e), _) | (Ok(()), Err(e)) => e,
        };

        tracing::warn!(
            error = %error,
            wallets = wallets.len(),
            entries = entries.len(),
            history_restored = history_failed,
            "flush failed, wallets queued again"
        );
        self.inner.queue.requeue(wallets);
        Err(error)
    }

    /// Balances for many identities
    ///
    /// Cached wallets take precedence over the store, so unflushed mutations
    /// are visible. Without caching the queue is flushed before the read.
    pub async fn get_balances(
        &self,
        identities: &[IdentityKey],
    ) -> LedgerResult<HashMap<IdentityKey, Balance>> {
        if !self.inner.config.caching_enabled() {
            self.flush_queue().await?;
        }
        let mut balances = self.inner.store.get_balances(identities).await?;
        for identity in identities {
            if let Some(wallet) = self.inner.cache.get(identity) {
                balances.insert(identity.clone(), wallet.balance());
            }
        }
        Ok(balances)
    }

    /// Persisted top list joined with display names
    ///
    /// Reads the store only; mutations still queued are not reflected.
    pub async fn get_top_list(&self, offset: usize, limit: usize) -> LedgerResult<Vec<RankedBalance>> {
        let records = self.inner.store.get_top_list(offset, limit).await?;
        let identities: Vec<IdentityKey> = records.iter().map(|r| r.identity.clone()).collect();
        let mut nicknames = self.inner.store.get_nicknames(&identities).await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let nickname = nicknames
                    .remove(&record.identity)
                    .unwrap_or_else(|| record.identity.to_string());
                RankedBalance {
                    identity: record.identity,
                    balance: record.balance,
                    nickname,
                }
            })
            .collect())
    }

    /// Most recent history of one identity, oldest first
    pub async fn get_history(
        &self,
        identity: &IdentityKey,
        limit: usize,
    ) -> LedgerResult<Vec<HistoryEntry>> {
        self.get_wallet(identity).await?.get_history(limit).await
    }

    /// Display name stored for an identity, or the identity itself
    pub async fn get_nickname(&self, identity: &IdentityKey) -> LedgerResult<String> {
        let mut nicknames = self
            .inner
            .store
            .get_nicknames(std::slice::from_ref(identity))
            .await?;
        Ok(nicknames
            .remove(identity)
            .unwrap_or_else(|| identity.to_string()))
    }

    /// Write a display name right away
    pub async fn update_nickname(&self, identity: &IdentityKey, nickname: &str) -> LedgerResult<()> {
        let update = HashMap::from([(identity.clone(), nickname.to_string())]);
        self.inner.store.update_nicknames(&update).await
    }

    /// Flush, then drop every cached wallet
    ///
    /// Used before destructive store operations. Wallet handles held by
    /// callers stay usable but are no longer the cached instance.
    pub(crate) async fn flush_and_invalidate(&self) -> LedgerResult<FlushReport> {
        let report = self.flush_queue().await?;
        self.inner.cache.clear();
        tracing::debug!("wallet cache invalidated");
        Ok(report)
    }

    /// Stop background tasks and flush everything still queued
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) -> LedgerResult<FlushReport> {
        self.inner.cancel.cancel();
        let task = self.inner.scheduler.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "flush scheduler panicked");
            }
        }

        let nicknames = self.inner.nicknames.shutdown().await;
        let report = self.flush_queue().await?;
        nicknames?;
        tracing::info!(wallets = report.wallets, entries = report.entries, "bank shut down");
        Ok(report)
    }
}
