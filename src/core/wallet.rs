//! In-memory wallet for one identity
//!
//! A [`Wallet`] is a cheap handle; clones share the same balance and pending
//! history. Every mutation appends a history entry and queues the wallet with
//! its bank, which persists it on the next flush.
//!
//! # Locking
//!
//! Per-wallet state sits behind a `parking_lot::Mutex` that is only held for
//! synchronous sections, never across an `.await`. History handed to a flush
//! stays visible as in-flight until the flush settles it. Every hand-off and
//! settlement bumps a generation counter; a history read that saw the counter
//! move while it awaited the store discards its result and reads again.

use super::save_queue::SaveQueue;
use crate::store::StoreBackend;
use crate::types::{
    validate_reason, Balance, HistoryEntry, IdentityKey, LedgerError, LedgerResult,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
struct WalletState {
    balance: Balance,
    /// History not yet handed to a flush, oldest first
    pending: Vec<HistoryEntry>,
    /// History handed to a running flush, older than `pending`
    in_flight: Vec<HistoryEntry>,
    /// Bumped whenever history moves between memory and the store
    generation: u64,
}

impl WalletState {
    fn unflushed_len(&self) -> usize {
        self.in_flight.len() + self.pending.len()
    }

    /// Newest `count` unflushed entries, oldest first
    fn unflushed_tail(&self, count: usize) -> Vec<HistoryEntry> {
        let skip = self.unflushed_len().saturating_sub(count);
        self.in_flight
            .iter()
            .chain(self.pending.iter())
            .skip(skip)
            .cloned()
            .collect()
    }
}

struct WalletInner {
    identity: IdentityKey,
    state: Mutex<WalletState>,
    store: Arc<dyn StoreBackend>,
    queue: Arc<SaveQueue>,
}

/// Balance and unflushed history of one identity
#[derive(Clone)]
pub struct Wallet {
    inner: Arc<WalletInner>,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Wallet")
            .field("identity", &self.inner.identity)
            .field("balance", &state.balance)
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

impl Wallet {
    pub(crate) fn new(
        identity: IdentityKey,
        balance: Balance,
        store: Arc<dyn StoreBackend>,
        queue: Arc<SaveQueue>,
    ) -> Self {
        Self {
            inner: Arc::new(WalletInner {
                identity,
                state: Mutex::new(WalletState {
                    balance,
                    pending: Vec::new(),
                    in_flight: Vec::new(),
                    generation: 0,
                }),
                store,
                queue,
            }),
        }
    }

    /// Identity owning this wallet
    pub fn identity(&self) -> &IdentityKey {
        &self.inner.identity
    }

    /// Current in-memory balance
    pub fn balance(&self) -> Balance {
        self.inner.state.lock().balance.clone()
    }

    /// Number of history entries not yet persisted
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().unflushed_len()
    }

    /// Whether the balance covers `amount`
    pub fn has_funds(&self, amount: &Balance) -> bool {
        self.inner.state.lock().balance >= *amount
    }

    /// Credit `amount` and record it
    ///
    /// # Errors
    ///
    /// Returns `ReasonTooLong` without changing anything if the reason exceeds
    /// the maximum length.
    pub fn add_balance(&self, amount: Balance, reason: &str) -> LedgerResult<&Self> {
        self.mutate(reason, |balance| {
            *balance += &amount;
            Ok(amount)
        })
    }

    /// Debit `amount` and record it as a negative delta
    ///
    /// The balance may go below zero; callers that need a floor use
    /// [`Wallet::withdraw`] or check [`Wallet::has_funds`] first.
    pub fn remove_balance(&self, amount: Balance, reason: &str) -> LedgerResult<&Self> {
        self.mutate(reason, |balance| {
            *balance -= &amount;
            Ok(-amount)
        })
    }

    /// Replace the balance, recording the difference to the previous one
    pub fn set_balance(&self, amount: Balance, reason: &str) -> LedgerResult<&Self> {
        self.mutate(reason, |balance| {
            let delta = &amount - &*balance;
            *balance = amount;
            Ok(delta)
        })
    }

    /// Debit `amount` only if the balance covers it
    ///
    /// The funds check and the debit happen under one lock, so two concurrent
    /// withdrawals can never both pass the check on the same funds.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientFunds` (nothing mutated) when the balance is lower
    /// than `amount`, or `ReasonTooLong`.
    pub fn withdraw(&self, amount: Balance, reason: &str) -> LedgerResult<&Self> {
        let identity = self.inner.identity.clone();
        self.mutate(reason, |balance| {
            if *balance < amount {
                return Err(LedgerError::insufficient_funds(
                    identity.as_str(),
                    balance.clone(),
                    amount,
                ));
            }
            *balance -= &amount;
            Ok(-amount)
        })
    }

    /// Apply `change` to the balance, record the returned delta and queue a save
    fn mutate<F>(&self, reason: &str, change: F) -> LedgerResult<&Self>
    where
        F: FnOnce(&mut Balance) -> LedgerResult<Balance>,
    {
        validate_reason(reason)?;
        {
            let mut state = self.inner.state.lock();
            let delta = change(&mut state.balance)?;
            tracing::debug!(identity = %self.inner.identity, %delta, reason, "wallet mutated");
            state
                .pending
                .push(HistoryEntry::now(self.inner.identity.clone(), delta, reason));
        }
        self.inner.queue.push(self);
        Ok(self)
    }

    /// Most recent `limit` history entries, oldest first
    ///
    /// Unflushed entries are newer than anything persisted, so they form the
    /// tail of the result; the store is only asked for the remainder. No lock
    /// is held while the store is read, so a slow read never delays flushes.
    pub async fn get_history(&self, limit: usize) -> LedgerResult<Vec<HistoryEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        loop {
            let (unflushed, generation) = {
                let state = self.inner.state.lock();
                let unflushed = state.unflushed_len();
                if unflushed >= limit {
                    return Ok(state.unflushed_tail(limit));
                }
                (unflushed, state.generation)
            };

            let mut history = self
                .inner
                .store
                .get_history(&self.inner.identity, limit - unflushed)
                .await?;

            let state = self.inner.state.lock();
            if state.generation != generation {
                // A flush moved entries while the store was read; the result
                // may miss or repeat them.
                drop(state);
                tracing::trace!(identity = %self.inner.identity, "history read raced a flush, retrying");
                continue;
            }
            // Mutations may have landed during the read; they are still newest.
            history.extend(state.unflushed_tail(state.unflushed_len()));
            let excess = history.len().saturating_sub(limit);
            history.drain(..excess);
            return Ok(history);
        }
    }

    /// Balance snapshot plus every pending entry, taken under one lock
    ///
    /// The entries stay visible as in-flight until [`Wallet::settle_history`]
    /// is called. Must only be called by a flush holding the flush gate.
    pub(crate) fn drain_history(&self) -> (Balance, Vec<HistoryEntry>) {
        let mut state = self.inner.state.lock();
        let pending = std::mem::take(&mut state.pending);
        state.in_flight.extend(pending.iter().cloned());
        state.generation += 1;
        (state.balance.clone(), pending)
    }

    /// Finish the flush that drained this wallet
    ///
    /// Persisted entries are dropped from memory. Entries the store did not
    /// take go back before any newer pending ones.
    pub(crate) fn settle_history(&self, persisted: bool) {
        let mut state = self.inner.state.lock();
        let in_flight = std::mem::take(&mut state.in_flight);
        if !persisted {
            state.pending.splice(0..0, in_flight);
        }
        state.generation += 1;
    }

    /// Stable id of the shared state, used for queue membership
    pub(crate) fn instance_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}
