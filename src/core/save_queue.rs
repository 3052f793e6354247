//! Pending-save set shared by the bank and its wallets
//!
//! Membership is by wallet instance: a wallet queued twice before the next
//! flush appears once, at the position of its first enqueue.

use super::wallet::Wallet;
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::Notify;

#[derive(Default)]
struct QueueState {
    wallets: Vec<Wallet>,
    members: HashSet<usize>,
}

/// Ordered set of wallets awaiting a flush
#[derive(Default)]
pub(crate) struct SaveQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SaveQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a wallet and wake the scheduler
    ///
    /// Returns `false` when the wallet was already queued. The scheduler is
    /// woken either way, which restarts its quiet-period countdown.
    pub(crate) fn push(&self, wallet: &Wallet) -> bool {
        let inserted = {
            let mut state = self.state.lock();
            if state.members.insert(wallet.instance_id()) {
                state.wallets.push(wallet.clone());
                true
            } else {
                false
            }
        };
        self.notify.notify_one();
        inserted
    }

    /// Take every queued wallet, in enqueue order
    pub(crate) fn drain(&self) -> Vec<Wallet> {
        let mut state = self.state.lock();
        state.members.clear();
        std::mem::take(&mut state.wallets)
    }

    /// Put wallets from a failed flush back in front of the queue
    ///
    /// Does not wake the scheduler; the data waits for the next mutation, the
    /// next retry or shutdown.
    pub(crate) fn requeue(&self, wallets: Vec<Wallet>) {
        let mut state = self.state.lock();
        let mut restored = Vec::with_capacity(wallets.len() + state.wallets.len());
        let mut members = HashSet::with_capacity(restored.capacity());
        for wallet in wallets.into_iter().chain(std::mem::take(&mut state.wallets)) {
            if members.insert(wallet.instance_id()) {
                restored.push(wallet);
            }
        }
        state.wallets = restored;
        state.members = members;
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().wallets.len()
    }

    /// Wait until a wallet is pushed
    ///
    /// A push that happens while nobody is waiting is remembered, so the next
    /// call returns immediately.
    pub(crate) async fn notified(&self) {
        self.notify.notified().await
    }
}
