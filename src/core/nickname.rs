//! Coalesced nickname updates
//!
//! Chat front-ends report display names far more often than they change. The
//! [`NicknameCoalescer`] keeps a pending map of identity to actor handle and
//! writes it in one `update_nicknames` call once no new identity has arrived
//! for the quiet period.
//!
//! Display names are read from the handles when the batch is written, not when
//! they are pushed, so a rename between push and write is picked up.

use crate::store::StoreBackend;
use crate::types::{ActorHandle, IdentityCodec, IdentityInput, IdentityKey, LedgerResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct CoalescerInner {
    store: Arc<dyn StoreBackend>,
    codec: IdentityCodec,
    quiet: Duration,
    pending: Mutex<HashMap<IdentityKey, Arc<dyn ActorHandle>>>,
    notify: Notify,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Debounced batch writer for display names
#[derive(Clone)]
pub struct NicknameCoalescer {
    inner: Arc<CoalescerInner>,
}

impl NicknameCoalescer {
    /// Create a coalescer and start its timer task
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `store` - Backend receiving the batched writes
    /// * `codec` - Codec resolving handle identities
    /// * `quiet` - Quiet period before a batch is written
    /// * `cancel` - Token stopping the timer task
    pub fn new(
        store: Arc<dyn StoreBackend>,
        codec: IdentityCodec,
        quiet: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let coalescer = Self {
            inner: Arc::new(CoalescerInner {
                store,
                codec,
                quiet,
                pending: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                cancel,
                task: Mutex::new(None),
            }),
        };
        let handle = tokio::spawn(coalescer.clone().run());
        *coalescer.inner.task.lock() = Some(handle);
        coalescer
    }

    /// Queue a handle for the next batch
    ///
    /// Returns `false` if its identity was already pending; the countdown is
    /// only restarted for new identities.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentity` if the handle exposes no valid identity.
    pub fn push(&self, handle: Arc<dyn ActorHandle>) -> LedgerResult<bool> {
        let identity = self.inner.codec.resolve(IdentityInput::Handle(handle.as_ref()))?;
        let inserted = {
            let mut pending = self.inner.pending.lock();
            if pending.contains_key(&identity) {
                false
            } else {
                pending.insert(identity, handle);
                true
            }
        };
        if inserted {
            self.inner.notify.notify_one();
        }
        Ok(inserted)
    }

    /// Queue many handles at once, e.g. the client list at startup
    ///
    /// Handles without a valid identity are skipped with a warning.
    ///
    /// # Returns
    ///
    /// The number of identities that were newly queued.
    pub fn push_all<I>(&self, handles: I) -> usize
    where
        I: IntoIterator<Item = Arc<dyn ActorHandle>>,
    {
        let mut queued = 0;
        for handle in handles {
            match self.push(handle) {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "skipping nickname handle"),
            }
        }
        queued
    }

    /// Write one display name right away, bypassing the queue
    pub async fn update_now(&self, handle: &dyn ActorHandle) -> LedgerResult<()> {
        let identity = self.inner.codec.resolve(IdentityInput::Handle(handle))?;
        let update = HashMap::from([(identity, handle.display_name())]);
        self.inner.store.update_nicknames(&update).await
    }

    /// Number of identities waiting for the next batch
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Write every pending name now
    ///
    /// On failure the whole batch is queued again and retried after the next
    /// quiet period.
    ///
    /// # Returns
    ///
    /// The number of names written.
    pub async fn flush(&self) -> LedgerResult<usize> {
        let batch = std::mem::take(&mut *self.inner.pending.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        let names: HashMap<IdentityKey, String> = batch
            .iter()
            .map(|(identity, handle)| (identity.clone(), handle.display_name()))
            .collect();

        match self.inner.store.update_nicknames(&names).await {
            Ok(()) => {
                tracing::debug!(nicknames = names.len(), "nicknames written");
                Ok(names.len())
            }
            Err(e) => {
                tracing::error!(error = %e, nicknames = batch.len(), "updating nicknames failed, resubmitting");
                self.resubmit(batch);
                Err(e)
            }
        }
    }

    fn resubmit(&self, batch: HashMap<IdentityKey, Arc<dyn ActorHandle>>) {
        {
            let mut pending = self.inner.pending.lock();
            for (identity, handle) in batch {
                pending.entry(identity).or_insert(handle);
            }
        }
        self.inner.notify.notify_one();
    }

    /// Stop the timer task and write whatever is still pending
    pub async fn shutdown(&self) -> LedgerResult<usize> {
        self.inner.cancel.cancel();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "nickname task panicked");
            }
        }
        self.flush().await
    }

    async fn run(self) {
        let cancel = self.inner.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.inner.notify.notified() => {}
            }

            // Every new identity restarts the countdown.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = self.inner.notify.notified() => continue,
                    _ = tokio::time::sleep(self.inner.quiet) => break,
                }
            }

            // Errors are logged and resubmitted inside flush.
            let _ = self.flush().await;
        }
    }
}
