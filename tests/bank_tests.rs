//! Write-back behaviour of the bank
//!
//! These tests run on a paused tokio clock, so timer-driven flushes happen at
//! exact virtual instants. The store is wrapped to record every write call and
//! to fail on demand.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use wallet_ledger::{
    Balance, BalanceRecord, Bank, BankConfig, FlushReport, HistoryEntry, IdentityCodec,
    IdentityFormat, IdentityKey, LedgerError, LedgerResult, MemoryStore, RetryPolicy,
    StoreBackend,
};

/// Memory store that records writes and can be switched to failing
#[derive(Default)]
struct RecordingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    failing: AtomicBool,
    balance_writes: Mutex<Vec<(Instant, Vec<BalanceRecord>)>>,
    history_writes: Mutex<Vec<Vec<HistoryEntry>>>,
    history_reads: AtomicUsize,
    history_hold: Mutex<Option<Arc<Notify>>>,
}

impl RecordingStore {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> LedgerResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(LedgerError::backend_failure("recording", "switched off"))
        } else {
            Ok(())
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn balance_writes(&self) -> Vec<(Instant, Vec<BalanceRecord>)> {
        self.balance_writes.lock().clone()
    }

    fn history_writes(&self) -> usize {
        self.history_writes.lock().len()
    }

    fn history_reads(&self) -> usize {
        self.history_reads.load(Ordering::SeqCst)
    }

    /// Make the next history read fetch its result, then wait for the
    /// returned notify before handing it back
    fn hold_next_history_read(&self) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.history_hold.lock() = Some(release.clone());
        release
    }

    async fn until_history_read(&self) {
        while self.history_reads() == 0 {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl StoreBackend for RecordingStore {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn get_balances(
        &self,
        identities: &[IdentityKey],
    ) -> LedgerResult<HashMap<IdentityKey, Balance>> {
        self.check()?;
        self.inner.get_balances(identities).await
    }

    async fn set_balances(&self, records: &[BalanceRecord]) -> LedgerResult<()> {
        self.check()?;
        self.balance_writes
            .lock()
            .push((Instant::now(), records.to_vec()));
        self.inner.set_balances(records).await
    }

    async fn add_history(&self, entries: &[HistoryEntry]) -> LedgerResult<()> {
        self.check()?;
        self.history_writes.lock().push(entries.to_vec());
        self.inner.add_history(entries).await
    }

    async fn get_history(
        &self,
        identity: &IdentityKey,
        limit: usize,
    ) -> LedgerResult<Vec<HistoryEntry>> {
        self.check()?;
        self.history_reads.fetch_add(1, Ordering::SeqCst);
        let history = self.inner.get_history(identity, limit).await;
        let hold = self.history_hold.lock().take();
        if let Some(release) = hold {
            release.notified().await;
        }
        history
    }

    async fn get_all_balances(&self) -> LedgerResult<BTreeMap<IdentityKey, Balance>> {
        self.check()?;
        self.inner.get_all_balances().await
    }

    async fn get_all_history(&self) -> LedgerResult<BTreeMap<IdentityKey, Vec<HistoryEntry>>> {
        self.check()?;
        self.inner.get_all_history().await
    }

    async fn get_all_nicknames(&self) -> LedgerResult<BTreeMap<IdentityKey, String>> {
        self.check()?;
        self.inner.get_all_nicknames().await
    }

    async fn update_nicknames(&self, nicknames: &HashMap<IdentityKey, String>) -> LedgerResult<()> {
        self.check()?;
        self.inner.update_nicknames(nicknames).await
    }

    async fn get_nicknames(
        &self,
        identities: &[IdentityKey],
    ) -> LedgerResult<HashMap<IdentityKey, String>> {
        self.check()?;
        self.inner.get_nicknames(identities).await
    }

    async fn get_top_list(&self, offset: usize, limit: usize) -> LedgerResult<Vec<BalanceRecord>> {
        self.check()?;
        self.inner.get_top_list(offset, limit).await
    }

    async fn reset(&self) -> LedgerResult<()> {
        self.check()?;
        self.inner.reset().await
    }
}

fn config(flush_interval_ms: u64, max_flush_wait_ms: u64, max_retries: u32) -> BankConfig {
    BankConfig::new(
        flush_interval_ms,
        max_flush_wait_ms,
        500,
        RetryPolicy {
            max_retries,
            base_backoff_ms: 100,
            max_backoff_ms: 1000,
        },
    )
}

fn setup(config: BankConfig) -> (Bank, Arc<RecordingStore>) {
    let store = Arc::new(RecordingStore::default());
    let bank = Bank::new(
        store.clone(),
        config,
        IdentityCodec::new(IdentityFormat::Teamspeak),
    );
    (bank, store)
}

fn id(bank: &Bank, n: u32) -> IdentityKey {
    bank.resolve(format!("user{:023}=", n).as_str()).unwrap()
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_empty_flush_makes_no_store_call() {
    let (bank, store) = setup(config(1000, 10_000, 3));

    let report = bank.flush_queue().await.unwrap();

    assert_eq!(report, FlushReport::default());
    assert_eq!(store.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_saves_inside_interval_coalesce_into_one_flush() {
    let (bank, store) = setup(config(1000, 10_000, 3));
    let mut wallets = Vec::new();
    for n in 0..5 {
        wallets.push(bank.get_wallet(&id(&bank, n)).await.unwrap());
    }

    for (n, wallet) in wallets.iter().enumerate() {
        wallet.add_balance(Balance::from(n as i64 + 1), "credit").unwrap();
        wallet.add_balance(Balance::from(1), "bonus").unwrap();
        sleep_ms(100).await;
    }
    assert_eq!(bank.queued(), 5);

    // Last save at t=400ms, so the quiet period ends at t=1400ms.
    sleep_ms(850).await;
    assert!(store.balance_writes().is_empty());

    sleep_ms(100).await;
    let writes = store.balance_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].1.len(), 5);
    assert_eq!(store.history_writes(), 1);
    assert_eq!(bank.queued(), 0);

    let stored = store.inner.get_all_history().await.unwrap();
    assert_eq!(stored.values().map(Vec::len).sum::<usize>(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_max_wait_flushes_under_continuous_activity() {
    let (bank, store) = setup(config(1000, 3000, 3));
    let wallet = bank.get_wallet(&id(&bank, 1)).await.unwrap();
    let start = Instant::now();

    // A save every 500ms keeps the quiet period from ever elapsing.
    for _ in 0..10 {
        wallet.add_balance(Balance::from(1), "tick").unwrap();
        sleep_ms(500).await;
    }

    let writes = store.balance_writes();
    assert!(!writes.is_empty());
    let first = writes[0].0 - start;
    assert!(
        first >= Duration::from_millis(3000) && first < Duration::from_millis(3050),
        "first flush after {:?}",
        first
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_flush_requeues_without_losing_history() {
    let (bank, store) = setup(config(60_000, 60_000, 0));
    let alice = id(&bank, 1);
    let wallet = bank.get_wallet(&alice).await.unwrap();
    wallet.add_balance(Balance::from(10), "one").unwrap();
    wallet.add_balance(Balance::from(20), "two").unwrap();

    store.set_failing(true);
    let result = bank.flush_queue().await;
    assert!(matches!(result, Err(LedgerError::BackendFailure { .. })));
    assert_eq!(bank.queued(), 1);
    assert_eq!(wallet.pending_len(), 2);

    // A mutation during the outage lands behind the restored entries.
    wallet.remove_balance(Balance::from(5), "three").unwrap();
    assert_eq!(bank.queued(), 1);

    store.set_failing(false);
    let report = bank.flush_queue().await.unwrap();
    assert_eq!(report, FlushReport { wallets: 1, entries: 3 });

    let history = store.inner.get_history(&alice, 10).await.unwrap();
    let reasons: Vec<&str> = history.iter().map(|e| e.reason.as_str()).collect();
    assert_eq!(reasons, vec!["one", "two", "three"]);
    let balances = store.inner.get_balances(&[alice.clone()]).await.unwrap();
    assert_eq!(balances[&alice], Balance::from(25));
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_retries_with_backoff() {
    let (bank, store) = setup(config(1000, 10_000, 3));
    let alice = id(&bank, 1);
    bank.get_wallet(&alice)
        .await
        .unwrap()
        .add_balance(Balance::from(7), "retry me")
        .unwrap();

    store.set_failing(true);
    // First attempt at t=1000ms fails, the retry is scheduled 100ms later.
    sleep_ms(1050).await;
    assert!(store.balance_writes().is_empty());
    assert_eq!(bank.queued(), 1);

    store.set_failing(false);
    sleep_ms(100).await;

    assert_eq!(bank.queued(), 0);
    let history = store.inner.get_history(&alice, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, "retry me");
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_keep_data_until_shutdown() {
    let (bank, store) = setup(config(1000, 10_000, 2));
    let alice = id(&bank, 1);
    let wallet = bank.get_wallet(&alice).await.unwrap();
    wallet.add_balance(Balance::from(3), "kept").unwrap();

    store.set_failing(true);
    sleep_ms(10_000).await;
    assert_eq!(bank.queued(), 1);
    assert_eq!(wallet.pending_len(), 1);

    store.set_failing(false);
    let report = bank.shutdown().await.unwrap();
    assert_eq!(report, FlushReport { wallets: 1, entries: 1 });
    let balances = store.inner.get_balances(&[alice.clone()]).await.unwrap();
    assert_eq!(balances[&alice], Balance::from(3));
}

#[tokio::test(start_paused = true)]
async fn test_write_through_flushes_every_mutation() {
    let (bank, store) = setup(config(0, 0, 3));
    let alice = id(&bank, 1);

    bank.get_wallet(&alice)
        .await
        .unwrap()
        .add_balance(Balance::from(5), "a")
        .unwrap();
    bank.get_wallet(&alice)
        .await
        .unwrap()
        .add_balance(Balance::from(5), "b")
        .unwrap();
    assert_eq!(bank.cached(), 0);
    assert_eq!(
        bank.get_balances(&[alice.clone()]).await.unwrap()[&alice],
        Balance::from(10)
    );

    bank.shutdown().await.unwrap();

    assert_eq!(store.balance_writes().len(), 2);
    let balances = store.inner.get_balances(&[alice.clone()]).await.unwrap();
    assert_eq!(balances[&alice], Balance::from(10));
    let history = store.inner.get_history(&alice, 10).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_set_balance_persists_value_and_difference() {
    let (bank, store) = setup(config(1000, 10_000, 3));
    let alice = id(&bank, 1);
    store
        .inner
        .set_balances(&[BalanceRecord::new(alice.clone(), Balance::from(120))])
        .await
        .unwrap();

    bank.get_wallet(&alice)
        .await
        .unwrap()
        .set_balance(Balance::from(500), "Set via Admin Command")
        .unwrap();
    bank.flush_queue().await.unwrap();

    let balances = bank.get_balances(&[alice.clone()]).await.unwrap();
    assert_eq!(balances[&alice].to_string(), "500");
    let persisted = store.inner.get_balances(&[alice.clone()]).await.unwrap();
    assert_eq!(persisted[&alice].to_string(), "500");
    let history = store.inner.get_history(&alice, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].delta, Balance::from(380));
    assert_eq!(history[0].reason, "Set via Admin Command");
}

#[tokio::test(start_paused = true)]
async fn test_stalled_history_read_does_not_block_flushes() {
    let (bank, store) = setup(config(1000, 10_000, 3));
    let (alice, bob) = (id(&bank, 1), id(&bank, 2));
    let alice_wallet = bank.get_wallet(&alice).await.unwrap();
    let bob_wallet = bank.get_wallet(&bob).await.unwrap();

    // Never released: the read stays suspended for the rest of the test.
    let _release = store.hold_next_history_read();
    let reader = tokio::spawn(async move { alice_wallet.get_history(10).await });
    store.until_history_read().await;

    bob_wallet.add_balance(Balance::from(5), "meanwhile").unwrap();
    let flushed = tokio::time::timeout(Duration::from_secs(2), bank.flush_queue()).await;

    assert_eq!(
        flushed.unwrap().unwrap(),
        FlushReport {
            wallets: 1,
            entries: 1
        }
    );
    let balances = store.inner.get_balances(&[bob.clone()]).await.unwrap();
    assert_eq!(balances[&bob], Balance::from(5));
    assert!(!reader.is_finished());
    reader.abort();
}

#[tokio::test(start_paused = true)]
async fn test_history_read_racing_a_flush_sees_each_entry_once() {
    let (bank, store) = setup(config(1000, 10_000, 3));
    let alice = id(&bank, 1);
    let wallet = bank.get_wallet(&alice).await.unwrap();
    wallet
        .add_balance(Balance::from(1), "first")
        .unwrap()
        .add_balance(Balance::from(2), "second")
        .unwrap();

    // The read fetches an empty store, then a flush persists both entries
    // before the read resumes.
    let release = store.hold_next_history_read();
    let reader = tokio::spawn({
        let wallet = wallet.clone();
        async move { wallet.get_history(10).await }
    });
    store.until_history_read().await;
    bank.flush_queue().await.unwrap();
    release.notify_one();

    let history = reader.await.unwrap().unwrap();
    let deltas: Vec<String> = history.iter().map(|e| e.delta.to_string()).collect();
    assert_eq!(deltas, vec!["1", "2"]);
    assert_eq!(store.history_reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sums_beyond_float_precision_are_exact() {
    let (bank, store) = setup(config(1000, 10_000, 3));
    let alice = id(&bank, 1);
    let wallet = bank.get_wallet(&alice).await.unwrap();

    let max_safe: Balance = "9007199254740991".parse().unwrap();
    wallet.set_balance(max_safe, "start").unwrap();
    wallet.add_balance(Balance::from(2), "over").unwrap();
    assert_eq!(wallet.balance().to_string(), "9007199254740993");

    let huge: Balance = "123456789012345678901234567890".parse().unwrap();
    wallet.add_balance(huge, "huge").unwrap();
    assert_eq!(
        wallet.balance().to_string(),
        "123456789012354686100489308883"
    );

    bank.flush_queue().await.unwrap();
    let stored = store.inner.get_balances(&[alice.clone()]).await.unwrap();
    assert_eq!(stored[&alice], wallet.balance());
}

#[tokio::test(start_paused = true)]
async fn test_history_merges_flushed_and_pending() {
    let (bank, _) = setup(config(1000, 10_000, 3));
    let alice = id(&bank, 1);
    let wallet = bank.get_wallet(&alice).await.unwrap();

    for i in 1..=3 {
        wallet.add_balance(Balance::from(i), "flushed").unwrap();
    }
    bank.flush_queue().await.unwrap();
    for i in 4..=5 {
        wallet.add_balance(Balance::from(i), "pending").unwrap();
    }

    let history = bank.get_history(&alice, 4).await.unwrap();
    let deltas: Vec<String> = history.iter().map(|e| e.delta.to_string()).collect();
    assert_eq!(deltas, vec!["2", "3", "4", "5"]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_get_wallet_yields_one_instance() {
    let (bank, _) = setup(config(1000, 10_000, 3));
    let alice = id(&bank, 1);

    let (a, b) = tokio::join!(bank.get_wallet(&alice), bank.get_wallet(&alice));
    let (a, b) = (a.unwrap(), b.unwrap());
    a.add_balance(Balance::from(4), "via a").unwrap();

    assert_eq!(b.balance(), Balance::from(4));
    assert_eq!(bank.cached(), 1);
}
