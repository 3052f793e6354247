//! Export, import and reset through the bank, across backends

use rstest::rstest;
use std::sync::Arc;
use tempfile::tempdir;
use wallet_ledger::io::{read_snapshot_file, write_snapshot_file, SnapshotEncoding};
use wallet_ledger::{
    Balance, Bank, BankConfig, IdentityCodec, IdentityFormat, IdentityKey, ImportConfirmation,
    LedgerError, MemoryStore, SledStore, Snapshot, SqlStore, StoreBackend,
};

const PHRASE: &str = "I understand that this wipes all ledger data";

#[derive(Debug, Clone, Copy)]
enum Backend {
    Memory,
    Sled,
    Sqlite,
}

async fn bank(backend: Backend) -> Bank {
    let store: Arc<dyn StoreBackend> = match backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        Backend::Sled => Arc::new(SledStore::temporary().unwrap()),
        Backend::Sqlite => Arc::new(SqlStore::connect("sqlite::memory:").await.unwrap()),
    };
    Bank::new(
        store,
        BankConfig::default(),
        IdentityCodec::new(IdentityFormat::Teamspeak),
    )
}

fn id(bank: &Bank, n: u32) -> IdentityKey {
    bank.resolve(format!("user{:023}=", n).as_str()).unwrap()
}

fn confirm() -> ImportConfirmation {
    ImportConfirmation::from_phrase(PHRASE).unwrap()
}

/// Populate a bank and return its export
async fn populated(bank: &Bank) -> Snapshot {
    let (alice, bob) = (id(bank, 1), id(bank, 2));
    let huge: Balance = "98765432109876543210".parse().unwrap();

    bank.get_wallet(&alice)
        .await
        .unwrap()
        .add_balance(huge, "Added via Admin Command")
        .unwrap();
    bank.get_wallet(&bob)
        .await
        .unwrap()
        .set_balance(Balance::from(-15), "Set via Admin Command")
        .unwrap();
    bank.get_wallet(&alice)
        .await
        .unwrap()
        .remove_balance(Balance::from(10), "Removed by Admin Command")
        .unwrap();
    bank.update_nickname(&bob, "Bob").await.unwrap();

    bank.export_snapshot().await.unwrap()
}

#[rstest]
#[tokio::test]
async fn test_snapshot_moves_between_backends(
    #[values(Backend::Memory, Backend::Sled, Backend::Sqlite)] source: Backend,
    #[values(Backend::Memory, Backend::Sled, Backend::Sqlite)] target: Backend,
) {
    let from = bank(source).await;
    let snapshot = populated(&from).await;
    assert_eq!(snapshot.balances.len(), 2);
    assert_eq!(snapshot.history_len(), 3);

    let to = bank(target).await;
    to.import_snapshot(&snapshot, confirm()).await.unwrap();
    let copy = to.export_snapshot().await.unwrap();

    assert_eq!(copy.balances, snapshot.balances);
    assert_eq!(copy.history, snapshot.history);
    assert_eq!(copy.nicknames, snapshot.nicknames);

    let alice = id(&to, 1);
    assert_eq!(
        to.get_wallet(&alice).await.unwrap().balance().to_string(),
        "98765432109876543200"
    );

    from.shutdown().await.unwrap();
    to.shutdown().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn test_export_reset_import_restores_store(
    #[values(Backend::Memory, Backend::Sled, Backend::Sqlite)] backend: Backend,
) {
    let bank = bank(backend).await;
    let snapshot = populated(&bank).await;

    bank.reset(confirm()).await.unwrap();
    let empty = bank.export_snapshot().await.unwrap();
    assert!(empty.balances.is_empty());
    assert_eq!(empty.history_len(), 0);
    assert!(empty.nicknames.is_empty());

    bank.import_snapshot(&snapshot, confirm()).await.unwrap();
    let restored = bank.export_snapshot().await.unwrap();
    assert_eq!(restored.balances, snapshot.balances);
    assert_eq!(restored.history, snapshot.history);

    bank.shutdown().await.unwrap();
}

#[rstest]
#[case::json(SnapshotEncoding::Json)]
#[case::base64(SnapshotEncoding::Base64)]
#[tokio::test]
async fn test_snapshot_file_round_trip(#[case] encoding: SnapshotEncoding) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("backup.txt");
    let source = bank(Backend::Memory).await;
    let snapshot = populated(&source).await;

    write_snapshot_file(&path, &snapshot, encoding).unwrap();
    let read = read_snapshot_file(&path).unwrap();
    assert_eq!(read, snapshot);

    let target = bank(Backend::Sled).await;
    target.import_snapshot(&read, confirm()).await.unwrap();
    let bob = id(&target, 2);
    assert_eq!(target.get_nickname(&bob).await.unwrap(), "Bob");
}

#[tokio::test]
async fn test_import_drops_cached_wallets() {
    let bank = bank(Backend::Memory).await;
    let alice = id(&bank, 1);
    let snapshot = populated(&bank).await;

    bank.get_wallet(&alice)
        .await
        .unwrap()
        .add_balance(Balance::from(1_000), "after export")
        .unwrap();
    assert!(bank.cached() > 0);

    bank.import_snapshot(&snapshot, confirm()).await.unwrap();

    assert_eq!(bank.cached(), 0);
    let wallet = bank.get_wallet(&alice).await.unwrap();
    assert_eq!(wallet.balance(), snapshot.balances[&alice]);
    let history = wallet.get_history(10).await.unwrap();
    assert!(history.iter().all(|entry| entry.reason != "after export"));
}

#[tokio::test]
async fn test_import_rejects_foreign_identities() {
    let source = bank(Backend::Memory).await;
    let snapshot = populated(&source).await;

    let discord = Bank::new(
        Arc::new(MemoryStore::new()),
        BankConfig::default(),
        IdentityCodec::new(IdentityFormat::Discord),
    );
    let marker = discord.resolve("123456789012345678").unwrap();
    discord.update_nickname(&marker, "kept").await.unwrap();

    let result = discord.import_snapshot(&snapshot, confirm()).await;
    assert!(matches!(result, Err(LedgerError::InvalidIdentity { .. })));

    // Validation runs before the store is wiped.
    assert_eq!(discord.get_nickname(&marker).await.unwrap(), "kept");
}

#[test]
fn test_wrong_phrase_is_rejected() {
    let result = ImportConfirmation::from_phrase("yes");
    assert!(matches!(result, Err(LedgerError::Config { .. })));
}
