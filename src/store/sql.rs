//! Relational store backend on SQLite via sqlx
//!
//! # Schema
//!
//! ```text
//! balances(uid TEXT PRIMARY KEY, balance INTEGER NULL, nickname TEXT NULL)
//! history(id INTEGER PRIMARY KEY AUTOINCREMENT, uid TEXT, "change" INTEGER,
//!         reason TEXT CHECK (length(reason) <= 255), date INTEGER)
//! ```
//!
//! Nicknames share the `balances` table. A row whose `balance` is NULL carries
//! only a nickname and is skipped by every balance query.
//!
//! Balances are stored as 64-bit integers; values outside that range are
//! rejected with `BackendFailure` instead of being truncated.

use super::{last_write_wins, StoreBackend};
use crate::types::{Balance, BalanceRecord, HistoryEntry, IdentityKey, LedgerError, LedgerResult};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

const BACKEND: &str = "sqlite";

/// Upper bound on bind parameters per statement
const MAX_BINDS: usize = 900;

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS balances (
        uid TEXT PRIMARY KEY NOT NULL,
        balance INTEGER NULL,
        nickname TEXT NULL
    )",
    "CREATE INDEX IF NOT EXISTS balances_balance ON balances (balance)",
    "CREATE TABLE IF NOT EXISTS history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uid TEXT NOT NULL,
        \"change\" INTEGER NOT NULL,
        reason TEXT NOT NULL CHECK (length(reason) <= 255),
        date INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS history_uid_date ON history (uid, date)",
];

/// SQLite store backend
///
/// Built either with [`SqlStore::connect`], which bootstraps the schema before
/// returning, or with [`SqlStore::lazy`] followed by [`SqlStore::bootstrap`].
/// Until the bootstrap completes every operation fails with `NotConnected`.
#[derive(Debug)]
pub struct SqlStore {
    pool: SqlitePool,
    ready: AtomicBool,
}

impl SqlStore {
    /// Create a store without touching the database
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g. `sqlite://ledger.db` or `sqlite::memory:`
    ///
    /// # Returns
    ///
    /// A store whose pool connects on first use. The schema is not created.
    pub fn lazy(url: &str) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // An in-memory database lives as long as its connection; pin exactly one.
        let pool_options = if url.contains(":memory:") || url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };

        Ok(Self {
            pool: pool_options.connect_lazy_with(options),
            ready: AtomicBool::new(false),
        })
    }

    /// Create a store and bootstrap its schema
    pub async fn connect(url: &str) -> LedgerResult<Self> {
        let store = Self::lazy(url)?;
        store.bootstrap().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist yet
    ///
    /// Idempotent; calling it on an existing database keeps all records.
    pub async fn bootstrap(&self) -> LedgerResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        self.ready.store(true, Ordering::Release);
        tracing::debug!(backend = BACKEND, "schema ready");
        Ok(())
    }

    fn ensure_ready(&self) -> LedgerResult<()> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(LedgerError::not_connected(BACKEND))
        }
    }
}

fn to_column(value: &Balance) -> LedgerResult<i64> {
    value.to_i64().ok_or_else(|| {
        LedgerError::backend_failure(BACKEND, format!("value {} exceeds the 64-bit column range", value))
    })
}

fn push_uid_list<'a>(builder: &mut QueryBuilder<'a, Sqlite>, identities: &[IdentityKey]) {
    builder.push(" uid IN (");
    let mut separated = builder.separated(", ");
    for identity in identities {
        separated.push_bind(identity.as_str().to_owned());
    }
    separated.push_unseparated(")");
}

fn decode_entry((uid, change, reason, date): (String, i64, String, i64)) -> HistoryEntry {
    HistoryEntry {
        identity: IdentityKey::from_trusted(uid),
        delta: Balance::from(change),
        reason,
        timestamp: date,
    }
}

#[async_trait]
impl StoreBackend for SqlStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get_balances(
        &self,
        identities: &[IdentityKey],
    ) -> LedgerResult<HashMap<IdentityKey, Balance>> {
        self.ensure_ready()?;
        let mut balances: HashMap<IdentityKey, Balance> = identities
            .iter()
            .map(|identity| (identity.clone(), Balance::zero()))
            .collect();

        for chunk in identities.chunks(MAX_BINDS) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("SELECT uid, balance FROM balances WHERE balance IS NOT NULL AND");
            push_uid_list(&mut builder, chunk);
            let rows: Vec<(String, i64)> = builder.build_query_as().fetch_all(&self.pool).await?;
            for (uid, balance) in rows {
                balances.insert(IdentityKey::from_trusted(uid), Balance::from(balance));
            }
        }
        Ok(balances)
    }

    async fn set_balances(&self, records: &[BalanceRecord]) -> LedgerResult<()> {
        self.ensure_ready()?;
        if records.is_empty() {
            return Ok(());
        }
        let rows = last_write_wins(records)
            .into_iter()
            .map(|record| Ok((record.identity.as_str().to_owned(), to_column(&record.balance)?)))
            .collect::<LedgerResult<Vec<(String, i64)>>>()?;

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(MAX_BINDS / 2) {
            let mut builder = QueryBuilder::<Sqlite>::new("INSERT INTO balances (uid, balance) ");
            builder.push_values(chunk, |mut row, (uid, balance)| {
                row.push_bind(uid.clone()).push_bind(*balance);
            });
            builder.push(" ON CONFLICT(uid) DO UPDATE SET balance = excluded.balance");
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn add_history(&self, entries: &[HistoryEntry]) -> LedgerResult<()> {
        self.ensure_ready()?;
        if entries.is_empty() {
            return Ok(());
        }
        let rows = entries
            .iter()
            .map(|entry| {
                Ok((
                    entry.identity.as_str().to_owned(),
                    to_column(&entry.delta)?,
                    entry.reason.clone(),
                    entry.timestamp,
                ))
            })
            .collect::<LedgerResult<Vec<(String, i64, String, i64)>>>()?;

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(MAX_BINDS / 4) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("INSERT INTO history (uid, \"change\", reason, date) ");
            builder.push_values(chunk, |mut row, (uid, change, reason, date)| {
                row.push_bind(uid.clone())
                    .push_bind(*change)
                    .push_bind(reason.clone())
                    .push_bind(*date);
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_history(
        &self,
        identity: &IdentityKey,
        limit: usize,
    ) -> LedgerResult<Vec<HistoryEntry>> {
        self.ensure_ready()?;
        let rows: Vec<(String, i64, String, i64)> = sqlx::query_as(
            "SELECT uid, \"change\", reason, date FROM history
             WHERE uid = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(identity.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().rev().map(decode_entry).collect())
    }

    async fn get_all_balances(&self) -> LedgerResult<BTreeMap<IdentityKey, Balance>> {
        self.ensure_ready()?;
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT uid, balance FROM balances WHERE balance IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(uid, balance)| (IdentityKey::from_trusted(uid), Balance::from(balance)))
            .collect())
    }

    async fn get_all_history(&self) -> LedgerResult<BTreeMap<IdentityKey, Vec<HistoryEntry>>> {
        self.ensure_ready()?;
        let rows: Vec<(String, i64, String, i64)> =
            sqlx::query_as("SELECT uid, \"change\", reason, date FROM history ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        let mut history: BTreeMap<IdentityKey, Vec<HistoryEntry>> = BTreeMap::new();
        for row in rows {
            let entry = decode_entry(row);
            history.entry(entry.identity.clone()).or_default().push(entry);
        }
        Ok(history)
    }

    async fn get_all_nicknames(&self) -> LedgerResult<BTreeMap<IdentityKey, String>> {
        self.ensure_ready()?;
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT uid, nickname FROM balances WHERE nickname IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(uid, nickname)| (IdentityKey::from_trusted(uid), nickname))
            .collect())
    }

    async fn update_nicknames(&self, nicknames: &HashMap<IdentityKey, String>) -> LedgerResult<()> {
        self.ensure_ready()?;
        if nicknames.is_empty() {
            return Ok(());
        }
        let rows: Vec<(String, String)> = nicknames
            .iter()
            .map(|(identity, nickname)| (identity.as_str().to_owned(), nickname.clone()))
            .collect();

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(MAX_BINDS / 2) {
            let mut builder = QueryBuilder::<Sqlite>::new("INSERT INTO balances (uid, nickname) ");
            builder.push_values(chunk, |mut row, (uid, nickname)| {
                row.push_bind(uid.clone()).push_bind(nickname.clone());
            });
            builder.push(" ON CONFLICT(uid) DO UPDATE SET nickname = excluded.nickname");
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_nicknames(
        &self,
        identities: &[IdentityKey],
    ) -> LedgerResult<HashMap<IdentityKey, String>> {
        self.ensure_ready()?;
        let mut nicknames: HashMap<IdentityKey, String> = identities
            .iter()
            .map(|identity| (identity.clone(), identity.to_string()))
            .collect();

        for chunk in identities.chunks(MAX_BINDS) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT uid, nickname FROM balances WHERE nickname IS NOT NULL AND",
            );
            push_uid_list(&mut builder, chunk);
            let rows: Vec<(String, String)> = builder.build_query_as().fetch_all(&self.pool).await?;
            for (uid, nickname) in rows {
                nicknames.insert(IdentityKey::from_trusted(uid), nickname);
            }
        }
        Ok(nicknames)
    }

    async fn get_top_list(&self, offset: usize, limit: usize) -> LedgerResult<Vec<BalanceRecord>> {
        self.ensure_ready()?;
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT uid, balance FROM balances WHERE balance IS NOT NULL
             ORDER BY balance DESC, uid ASC LIMIT ? OFFSET ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(uid, balance)| BalanceRecord::new(IdentityKey::from_trusted(uid), Balance::from(balance)))
            .collect())
    }

    async fn reset(&self) -> LedgerResult<()> {
        self.ensure_ready()?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM balances").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM history").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
