//! SQLite persistence for accounts, tournaments and the wallet ledger.
//!
//! One connection is shared behind a mutex and driven from the blocking pool.
//! Flows that move money run as a single `BEGIN IMMEDIATE` transaction and
//! guard every invariant with a conditional update, so a failed step rolls
//! back the whole flow.

use anyhow::Context;
use apnasquad_types::Amount;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;

mod dashboard;
mod ledger;
mod registrations;
mod tournaments;
mod users;

pub use dashboard::{DashboardSnapshot, MonthlyRevenue, RecentTournament};
pub use ledger::{
    DepositOutcome, LedgerError, Settlement, WithdrawalContact, WithdrawalFilter,
    WithdrawalUpdate, WithdrawalWithUser,
};
pub use registrations::{JoinError, JoinTeamError, JoinedTeam, TeamMember, TeamView};
pub use tournaments::{NewTournament, PatchOutcome, TournamentFilter};
pub use users::{NewUser, UserFilter};

#[cfg(test)]
mod tests;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store connection poisoned")]
    Poisoned,
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// True when the statement failed a UNIQUE, CHECK or foreign key constraint.
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation
        )
    }
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("open store db")?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )
        .context("configure store db")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory store")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("set store busy timeout")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .context("enable foreign keys")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| E::from(StoreError::Poisoned))?;
            f(&mut guard)
        })
        .await
        .map_err(|err| E::from(StoreError::Join(err)))?
    }
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
             id TEXT PRIMARY KEY,
             name TEXT NOT NULL,
             email TEXT NOT NULL UNIQUE,
             password_hash TEXT NOT NULL,
             bgmi_id TEXT NOT NULL DEFAULT '',
             phone TEXT NOT NULL DEFAULT '',
             upi_id TEXT NOT NULL DEFAULT '',
             upi_name TEXT NOT NULL DEFAULT '',
             team_name TEXT NOT NULL DEFAULT '',
             avatar TEXT NOT NULL DEFAULT '',
             file_id TEXT NOT NULL DEFAULT '',
             role TEXT NOT NULL DEFAULT 'user',
             balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
             bonus INTEGER NOT NULL DEFAULT 0 CHECK (bonus >= 0),
             referral_code TEXT NOT NULL UNIQUE,
             referred_by TEXT REFERENCES users(id) ON DELETE SET NULL,
             refresh_token TEXT,
             created_at INTEGER NOT NULL,
             updated_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS tournaments (
             id TEXT PRIMARY KEY,
             title TEXT NOT NULL,
             mode TEXT NOT NULL,
             entry_fee INTEGER NOT NULL CHECK (entry_fee = 0 OR entry_fee >= 100),
             prize_pool INTEGER NOT NULL CHECK (prize_pool > 0),
             total_spots INTEGER NOT NULL,
             joined_spots INTEGER NOT NULL DEFAULT 0,
             match_time INTEGER NOT NULL,
             map TEXT NOT NULL,
             room_id TEXT NOT NULL DEFAULT '',
             password TEXT NOT NULL DEFAULT '',
             is_active INTEGER NOT NULL DEFAULT 1,
             is_completed INTEGER NOT NULL DEFAULT 0,
             publish INTEGER NOT NULL DEFAULT 1,
             status TEXT NOT NULL DEFAULT 'live',
             prize_distribution TEXT NOT NULL,
             created_by TEXT REFERENCES users(id) ON DELETE SET NULL,
             created_at INTEGER NOT NULL,
             updated_at INTEGER NOT NULL,
             CHECK (joined_spots >= 0 AND joined_spots <= total_spots)
         );
         CREATE INDEX IF NOT EXISTS tournaments_match_time ON tournaments(match_time);
         CREATE INDEX IF NOT EXISTS tournaments_created_at ON tournaments(created_at);
         CREATE TABLE IF NOT EXISTS registrations (
             id TEXT PRIMARY KEY,
             tournament_id TEXT NOT NULL REFERENCES tournaments(id) ON DELETE CASCADE,
             mode TEXT NOT NULL,
             team_name TEXT NOT NULL DEFAULT '',
             slot INTEGER NOT NULL,
             team_id INTEGER NOT NULL UNIQUE,
             team_password INTEGER NOT NULL,
             status TEXT NOT NULL,
             payment TEXT NOT NULL,
             created_at INTEGER NOT NULL,
             updated_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS registrations_tournament ON registrations(tournament_id);
         CREATE TABLE IF NOT EXISTS registration_players (
             registration_id TEXT NOT NULL REFERENCES registrations(id) ON DELETE CASCADE,
             tournament_id TEXT NOT NULL REFERENCES tournaments(id) ON DELETE CASCADE,
             user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
             is_captain INTEGER NOT NULL DEFAULT 0,
             joined_at INTEGER NOT NULL,
             PRIMARY KEY (registration_id, user_id),
             UNIQUE (tournament_id, user_id)
         );
         CREATE INDEX IF NOT EXISTS registration_players_user ON registration_players(user_id);
         -- Ledger tables keep their rows after the account is deleted.
         CREATE TABLE IF NOT EXISTS transactions (
             id TEXT PRIMARY KEY,
             user_id TEXT NOT NULL,
             kind TEXT NOT NULL,
             amount INTEGER NOT NULL CHECK (amount >= 100),
             status TEXT NOT NULL,
             method TEXT NOT NULL,
             tournament_id TEXT REFERENCES tournaments(id) ON DELETE SET NULL,
             transaction_id TEXT NOT NULL,
             order_id TEXT,
             description TEXT NOT NULL DEFAULT '',
             bonus_used INTEGER NOT NULL DEFAULT 0,
             created_at INTEGER NOT NULL,
             updated_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS transactions_user ON transactions(user_id, created_at);
         CREATE INDEX IF NOT EXISTS transactions_reference ON transactions(transaction_id);
         CREATE INDEX IF NOT EXISTS transactions_order ON transactions(order_id);
         CREATE TABLE IF NOT EXISTS orders (
             id TEXT PRIMARY KEY,
             order_id TEXT NOT NULL UNIQUE,
             user_id TEXT NOT NULL,
             amount INTEGER NOT NULL CHECK (amount >= 100),
             status TEXT NOT NULL,
             created_at INTEGER NOT NULL,
             updated_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS withdrawals (
             id TEXT PRIMARY KEY,
             user_id TEXT NOT NULL,
             amount INTEGER NOT NULL CHECK (amount >= 100),
             status TEXT NOT NULL,
             withdrawal_method TEXT NOT NULL,
             transaction_id TEXT NOT NULL,
             created_at INTEGER NOT NULL,
             updated_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS withdrawals_user ON withdrawals(user_id);
         CREATE INDEX IF NOT EXISTS withdrawals_reference ON withdrawals(transaction_id);
         CREATE INDEX IF NOT EXISTS withdrawals_created_at ON withdrawals(created_at);",
    )
    .context("init store schema")?;
    Ok(())
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn to_ms(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn column_time(row: &rusqlite::Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(column)?;
    Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {ms}").into(),
        )
    })
}

pub(crate) fn column_amount(row: &rusqlite::Row<'_>, column: &str) -> rusqlite::Result<Amount> {
    row.get::<_, i64>(column).map(Amount::from_paise)
}

/// Reads a text column holding an enum's wire string.
pub(crate) fn column_enum<T>(row: &rusqlite::Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(column)?;
    raw.parse().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })
}

/// Runs `f` inside a `BEGIN IMMEDIATE` transaction; any error rolls back.
pub(crate) fn immediate<T, E, F>(conn: &mut Connection, f: F) -> Result<T, E>
where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, E>,
    E: From<StoreError>,
{
    let tx = conn
        .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
        .map_err(|err| E::from(StoreError::from(err)))?;
    let value = f(&tx)?;
    tx.commit().map_err(|err| E::from(StoreError::from(err)))?;
    Ok(value)
}
