//! Database module for SQLite persistence.
//!
//! The same engine backs two roles: the embedded on-device store (source of
//! truth while offline) and the backend database behind the REST service.

mod repository;

pub use repository::*;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Transaction;
use std::path::Path;
use std::str::FromStr;

use crate::errors::AppError;
use crate::models::EntityKind;

/// Which schema a database file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    /// On-device store with lifecycle bookkeeping.
    Local,
    /// Backend store; the backend is authoritative so no lifecycle columns.
    Remote,
}

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path, role: StoreRole) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool, role).await?;

    tracing::debug!("Database ready at {:?} ({:?})", db_path, role);
    Ok(pool)
}

/// Run database migrations: one table per entity kind.
async fn run_migrations(pool: &SqlitePool, role: StoreRole) -> Result<(), sqlx::Error> {
    for kind in EntityKind::ALL {
        let table = kind.table();
        let ddl = match role {
            StoreRole::Local => format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    parent_id TEXT,
                    depth INTEGER NOT NULL DEFAULT 0,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    sync_status TEXT NOT NULL DEFAULT 'new',
                    last_synced_at TEXT,
                    data TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_{table}_owner ON {table}(owner_id);
                CREATE INDEX IF NOT EXISTS idx_{table}_owner_status ON {table}(owner_id, sync_status);
                CREATE INDEX IF NOT EXISTS idx_{table}_owner_parent ON {table}(owner_id, parent_id);
                "#
            ),
            StoreRole::Remote => format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    client_id TEXT,
                    parent_id TEXT,
                    depth INTEGER NOT NULL DEFAULT 0,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    data TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_{table}_owner ON {table}(owner_id);
                CREATE INDEX IF NOT EXISTS idx_{table}_owner_parent ON {table}(owner_id, parent_id);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_owner_client ON {table}(owner_id, client_id);
                "#
            ),
        };

        sqlx::query(&ddl).execute(pool).await?;
    }

    Ok(())
}

/// Begin a transaction that holds the write lock from its first statement.
///
/// A deferred transaction that reads and then writes gets `SQLITE_BUSY` as
/// soon as another connection commits in between, and `busy_timeout` does not
/// retry that upgrade. `BEGIN IMMEDIATE` waits for the lock instead.
pub(crate) async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    pool.begin_with("BEGIN IMMEDIATE").await
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort lexically.
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Database(format!("Bad timestamp '{}': {}", raw, e)))
}
