//! Outbox schema migrations.
//!
//! The outbox table usually lives inside the application's own database, so
//! applied versions are tracked in a dedicated `outbox_migrations` table
//! rather than a generic `migrations` table the application may already own.

use crate::{OutboxError, OutboxResult};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
///
/// Everything runs in one `BEGIN IMMEDIATE` transaction: the write lock is
/// taken before the version is read, so processes opening the same fresh
/// database at once apply each migration exactly once. Any failure rolls the
/// whole run back.
pub fn run_migrations(conn: &Connection) -> OutboxResult<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS outbox_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version = schema_version(&tx)?;

    if current_version > CURRENT_VERSION {
        return Err(OutboxError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current_version, CURRENT_VERSION
        )));
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running outbox migrations");

    if current_version < 1 {
        migrate_v1_outbox_table(&tx)?;
    }
    if current_version < 2 {
        migrate_v2_sweep_indexes(&tx)?;
    }

    tx.commit()?;
    info!("Outbox migrations complete");
    Ok(())
}

/// Highest applied schema version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> OutboxResult<i32> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM outbox_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> OutboxResult<()> {
    conn.execute(
        "INSERT INTO outbox_migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: outbox table with lock-pair and processed-state constraints.
fn migrate_v1_outbox_table(conn: &Connection) -> OutboxResult<()> {
    info!("Applying migration v1: outbox table");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox (
            id TEXT PRIMARY KEY,
            data BLOB NOT NULL,
            state TEXT NOT NULL DEFAULT 'pending'
                CHECK (state IN ('pending', 'in_progress', 'processed', 'failed')),
            created_on INTEGER NOT NULL,
            locked_by TEXT,
            locked_on INTEGER,
            processed_on INTEGER,
            number_of_attempts INTEGER NOT NULL DEFAULT 0
                CHECK (number_of_attempts >= 0),
            last_attempted_on INTEGER,
            error TEXT,
            CHECK ((locked_by IS NULL) = (locked_on IS NULL)),
            CHECK (processed_on IS NULL OR state = 'processed')
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_state_locked_by
            ON outbox(state, locked_by);
        CREATE INDEX IF NOT EXISTS idx_outbox_locked_by
            ON outbox(locked_by);
        ",
    )?;

    record_migration(conn, 1, "outbox_table")
}

/// V2: indexes backing the stale-lock sweep and retention delete.
fn migrate_v2_sweep_indexes(conn: &Connection) -> OutboxResult<()> {
    info!("Applying migration v2: sweep and retention indexes");

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_outbox_locked_on
            ON outbox(locked_on);
        CREATE INDEX IF NOT EXISTS idx_outbox_created_on
            ON outbox(created_on);
        ",
    )?;

    record_migration(conn, 2, "sweep_indexes")
}
