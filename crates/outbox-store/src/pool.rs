//! Connection pool shared by concurrent dispatchers.
//!
//! SQLite WAL mode lets readers proceed while a writer holds the lock, and
//! the busy timeout makes competing claim statements queue instead of
//! failing with `SQLITE_BUSY`.

use crate::{OutboxError, OutboxResult};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections in the pool.
    pub max_size: u32,
    /// Minimum idle connections to maintain.
    pub min_idle: Option<u32>,
    /// Connection acquisition timeout.
    pub connection_timeout: Duration,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: Some(2),
            connection_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone)]
pub struct PoolState {
    /// Total connections (active + idle).
    pub connections: u32,
    /// Currently idle connections.
    pub idle_connections: u32,
}

/// Build a pool over the database file at `path`.
///
/// Every connection gets the busy timeout and WAL pragmas before it is
/// handed out. Failing to establish the initial connections is a
/// connectivity error.
pub(crate) fn open_pool(
    path: &Path,
    config: &PoolConfig,
) -> OutboxResult<Pool<SqliteConnectionManager>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let busy_timeout = config.busy_timeout;
    let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        Ok(())
    });

    let pool = Pool::builder()
        .max_size(config.max_size)
        .min_idle(config.min_idle)
        .connection_timeout(config.connection_timeout)
        .build(manager)
        .map_err(|e| OutboxError::Connectivity(e.to_string()))?;

    info!(
        path = %path.display(),
        max_size = config.max_size,
        "Outbox connection pool created"
    );

    Ok(pool)
}
