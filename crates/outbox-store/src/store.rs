//! Pooled, codec-aware outbox store.

use crate::pool::open_pool;
use crate::{
    migrations, queries, EncodedRecord, JsonCodec, LockId, MessageCodec, OutboxError,
    OutboxResult, PoolConfig, PoolState, Record, RecordId, StateSummary, StoreSettings,
};
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Transaction;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outbox store over a pool of SQLite connections.
///
/// Every operation is a single statement on one pooled connection, so the
/// store can be shared between threads (wrap it in an `Arc`) and between
/// processes pointed at the same database file. Nothing is retried
/// internally.
///
/// Distinct dispatchers must claim with distinct [`LockId`]s.
pub struct OutboxStore<M, C = JsonCodec> {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
    codec: C,
    _message: PhantomData<fn() -> M>,
}

impl<M> OutboxStore<M, JsonCodec>
where
    JsonCodec: MessageCodec<M>,
{
    /// Open a store that serializes messages as JSON.
    pub fn open(settings: &StoreSettings, pool_config: PoolConfig) -> OutboxResult<Self> {
        Self::open_with_codec(settings, pool_config, JsonCodec)
    }
}

impl<M, C> OutboxStore<M, C>
where
    C: MessageCodec<M>,
{
    /// Open a store with an explicit payload codec.
    ///
    /// This will:
    /// - Resolve the database file from `settings`
    /// - Build the connection pool and verify a connection works
    /// - Run any pending migrations
    ///
    /// A store that cannot be reached yields [`OutboxError::Connectivity`].
    pub fn open_with_codec(
        settings: &StoreSettings,
        pool_config: PoolConfig,
        codec: C,
    ) -> OutboxResult<Self> {
        let path = settings.database_path()?;
        info!(path = %path.display(), "Opening outbox store");

        let pool = open_pool(&path, &pool_config)?;

        let conn = pool
            .get()
            .map_err(|e| OutboxError::Connectivity(e.to_string()))?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| OutboxError::Connectivity(e.to_string()))?;

        migrations::run_migrations(&conn)?;
        drop(conn);

        info!(path = %path.display(), "Outbox store ready");

        Ok(Self {
            pool,
            path,
            codec,
            _message: PhantomData,
        })
    }

    /// Check out a pooled connection.
    ///
    /// Use it to open the business transaction that [`Self::add_record`]
    /// joins. The connection returns to the pool when dropped.
    pub fn connection(&self) -> OutboxResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payload codec in use.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    // ==========================================
    // Outbox protocol
    // ==========================================

    /// Stage a new record inside the caller's transaction.
    ///
    /// The record is visible to dispatchers only once `tx` commits, and
    /// disappears with it on rollback. The message is encoded before any
    /// write, so a codec failure leaves the transaction untouched.
    pub fn add_record(&self, tx: &Transaction<'_>, record: &Record<M>) -> OutboxResult<()> {
        record.validate_new().map_err(OutboxError::InvalidRecord)?;
        let data = self.codec.encode(&record.message)?;
        queries::insert_record(tx, &record.with_message(data))
    }

    /// Lease every unlocked, claimable record to `lock_id` at `lease_time`.
    ///
    /// Returns the number of records claimed. Read them back with
    /// [`Self::get_records_by_lock_id`].
    pub fn claim_pending_records(
        &self,
        lock_id: &LockId,
        lease_time: DateTime<Utc>,
    ) -> OutboxResult<usize> {
        let conn = self.pool.get()?;
        queries::claim_records(&conn, lock_id, lease_time)
    }

    /// Fetch every record currently leased to `lock_id`, oldest first.
    ///
    /// A payload that fails to decode aborts the whole read.
    pub fn get_records_by_lock_id(&self, lock_id: &LockId) -> OutboxResult<Vec<Record<M>>> {
        let rows = {
            let conn = self.pool.get()?;
            queries::get_records_by_lock_id(&conn, lock_id)?
        };

        let records = rows
            .into_iter()
            .map(|row| self.decode(row))
            .collect::<OutboxResult<Vec<_>>>()?;

        debug!(lock_id = %lock_id, count = records.len(), "Loaded leased outbox records");
        Ok(records)
    }

    /// Persist a record's post-attempt state.
    ///
    /// Lock fields are written exactly as the record carries them, so a
    /// record passed through [`Record::mark_processed`] also releases its
    /// lease. The payload is never rewritten and attempts never decrease;
    /// other fields are last-writer-wins, so a late write from a swept lease
    /// can reopen a delivered record. Returns `false` when no record with
    /// this id exists.
    pub fn update_record_by_id(&self, record: &Record<M>) -> OutboxResult<bool> {
        let conn = self.pool.get()?;
        let updated = queries::update_record(&conn, record)?;
        if !updated {
            warn!(record_id = %record.id, "Outbox record not found for update");
        }
        Ok(updated)
    }

    /// Release every record leased to `lock_id`. States are left as is.
    pub fn clear_locks_by_lock_id(&self, lock_id: &LockId) -> OutboxResult<usize> {
        let conn = self.pool.get()?;
        queries::clear_locks_by_lock_id(&conn, lock_id)
    }

    /// Release every lease taken strictly before `threshold`, whoever holds it.
    ///
    /// Recovers records held by dispatchers that crashed mid-batch.
    pub fn clear_locks_with_duration_before_date(
        &self,
        threshold: DateTime<Utc>,
    ) -> OutboxResult<usize> {
        let conn = self.pool.get()?;
        let count = queries::clear_locks_before(&conn, threshold)?;
        if count > 0 {
            info!(count, threshold = %threshold, "Reclaimed stale outbox leases");
        }
        Ok(count)
    }

    /// Delete every record created strictly before `threshold`.
    ///
    /// State is not consulted: records still pending or leased are removed
    /// too. Pick a threshold well past any plausible delivery delay.
    pub fn remove_records_before_datetime(
        &self,
        threshold: DateTime<Utc>,
    ) -> OutboxResult<usize> {
        let conn = self.pool.get()?;
        let count = queries::remove_records_before(&conn, threshold)?;
        if count > 0 {
            info!(count, threshold = %threshold, "Purged expired outbox records");
        }
        Ok(count)
    }

    // ==========================================
    // Inspection
    // ==========================================

    /// Get a record by id.
    pub fn get_record(&self, id: &RecordId) -> OutboxResult<Option<Record<M>>> {
        let row = {
            let conn = self.pool.get()?;
            queries::get_record(&conn, id)?
        };
        row.map(|row| self.decode(row)).transpose()
    }

    /// Record counts per state.
    pub fn count_records_by_state(&self) -> OutboxResult<StateSummary> {
        let conn = self.pool.get()?;
        queries::count_records_by_state(&conn)
    }

    /// Check the store is reachable by running a trivial query.
    pub fn health_check(&self) -> OutboxResult<()> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        debug!("Outbox store health check passed");
        Ok(())
    }

    /// Get pool statistics for monitoring.
    pub fn pool_state(&self) -> PoolState {
        let state = self.pool.state();
        PoolState {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }

    fn decode(&self, row: EncodedRecord) -> OutboxResult<Record<M>> {
        let message = self.codec.decode(&row.message).map_err(|e| {
            warn!(record_id = %row.id, error = %e, "Failed to decode outbox payload");
            e
        })?;
        Ok(row.with_message(message))
    }
}
