//! Standalone outbox statements that work with any Connection.
//!
//! Each function is exactly one SQL statement, so it is atomic on its own and
//! composes with whatever transaction the caller's connection already has open.
//! Payloads are handled as encoded bytes here; codec handling lives in
//! [`crate::OutboxStore`].

use crate::{
    EncodedRecord, Lease, LockId, OutboxError, OutboxResult, Record, RecordId, RecordState,
    StateSummary,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::debug;

const RECORD_COLUMNS: &str = "id, data, state, created_on, locked_by, locked_on, processed_on, \
     number_of_attempts, last_attempted_on, error";

// ==========================================
// Inserts
// ==========================================

/// Insert a new encoded record.
///
/// Run this on the caller's transaction: the row becomes visible only when
/// that transaction commits.
pub fn insert_record(conn: &Connection, record: &EncodedRecord) -> OutboxResult<()> {
    record.validate_new().map_err(OutboxError::InvalidRecord)?;

    let result = conn.execute(
        "INSERT INTO outbox (id, data, state, created_on, locked_by, locked_on, processed_on, number_of_attempts, last_attempted_on, error)
         VALUES (?1, ?2, ?3, ?4, NULL, NULL, NULL, 0, NULL, ?5)",
        params![
            record.id.to_string(),
            record.message,
            record.state.as_str(),
            to_millis(record.created_on),
            record.error,
        ],
    );

    match result {
        Ok(_) => {
            debug!(record_id = %record.id, "Inserted outbox record");
            Ok(())
        }
        Err(e) if is_primary_key_violation(&e) => Err(OutboxError::DuplicateRecord(record.id)),
        Err(e) => Err(e.into()),
    }
}

// ==========================================
// Leasing
// ==========================================

/// Lease every unlocked, claimable record to `lock_id`.
///
/// A single conditional update: two concurrent calls with different lock ids
/// can never both match the same row, because the second one re-evaluates
/// `locked_by IS NULL` after the first commits.
pub fn claim_records(
    conn: &Connection,
    lock_id: &LockId,
    lease_time: DateTime<Utc>,
) -> OutboxResult<usize> {
    let [pending, in_progress] = RecordState::CLAIMABLE;
    let count = conn.execute(
        "UPDATE outbox
         SET locked_by = ?1, locked_on = ?2
         WHERE locked_by IS NULL AND state IN (?3, ?4)",
        params![
            lock_id.as_str(),
            to_millis(lease_time),
            pending.as_str(),
            in_progress.as_str(),
        ],
    )?;
    debug!(lock_id = %lock_id, count, "Claimed outbox records");
    Ok(count)
}

/// Release every record held by `lock_id`. State is untouched.
pub fn clear_locks_by_lock_id(conn: &Connection, lock_id: &LockId) -> OutboxResult<usize> {
    let count = conn.execute(
        "UPDATE outbox
         SET locked_by = NULL, locked_on = NULL
         WHERE locked_by = ?1",
        params![lock_id.as_str()],
    )?;
    debug!(lock_id = %lock_id, count, "Cleared outbox locks");
    Ok(count)
}

/// Release every lock taken before `threshold`, whoever holds it.
pub fn clear_locks_before(conn: &Connection, threshold: DateTime<Utc>) -> OutboxResult<usize> {
    let count = conn.execute(
        "UPDATE outbox
         SET locked_by = NULL, locked_on = NULL
         WHERE locked_on < ?1",
        params![to_millis(threshold)],
    )?;
    debug!(threshold = %threshold, count, "Cleared stale outbox locks");
    Ok(count)
}

// ==========================================
// Reads
// ==========================================

/// Get every record held by `lock_id`, oldest first.
pub fn get_records_by_lock_id(
    conn: &Connection,
    lock_id: &LockId,
) -> OutboxResult<Vec<EncodedRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM outbox WHERE locked_by = ?1 ORDER BY created_on ASC, id ASC",
        RECORD_COLUMNS
    ))?;

    let records = stmt
        .query_map(params![lock_id.as_str()], map_record_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

/// Get a record by id.
pub fn get_record(conn: &Connection, id: &RecordId) -> OutboxResult<Option<EncodedRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM outbox WHERE id = ?1",
        RECORD_COLUMNS
    ))?;

    let record = stmt
        .query_row(params![id.to_string()], map_record_row)
        .optional()?;
    Ok(record)
}

/// Count records per state, plus how many hold a lease.
///
/// One statement, so every count comes from the same snapshot.
pub fn count_records_by_state(conn: &Connection) -> OutboxResult<StateSummary> {
    let summary = conn.query_row(
        "SELECT COALESCE(SUM(state = 'pending'), 0),
                COALESCE(SUM(state = 'in_progress'), 0),
                COALESCE(SUM(state = 'processed'), 0),
                COALESCE(SUM(state = 'failed'), 0),
                COALESCE(SUM(locked_by IS NOT NULL), 0)
         FROM outbox",
        [],
        |row| {
            Ok(StateSummary {
                pending: row.get::<_, i64>(0)? as u64,
                in_progress: row.get::<_, i64>(1)? as u64,
                processed: row.get::<_, i64>(2)? as u64,
                failed: row.get::<_, i64>(3)? as u64,
                locked: row.get::<_, i64>(4)? as u64,
            })
        },
    )?;
    Ok(summary)
}

// ==========================================
// Updates & retention
// ==========================================

/// Persist the post-attempt state of one record.
///
/// Writes state, lock fields, `processed_on`, attempt counters and error.
/// The payload and `created_on` are never rewritten. `number_of_attempts`
/// only moves forward: a stale copy with a lower count cannot roll it back.
/// Every other field is last-writer-wins. A dispatcher whose lease was swept
/// can still overwrite a newer outcome (turning `processed` back into
/// `in_progress`), which only causes a redelivery.
/// Returns whether a row with this id exists.
pub fn update_record<M>(conn: &Connection, record: &Record<M>) -> OutboxResult<bool> {
    record.validate().map_err(OutboxError::InvalidRecord)?;

    let (locked_by, locked_on) = match &record.lock {
        Some(Lease { lock_id, locked_on }) => (Some(lock_id.as_str()), Some(to_millis(*locked_on))),
        None => (None, None),
    };

    let count = conn.execute(
        "UPDATE outbox
         SET state = ?2,
             locked_by = ?3,
             locked_on = ?4,
             processed_on = ?5,
             number_of_attempts = MAX(number_of_attempts, ?6),
             last_attempted_on = ?7,
             error = ?8
         WHERE id = ?1",
        params![
            record.id.to_string(),
            record.state.as_str(),
            locked_by,
            locked_on,
            record.processed_on.map(to_millis),
            record.number_of_attempts,
            record.last_attempt_on.map(to_millis),
            record.error,
        ],
    )?;

    let updated = count > 0;
    debug!(record_id = %record.id, state = %record.state, updated, "Updated outbox record");
    Ok(updated)
}

/// Delete every record created before `threshold`, regardless of state.
pub fn remove_records_before(conn: &Connection, threshold: DateTime<Utc>) -> OutboxResult<usize> {
    let count = conn.execute(
        "DELETE FROM outbox WHERE created_on < ?1",
        params![to_millis(threshold)],
    )?;
    debug!(threshold = %threshold, count, "Removed expired outbox records");
    Ok(count)
}

// ==========================================
// Row mapping
// ==========================================

/// A column held a value the model cannot represent.
#[derive(Error, Debug)]
#[error("{0}")]
struct InvalidColumn(String);

fn map_record_row(row: &Row<'_>) -> rusqlite::Result<EncodedRecord> {
    let id: String = row.get(0)?;
    let id = id
        .parse::<RecordId>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    let locked_by: Option<String> = row.get(4)?;
    let locked_on = optional_datetime(row, 5)?;
    let lock = match (locked_by, locked_on) {
        (Some(lock_id), Some(locked_on)) => Some(Lease {
            lock_id: LockId::new(lock_id),
            locked_on,
        }),
        (None, None) => None,
        _ => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                Box::new(InvalidColumn(format!(
                    "record {} has only one of locked_by/locked_on set",
                    id
                ))),
            ))
        }
    };

    Ok(Record {
        id,
        message: row.get(1)?,
        state: parse_state(row, 2)?,
        created_on: datetime(row, 3)?,
        lock,
        processed_on: optional_datetime(row, 6)?,
        number_of_attempts: row.get(7)?,
        last_attempt_on: optional_datetime(row, 8)?,
        error: row.get(9)?,
    })
}

fn parse_state(row: &Row<'_>, idx: usize) -> rusqlite::Result<RecordState> {
    let text: String = row.get(idx)?;
    text.parse::<RecordState>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    from_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(InvalidColumn(format!("timestamp {} out of range", ms))),
        )
    })
}

fn optional_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => datetime(row, idx).map(Some),
        None => Ok(None),
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
