//! Outbox model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Globally unique record identifier, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Opaque lease token identifying the worker that holds a batch of records.
///
/// Only equality is meaningful. Two dispatchers must never share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(String);

impl LockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random lock id, unique per call.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record delivery state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Awaiting first claim.
    #[default]
    Pending,
    /// At least one attempt made, not yet delivered.
    InProgress,
    /// Delivered. Terminal.
    Processed,
    /// Given up on by the dispatcher. Terminal.
    Failed,
}

impl RecordState {
    /// States a claim may pick up.
    pub const CLAIMABLE: [RecordState; 2] = [Self::Pending, Self::InProgress];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown state text found in the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown record state: {0:?}")]
pub struct ParseRecordStateError(String);

impl FromStr for RecordState {
    type Err = ParseRecordStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(ParseRecordStateError(other.to_string())),
        }
    }
}

/// A held lock: which lease owns the record and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub lock_id: LockId,
    pub locked_on: DateTime<Utc>,
}

/// Outbox record - one unit of to-be-delivered work.
///
/// `id`, `message` and `created_on` are fixed at creation; the store never
/// rewrites them after the insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<M> {
    pub id: RecordId,
    pub message: M,
    pub state: RecordState,
    pub created_on: DateTime<Utc>,
    pub lock: Option<Lease>,
    pub processed_on: Option<DateTime<Utc>>,
    pub number_of_attempts: u32,
    pub last_attempt_on: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Record with its payload already encoded, as stored in the `data` column.
pub type EncodedRecord = Record<Vec<u8>>;

impl<M> Record<M> {
    /// Create a pending record stamped with the current time.
    pub fn new(message: M) -> Self {
        Self::new_at(message, Utc::now())
    }

    /// Create a pending record with an explicit creation time.
    ///
    /// The timestamp is truncated to millisecond precision, the resolution
    /// the store persists.
    pub fn new_at(message: M, created_on: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            message,
            state: RecordState::Pending,
            created_on: truncate_to_millis(created_on),
            lock: None,
            processed_on: None,
            number_of_attempts: 0,
            last_attempt_on: None,
            error: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Whether a claim could pick this record up right now.
    pub fn is_claimable(&self) -> bool {
        !self.is_locked() && RecordState::CLAIMABLE.contains(&self.state)
    }

    pub fn lock_id(&self) -> Option<&LockId> {
        self.lock.as_ref().map(|l| &l.lock_id)
    }

    pub fn locked_on(&self) -> Option<DateTime<Utc>> {
        self.lock.as_ref().map(|l| l.locked_on)
    }

    /// Count a delivery attempt made at `at`.
    pub fn record_attempt(&mut self, at: DateTime<Utc>) {
        self.number_of_attempts = self.number_of_attempts.saturating_add(1);
        self.last_attempt_on = Some(truncate_to_millis(at));
    }

    /// Successful delivery: terminal state, lease released.
    pub fn mark_processed(&mut self, at: DateTime<Utc>) {
        self.record_attempt(at);
        self.state = RecordState::Processed;
        self.processed_on = Some(truncate_to_millis(at));
        self.error = None;
        self.lock = None;
    }

    /// Failed delivery that will be retried. The lease is kept.
    pub fn mark_failed_attempt(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.record_attempt(at);
        if self.state == RecordState::Pending {
            self.state = RecordState::InProgress;
        }
        self.error = Some(error.into());
    }

    /// Give up on the record. Terminal; the lease is released.
    pub fn mark_failed(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.record_attempt(at);
        self.state = RecordState::Failed;
        self.error = Some(error.into());
        self.lock = None;
    }

    pub fn release_lock(&mut self) {
        self.lock = None;
    }

    /// Copy everything but the payload onto a new message value.
    pub fn with_message<N>(&self, message: N) -> Record<N> {
        Record {
            id: self.id,
            message,
            state: self.state,
            created_on: self.created_on,
            lock: self.lock.clone(),
            processed_on: self.processed_on,
            number_of_attempts: self.number_of_attempts,
            last_attempt_on: self.last_attempt_on,
            error: self.error.clone(),
        }
    }

    /// Check the invariants every persisted record must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.processed_on.is_some() && self.state != RecordState::Processed {
            return Err(format!(
                "record {} has processed_on set but state is {}",
                self.id, self.state
            ));
        }
        Ok(())
    }

    /// Check that this record is a fresh insert: pending, unlocked, untried.
    pub fn validate_new(&self) -> Result<(), String> {
        self.validate()?;
        if self.state != RecordState::Pending {
            return Err(format!(
                "new record {} must be pending, got {}",
                self.id, self.state
            ));
        }
        if self.is_locked() {
            return Err(format!("new record {} must not hold a lock", self.id));
        }
        if self.number_of_attempts != 0 || self.last_attempt_on.is_some() {
            return Err(format!("new record {} must have no attempts", self.id));
        }
        Ok(())
    }
}

/// Record counts per state, for operator status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSummary {
    pub pending: u64,
    pub in_progress: u64,
    pub processed: u64,
    pub failed: u64,
    /// Records currently holding a lease, any state.
    pub locked: u64,
}

impl StateSummary {
    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.processed + self.failed
    }
}

/// Drop sub-millisecond precision.
pub(crate) fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_record_state_text() {
        for state in [
            RecordState::Pending,
            RecordState::InProgress,
            RecordState::Processed,
            RecordState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<RecordState>().unwrap(), state);
        }
        assert!("PENDING".parse::<RecordState>().is_err());
        assert!("delivered".parse::<RecordState>().is_err());
    }

    #[test]
    fn test_record_state_terminal() {
        assert!(!RecordState::Pending.is_terminal());
        assert!(!RecordState::InProgress.is_terminal());
        assert!(RecordState::Processed.is_terminal());
        assert!(RecordState::Failed.is_terminal());
        assert_eq!(RecordState::default(), RecordState::Pending);
    }

    #[test]
    fn test_new_record_is_pending_and_unlocked() {
        let record = Record::new_at("payload", at(0));
        assert_eq!(record.state, RecordState::Pending);
        assert!(!record.is_locked());
        assert!(record.is_claimable());
        assert_eq!(record.number_of_attempts, 0);
        assert!(record.validate_new().is_ok());
    }

    #[test]
    fn test_new_record_truncates_to_millis() {
        let precise = at(0) + Duration::nanoseconds(1_234_567);
        let record = Record::new_at((), precise);
        assert_eq!(record.created_on, at(0) + Duration::milliseconds(1));
    }

    #[test]
    fn test_record_ids_are_unique() {
        let a = Record::new(1);
        let b = Record::new(1);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_record_id_parse() {
        let id = RecordId::new();
        assert_eq!(id.to_string().parse::<RecordId>().unwrap(), id);
        assert!("not-a-uuid".parse::<RecordId>().is_err());
    }

    #[test]
    fn test_lock_id_equality_only() {
        assert_eq!(LockId::new("worker-1"), LockId::new("worker-1"));
        assert_ne!(LockId::new("worker-1"), LockId::new("worker-2"));
        assert_ne!(LockId::generate(), LockId::generate());
    }

    #[test]
    fn test_mark_processed_releases_lease() {
        let mut record = Record::new_at("payload", at(0));
        record.lock = Some(Lease {
            lock_id: LockId::new("a"),
            locked_on: at(1),
        });

        record.mark_processed(at(2));

        assert_eq!(record.state, RecordState::Processed);
        assert_eq!(record.processed_on, Some(at(2)));
        assert_eq!(record.number_of_attempts, 1);
        assert_eq!(record.last_attempt_on, Some(at(2)));
        assert!(!record.is_locked());
        assert!(!record.is_claimable());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_mark_failed_attempt_keeps_lease() {
        let mut record = Record::new_at("payload", at(0));
        record.lock = Some(Lease {
            lock_id: LockId::new("a"),
            locked_on: at(1),
        });

        record.mark_failed_attempt(at(2), "broker unavailable");
        record.mark_failed_attempt(at(3), "broker unavailable");

        assert_eq!(record.state, RecordState::InProgress);
        assert_eq!(record.number_of_attempts, 2);
        assert_eq!(record.last_attempt_on, Some(at(3)));
        assert_eq!(record.error.as_deref(), Some("broker unavailable"));
        assert_eq!(record.lock_id(), Some(&LockId::new("a")));

        record.release_lock();
        assert!(record.is_claimable());
    }

    #[test]
    fn test_mark_failed_is_terminal() {
        let mut record = Record::new_at("payload", at(0));
        record.mark_failed(at(5), "max attempts reached");
        assert_eq!(record.state, RecordState::Failed);
        assert!(!record.is_claimable());
        assert!(record.processed_on.is_none());
    }

    #[test]
    fn test_validate_processed_on_requires_processed_state() {
        let mut record = Record::new_at("payload", at(0));
        record.processed_on = Some(at(1));
        assert!(record.validate().is_err());

        record.state = RecordState::Processed;
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_validate_new_rejects_used_records() {
        let mut locked = Record::new_at("payload", at(0));
        locked.lock = Some(Lease {
            lock_id: LockId::new("a"),
            locked_on: at(0),
        });
        assert!(locked.validate_new().is_err());

        let mut attempted = Record::new_at("payload", at(0));
        attempted.record_attempt(at(1));
        assert!(attempted.validate_new().is_err());

        let mut failed = Record::new_at("payload", at(0));
        failed.state = RecordState::Failed;
        assert!(failed.validate_new().is_err());
    }

    #[test]
    fn test_with_message_keeps_metadata() {
        let mut record = Record::new_at("payload", at(0));
        record.record_attempt(at(1));
        let encoded: EncodedRecord = record.with_message(b"payload".to_vec());
        assert_eq!(encoded.id, record.id);
        assert_eq!(encoded.number_of_attempts, 1);
        assert_eq!(encoded.message, b"payload".to_vec());
    }

    #[test]
    fn test_state_summary_total() {
        let summary = StateSummary {
            pending: 3,
            in_progress: 1,
            processed: 10,
            failed: 2,
            locked: 4,
        };
        assert_eq!(summary.total(), 16);
    }
}
