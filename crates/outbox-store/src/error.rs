//! Outbox store error types.

use crate::codec::CodecError;
use crate::RecordId;
use thiserror::Error;

/// Outbox store error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// The backing store could not be reached or opened.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Payload serialization or deserialization failed.
    #[error("Encoding error: {0}")]
    Encoding(#[from] CodecError),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A record with the same id already exists.
    #[error("Duplicate record: {0}")]
    DuplicateRecord(RecordId),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// The record violates a data-model invariant and was not written.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse failure classes callers branch on for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Store unreachable at construction time; fatal to startup.
    Connectivity,
    /// Payload codec failure or an undecodable row; never retried by re-reading.
    Encoding,
    /// Statement failure: constraint violation, busy timeout, disconnection.
    Persistence,
    /// Caller handed the store a record that breaks an invariant.
    InvalidInput,
    /// Settings could not be loaded or are inconsistent.
    Config,
}

impl OutboxError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connectivity(_) => ErrorKind::Connectivity,
            Self::Encoding(_) => ErrorKind::Encoding,
            // A stored column the model cannot represent is as poisoned as a bad payload.
            Self::Sqlite(rusqlite::Error::FromSqlConversionFailure(..)) => ErrorKind::Encoding,
            Self::Sqlite(_) | Self::Pool(_) | Self::DuplicateRecord(_) | Self::Migration(_) => {
                ErrorKind::Persistence
            }
            Self::InvalidRecord(_) => ErrorKind::InvalidInput,
            Self::Config(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Config,
        }
    }
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
