//! Error types for the keeper store.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::codec::CodecError;
use crate::legacy::LegacyError;

/// Error type for store, worker and job operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Legacy store error: {0}")]
    Legacy(#[from] LegacyError),

    /// The job was discarded without running (worker stopped).
    #[error("Job cancelled")]
    Cancelled,

    /// The job was dropped before reaching a terminal state.
    #[error("Job abandoned before completion")]
    Abandoned,

    /// The worker could not open or initialize its connection.
    #[error("Worker halted: {0}")]
    WorkerHalted(String),

    #[error("Failed to read '{id}': {source}")]
    ReadFailed {
        id: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether this error came from the database engine and may be retried.
    pub fn is_database(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }

    /// Whether the connection that produced this error should be abandoned.
    pub fn is_connection_fatal(&self) -> bool {
        let StoreError::Database(rusqlite::Error::SqliteFailure(err, _)) = self else {
            return false;
        };
        matches!(
            err.code,
            ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
                | ErrorCode::ReadOnly
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn sqlite_failure(code: i32) -> StoreError {
        StoreError::Database(rusqlite::Error::SqliteFailure(ffi::Error::new(code), None))
    }

    #[test]
    fn test_busy_is_retryable_but_not_fatal() {
        let err = sqlite_failure(ffi::SQLITE_BUSY);
        assert!(err.is_database());
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn test_io_failure_is_connection_fatal() {
        assert!(sqlite_failure(ffi::SQLITE_IOERR).is_connection_fatal());
        assert!(sqlite_failure(ffi::SQLITE_CORRUPT).is_connection_fatal());
    }

    #[test]
    fn test_non_database_errors() {
        assert!(!StoreError::Cancelled.is_database());
        assert!(!StoreError::Cancelled.is_connection_fatal());
    }
}
