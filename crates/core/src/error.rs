//! Unified error types for webmemo.
//!
//! Only `InvalidKey` and `InvalidInput` are meant to reach callers of the
//! cache API. Tier faults are absorbed by the coordinator and turned into
//! degraded service.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the webmemo cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed URL or selector handed to the key normalizer.
    #[error("INVALID_KEY: {0}")]
    InvalidKey(String),

    /// Invalid input parameters (e.g., empty payload on a tool call).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A backing tier could not be reached or did not answer in time.
    #[error("TIER_UNAVAILABLE: {0}")]
    TierUnavailable(String),

    /// A single entry is larger than the whole L1 budget.
    #[error("CAPACITY_EXCEEDED: entry of {size} bytes exceeds L1 budget of {capacity} bytes")]
    CapacityExceeded { size: usize, capacity: usize },

    /// A promotion lost against a newer invalidation or store of the same key.
    #[error("STALE_INVALIDATION_RACE: {0}")]
    StaleInvalidationRace(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be decoded.
    #[error("CACHE_ERROR: corrupt row: {0}")]
    CorruptRow(String),
}

impl Error {
    /// Whether this error means the backing tier is unusable right now.
    pub fn is_tier_fault(&self) -> bool {
        matches!(self, Error::TierUnavailable(_) | Error::Database(_) | Error::MigrationFailed(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidKey(msg) => (-32602, msg.clone()),
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::TierUnavailable(msg) => (-32003, msg.clone()),
            Error::CapacityExceeded { .. } => (-32004, err.to_string()),
            Error::StaleInvalidationRace(msg) => (-32005, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::CorruptRow(msg) => (-32002, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
