//! Sample Store
//!
//! Append-only storage of telemetry pings plus the private trade journal.
//! The aggregation engine only sees the [`SampleStore`] trait: one append
//! operation and one time-bounded range read.

pub mod cache;
pub mod sqlite;

pub use cache::CachedSampleStore;
pub use sqlite::SqliteSampleStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{NewSample, Sample};

/// Storage contract required by the aggregation engine
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Append a validated sample. The store assigns id and timestamp.
    async fn record_sample(&self, sample: NewSample) -> Result<Sample, StoreError>;

    /// All samples with `timestamp >= since`, oldest first.
    async fn samples_since(&self, since: DateTime<Utc>) -> Result<Vec<Sample>, StoreError>;
}

/// Errors from the sample store. None of them invalidate previously stored data.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// The blocking task running the query panicked or was cancelled
    Task(String),
    InvalidRow(String),
}

impl StoreError {
    /// Busy/locked databases, I/O hiccups and failed blocking tasks clear up on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::OutOfMemory
            ),
            Self::Sqlite(_) => false,
            Self::Task(_) => true,
            Self::InvalidRow(_) => false,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "SQLite error: {}", e),
            Self::Task(e) => write!(f, "Store task failed: {}", e),
            Self::InvalidRow(e) => write!(f, "Invalid stored row: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let busy = StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_retryable());
        assert!(StoreError::Task("cancelled".into()).is_retryable());
        assert!(!StoreError::InvalidRow("bad".into()).is_retryable());
        assert!(!StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows).is_retryable());
    }
}
