//! Persistence boundary for log records.
//!
//! The ingestion processor persists every consumed [`LogEntry`] through this
//! trait before acknowledging it. Failure must be distinguishable from
//! success so the caller can roll the surrounding transactional unit back;
//! the store itself performs no retries and emits no acknowledgments.

use crate::message::LogEntry;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Failed to reach the underlying storage engine.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// A write was attempted and rejected or lost.
    #[error("Store write failed: {0}")]
    QueryFailed(String),
}

/// Trait for durable log record storage.
///
/// Implementations must be `Send + Sync` and tolerate concurrent `save`
/// calls: the ingestion side may run more than one consumer loop. A `save`
/// that returns `Ok` means the record is durable; under at-least-once
/// delivery the same entry (same id) may be saved again after redelivery,
/// and implementations must treat that as success rather than failure.
pub trait LogStore: Send + Sync {
    /// Durably save a log entry, keyed by its unique id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the record cannot be made durable; the
    /// caller decides whether to roll back and rely on redelivery.
    fn save(
        &self,
        entry: &LogEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}
