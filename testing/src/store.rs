//! In-memory log store with failure injection.

use logbridge_core::message::LogEntry;
use logbridge_core::store::{LogStore, StoreError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory [`LogStore`] implementation for tests.
///
/// Saves entries into a map keyed by id (idempotent under redelivery, like
/// the real store). A test can flip the store into a failing mode to drive
/// the ingestion rollback path.
///
/// # Example
///
/// ```
/// use logbridge_testing::InMemoryLogStore;
/// use logbridge_core::{LogEntry, LogStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = InMemoryLogStore::new();
/// let entry = LogEntry::new("id-1".into(), 1000, "a1".into(), "h1".into(), 1, "m1".into());
///
/// store.save(&entry).await.unwrap();
/// assert!(store.contains("id-1"));
///
/// store.set_failing(true);
/// assert!(store.save(&entry).await.is_err());
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryLogStore {
    entries: Arc<Mutex<HashMap<String, LogEntry>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryLogStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle failure injection: while `true`, every `save` fails.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Whether an entry with the given id has been saved.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of distinct entries saved.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of all saved entries, in no particular order.
    #[must_use]
    pub fn saved(&self) -> Vec<LogEntry> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogStore for InMemoryLogStore {
    fn save(
        &self,
        entry: &LogEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let entry = entry.clone();
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::QueryFailed("injected failure".to_string()));
            }
            self.lock().insert(entry.id.clone(), entry);
            Ok(())
        })
    }
}
