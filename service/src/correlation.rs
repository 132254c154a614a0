//! Correlation between pending callers and asynchronously-arriving
//! acknowledgments.
//!
//! Each submission registers exactly one pending entry keyed by its id. The
//! entry holds the sending half of a single-use channel; the caller keeps
//! the receiving half inside its [`PendingTicket`]. Completion resolves the
//! channel and removes the entry; expiry removes the entry and drops the
//! sender, which wakes the waiter with [`PendingExpired`].
//!
//! # Concurrency Contract
//!
//! `register`, `complete`, `discard` and the expiry sweep all mutate the map
//! under one mutex, so per id they are atomic check-and-act operations: a
//! race between an arriving acknowledgment and expiry resolves to whichever
//! acquired the lock first, and a handle is never resolved twice. Expiry is
//! monotonic - an expired entry is gone for good, and a later `complete`
//! with the same id is a silent miss.

use logbridge_core::message::ResponseEnvelope;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};

/// Default inactivity window after which a pending entry expires.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// The pending entry expired before an acknowledgment arrived.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Pending request expired before completion")]
pub struct PendingExpired;

/// The caller's half of one pending submission.
///
/// Resolves at most once, with the acknowledgment that carries the matching
/// id. Consumed by [`PendingTicket::wait`].
#[derive(Debug)]
pub struct PendingTicket {
    rx: oneshot::Receiver<ResponseEnvelope>,
}

impl PendingTicket {
    /// Wait for the acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns [`PendingExpired`] if the store evicted the entry before an
    /// acknowledgment arrived.
    pub async fn wait(self) -> Result<ResponseEnvelope, PendingExpired> {
        self.rx.await.map_err(|_| PendingExpired)
    }
}

struct Pending {
    tx: oneshot::Sender<ResponseEnvelope>,
    last_access: Instant,
}

impl Pending {
    fn new(tx: oneshot::Sender<ResponseEnvelope>) -> Self {
        Self {
            tx,
            last_access: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_access.elapsed() > ttl
    }
}

/// Thread-safe map from submission id to pending completion, bounded by an
/// inactivity timeout.
///
/// Eviction is lazy on access plus an optional background sweep
/// ([`CorrelationStore::run_reaper`]); both paths drop the stored sender so
/// the waiter observes expiry promptly.
pub struct CorrelationStore {
    entries: Mutex<HashMap<String, Pending>>,
    ttl: Duration,
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl CorrelationStore {
    /// Create a store whose entries expire after `ttl` of inactivity.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Register a pending entry for `id` and return the caller's ticket.
    ///
    /// Returns `None` (logged) if a live entry for `id` already exists; ids
    /// are caller-generated and must be unique. An expired leftover under
    /// the same id is evicted and replaced.
    #[must_use]
    pub fn register(&self, id: &str) -> Option<PendingTicket> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.lock();
        match entries.entry(id.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_expired(self.ttl) => {
                occupied.insert(Pending::new(tx));
            }
            Entry::Occupied(_) => {
                tracing::warn!(id, "Refusing duplicate pending registration");
                return None;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Pending::new(tx));
            }
        }
        Some(PendingTicket { rx })
    }

    /// Resolve the pending entry for `id` with `envelope`.
    ///
    /// Returns `true` if a live entry was found and resolved. An absent,
    /// already-completed or expired id is a silent miss (`false`): the
    /// broker may redeliver acknowledgments, and callers may already have
    /// expired.
    pub fn complete(&self, id: &str, envelope: ResponseEnvelope) -> bool {
        let pending = {
            let mut entries = self.lock();
            match entries.remove(id) {
                Some(pending) if !pending.is_expired(self.ttl) => Some(pending),
                // Expired entry: dropping it here wakes the waiter with
                // PendingExpired; the acknowledgment loses the race.
                Some(_) | None => None,
            }
        };

        match pending {
            Some(pending) => {
                if pending.tx.send(envelope).is_err() {
                    tracing::debug!(id, "Waiter dropped before completion");
                }
                true
            }
            None => false,
        }
    }

    /// Remove a pending entry without resolving it.
    ///
    /// Used by the gateway when the inbound publish fails after
    /// registration; the waiter observes [`PendingExpired`].
    pub fn discard(&self, id: &str) {
        if self.lock().remove(id).is_some() {
            tracing::debug!(id, "Discarded pending entry");
        }
    }

    /// Evict every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, pending| !pending.is_expired(self.ttl));
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired pending entries");
            metrics::counter!("correlation.expired").increment(evicted as u64);
        }
        evicted
    }

    /// Number of entries currently pending (live or not yet swept).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Periodically [`sweep`](Self::sweep) until the shutdown signal fires.
    pub async fn run_reaper(&self, period: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("Correlation reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use logbridge_core::message::ErrorCode;

    fn envelope(id: &str) -> ResponseEnvelope {
        ResponseEnvelope::ok(id.to_string())
    }

    #[tokio::test]
    async fn register_then_complete_resolves_ticket() {
        let store = CorrelationStore::default();
        let ticket = store.register("id-1").unwrap();

        assert!(store.complete("id-1", envelope("id-1")));
        let resolved = ticket.wait().await.unwrap();
        assert_eq!(resolved.id, "id-1");
        assert_eq!(resolved.error_code, ErrorCode::Ok);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let store = CorrelationStore::default();
        let _ticket = store.register("id-1").unwrap();

        assert!(store.register("id-1").is_none());
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn completion_of_unknown_id_is_silent_miss() {
        let store = CorrelationStore::default();
        let _other = store.register("id-1").unwrap();

        assert!(!store.complete("never-registered", envelope("never-registered")));
        // The unrelated entry is untouched.
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn second_completion_is_silent_miss() {
        let store = CorrelationStore::default();
        let ticket = store.register("id-1").unwrap();

        assert!(store.complete("id-1", envelope("id-1")));
        assert!(!store.complete("id-1", envelope("id-1")));
        assert!(ticket.wait().await.is_ok());
    }

    #[tokio::test]
    async fn no_cross_delivery_between_ids() {
        let store = CorrelationStore::default();
        let ticket_a = store.register("id-a").unwrap();
        let ticket_b = store.register("id-b").unwrap();

        assert!(store.complete("id-b", envelope("id-b")));
        assert!(store.complete("id-a", envelope("id-a")));

        assert_eq!(ticket_a.wait().await.unwrap().id, "id-a");
        assert_eq!(ticket_b.wait().await.unwrap().id, "id-b");
    }

    #[tokio::test]
    async fn expired_entry_cannot_be_completed() {
        let store = CorrelationStore::new(Duration::ZERO);
        let ticket = store.register("id-1").unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        // The zero-ttl entry is already past its window: expiry wins.
        assert!(!store.complete("id-1", envelope("id-1")));
        assert!(ticket.wait().await.is_err());
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn sweep_evicts_and_wakes_waiters() {
        let store = CorrelationStore::new(Duration::ZERO);
        let ticket = store.register("id-1").unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(ticket.wait().await, Err(PendingExpired));

        // Expiry is final even if an acknowledgment shows up afterwards.
        assert!(!store.complete("id-1", envelope("id-1")));
    }

    #[test]
    fn sweep_keeps_live_entries() {
        let store = CorrelationStore::new(Duration::from_secs(60));
        let _ticket = store.register("id-1").unwrap();

        assert_eq!(store.sweep(), 0);
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn discard_drops_waiter_without_resolving() {
        let store = CorrelationStore::default();
        let ticket = store.register("id-1").unwrap();

        store.discard("id-1");
        assert_eq!(store.pending_count(), 0);
        assert_eq!(ticket.wait().await, Err(PendingExpired));
    }

    #[tokio::test]
    async fn reaper_stops_on_shutdown() {
        let store = CorrelationStore::new(Duration::ZERO);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = {
            let store = std::sync::Arc::new(store);
            let store_for_task = std::sync::Arc::clone(&store);
            tokio::spawn(async move {
                store_for_task
                    .run_reaper(Duration::from_millis(5), shutdown_rx)
                    .await;
            })
        };

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
