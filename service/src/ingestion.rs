//! Transactional ingestion of log submissions.
//!
//! Each inbound message is handled as one unit: deserialize, persist via the
//! [`LogStore`], publish the acknowledgment to the outbound channel, commit.
//! Any failure after the receive rolls the unit back instead - nothing is
//! acknowledged, nothing is published, and the broker redelivers the message
//! under its durability contract. There is no local retry loop.
//!
//! A message that can never deserialize therefore redelivers indefinitely;
//! operators watching the `ingestion.rolled_back` counter spot such poison
//! messages.

use logbridge_core::broker::{Broker, BrokerError, TransactionalConsumer};
use logbridge_core::message::{LogEntry, ResponseEnvelope, WireError, WireMessage};
use logbridge_core::store::{LogStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

/// Why a unit was rolled back instead of committed.
#[derive(Error, Debug)]
pub enum UnitFailure {
    /// The inbound payload was not a valid log entry, or the acknowledgment
    /// could not be encoded.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Persistence failed; the broker will redeliver.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The outbound publish could not be staged.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Resolution of one transactional unit.
#[derive(Debug)]
pub enum UnitOutcome {
    /// The entry with this id was persisted and its acknowledgment
    /// committed.
    Committed(String),
    /// The unit was rolled back; the message returns for redelivery.
    RolledBack(UnitFailure),
}

/// Consumer loop turning inbound messages into persisted entries plus
/// acknowledgments, one transactional unit at a time.
pub struct IngestionProcessor {
    broker: Arc<dyn Broker>,
    store: Arc<dyn LogStore>,
    inbound_channel: String,
    outbound_channel: String,
}

impl IngestionProcessor {
    /// Pause before retrying after a broker-level receive failure.
    const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

    /// Create a processor consuming `inbound_channel` and acknowledging on
    /// `outbound_channel`.
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn LogStore>,
        inbound_channel: impl Into<String>,
        outbound_channel: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            store,
            inbound_channel: inbound_channel.into(),
            outbound_channel: outbound_channel.into(),
        }
    }

    /// Consume the inbound channel until the shutdown signal fires.
    ///
    /// Opens the transactional consumer once at startup; per-unit failures
    /// are recovered via rollback and never stop the loop.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] only if the consumer cannot be opened.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), BrokerError> {
        let mut consumer = self
            .broker
            .consume_transactional(&self.inbound_channel)
            .await?;
        tracing::info!(channel = %self.inbound_channel, "Ingestion processor started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Ingestion processor stopping");
                    break;
                }
                outcome = self.process_unit(consumer.as_mut()) => {
                    if let Err(error) = outcome {
                        tracing::error!(error = %error, "Transactional unit failed at the broker");
                        tokio::time::sleep(Self::RECEIVE_RETRY_DELAY).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Run exactly one transactional unit: receive, persist, acknowledge,
    /// commit - or roll back.
    ///
    /// Each unit runs inside a tracing span carrying a fresh unit id, so
    /// every log record of one message's processing is attributable (the
    /// explicit replacement for ambient per-thread log context). A
    /// completed rollback still resolves the waiting caller eventually,
    /// through redelivery or through
    /// [`CorrelationStore`](crate::correlation::CorrelationStore) expiry,
    /// so it is reported as an outcome, not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] when the receive itself or the unit's
    /// commit/rollback signaling fails; the caller decides whether to back
    /// off and continue.
    pub async fn process_unit(
        &self,
        consumer: &mut dyn TransactionalConsumer,
    ) -> Result<UnitOutcome, BrokerError> {
        let payload = consumer.receive().await?;
        let unit_span = tracing::info_span!("ingest_unit", unit_id = %Uuid::new_v4());

        async {
            match self.ingest(consumer, &payload).await {
                Ok(id) => {
                    consumer.commit().await?;
                    metrics::counter!("ingestion.committed").increment(1);
                    tracing::debug!(id = %id, "Unit committed");
                    Ok(UnitOutcome::Committed(id))
                }
                Err(failure) => {
                    tracing::warn!(error = %failure, "Rolling back unit");
                    consumer.rollback().await?;
                    metrics::counter!("ingestion.rolled_back").increment(1);
                    Ok(UnitOutcome::RolledBack(failure))
                }
            }
        }
        .instrument(unit_span)
        .await
    }

    /// The fallible middle of a unit: everything between receive and
    /// commit/rollback.
    async fn ingest(
        &self,
        consumer: &mut dyn TransactionalConsumer,
        payload: &[u8],
    ) -> Result<String, UnitFailure> {
        let entry = LogEntry::from_json(payload)?;
        tracing::debug!(id = %entry.id, "Persisting log entry");
        self.store.save(&entry).await?;

        let envelope = ResponseEnvelope::ok(entry.id.clone());
        let bytes = envelope.to_json()?;
        consumer.publish(&self.outbound_channel, &bytes).await?;
        tracing::debug!(id = %entry.id, "Acknowledgment staged");
        Ok(entry.id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use logbridge_core::message::ErrorCode;
    use logbridge_testing::{InMemoryBroker, InMemoryLogStore};

    fn entry(id: &str) -> LogEntry {
        LogEntry::new(
            id.to_string(),
            1000,
            "a1".to_string(),
            "h1".to_string(),
            1,
            "m1".to_string(),
        )
    }

    fn processor(broker: &InMemoryBroker, store: &InMemoryLogStore) -> IngestionProcessor {
        IngestionProcessor::new(
            Arc::new(broker.clone()),
            Arc::new(store.clone()),
            "logs_queue",
            "responses_queue",
        )
    }

    #[tokio::test]
    async fn commit_persists_and_acknowledges_atomically() {
        let broker = InMemoryBroker::new();
        let store = InMemoryLogStore::new();
        let processor = processor(&broker, &store);

        broker
            .publish("logs_queue", &entry("id-1").to_json().unwrap())
            .await
            .unwrap();

        let mut consumer = broker.consume_transactional("logs_queue").await.unwrap();
        let outcome = processor.process_unit(consumer.as_mut()).await.unwrap();

        assert!(matches!(outcome, UnitOutcome::Committed(id) if id == "id-1"));
        assert!(store.contains("id-1"));
        assert_eq!(broker.depth("logs_queue"), 0);
        assert_eq!(broker.depth("responses_queue"), 1);

        // The committed acknowledgment correlates by id and reports OK.
        let mut outbound = broker.consume_transactional("responses_queue").await.unwrap();
        let bytes = outbound.receive().await.unwrap();
        let envelope = ResponseEnvelope::from_json(&bytes).unwrap();
        assert_eq!(envelope.id, "id-1");
        assert_eq!(envelope.error_code, ErrorCode::Ok);
    }

    #[tokio::test]
    async fn store_failure_rolls_back_without_acknowledgment() {
        let broker = InMemoryBroker::new();
        let store = InMemoryLogStore::new();
        store.set_failing(true);
        let processor = processor(&broker, &store);

        broker
            .publish("logs_queue", &entry("id-2").to_json().unwrap())
            .await
            .unwrap();

        let mut consumer = broker.consume_transactional("logs_queue").await.unwrap();
        let outcome = processor.process_unit(consumer.as_mut()).await.unwrap();

        assert!(matches!(
            outcome,
            UnitOutcome::RolledBack(UnitFailure::Store(_))
        ));
        assert!(store.is_empty());
        assert_eq!(broker.depth("responses_queue"), 0);
        // The message is back for redelivery.
        assert_eq!(broker.depth("logs_queue"), 1);
    }

    #[tokio::test]
    async fn redelivered_message_succeeds_after_transient_failure() {
        let broker = InMemoryBroker::new();
        let store = InMemoryLogStore::new();
        store.set_failing(true);
        let processor = processor(&broker, &store);

        broker
            .publish("logs_queue", &entry("id-3").to_json().unwrap())
            .await
            .unwrap();

        let mut consumer = broker.consume_transactional("logs_queue").await.unwrap();
        let first = processor.process_unit(consumer.as_mut()).await.unwrap();
        assert!(matches!(first, UnitOutcome::RolledBack(_)));

        store.set_failing(false);
        let second = processor.process_unit(consumer.as_mut()).await.unwrap();
        assert!(matches!(second, UnitOutcome::Committed(id) if id == "id-3"));
        assert!(store.contains("id-3"));
        assert_eq!(broker.depth("responses_queue"), 1);
    }

    #[tokio::test]
    async fn malformed_payload_rolls_back() {
        let broker = InMemoryBroker::new();
        let store = InMemoryLogStore::new();
        let processor = processor(&broker, &store);

        broker.publish("logs_queue", b"not json").await.unwrap();

        let mut consumer = broker.consume_transactional("logs_queue").await.unwrap();
        let outcome = processor.process_unit(consumer.as_mut()).await.unwrap();

        assert!(matches!(
            outcome,
            UnitOutcome::RolledBack(UnitFailure::Wire(_))
        ));
        assert!(store.is_empty());
        assert_eq!(broker.depth("responses_queue"), 0);
        assert_eq!(broker.depth("logs_queue"), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let broker = InMemoryBroker::new();
        let store = InMemoryLogStore::new();
        let processor = Arc::new(processor(&broker, &store));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run(shutdown_rx).await })
        };

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
