//! Delivery of acknowledgments to waiting callers.
//!
//! The relay consumes the outbound channel in auto-acknowledge mode: each
//! message is acknowledged on receipt, whatever happens next. A malformed
//! payload or an acknowledgment with no matching pending entry is logged
//! and skipped - redelivery semantics were already given up when the
//! channel was subscribed auto-acknowledge, so treating either as a
//! processing error would buy nothing. One bad message must never stop
//! consumption of the ones behind it.

use crate::correlation::CorrelationStore;
use futures::StreamExt;
use logbridge_core::broker::{Broker, BrokerError};
use logbridge_core::message::{ResponseEnvelope, WireMessage};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Consumer loop completing pending submissions from the outbound channel.
pub struct ResponseRelay {
    broker: Arc<dyn Broker>,
    correlations: Arc<CorrelationStore>,
    outbound_channel: String,
}

impl ResponseRelay {
    /// Create a relay consuming `outbound_channel`.
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        correlations: Arc<CorrelationStore>,
        outbound_channel: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            correlations,
            outbound_channel: outbound_channel.into(),
        }
    }

    /// Consume the outbound channel until the shutdown signal fires.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] only if the subscription cannot be
    /// established; everything after that is logged and skipped.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), BrokerError> {
        let mut stream = self.broker.consume(&self.outbound_channel).await?;
        tracing::info!(channel = %self.outbound_channel, "Response relay started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Response relay stopping");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(payload)) => self.deliver(&payload),
                    Some(Err(error)) => {
                        tracing::warn!(error = %error, "Transport error on acknowledgment channel");
                    }
                    None => {
                        tracing::warn!(channel = %self.outbound_channel, "Acknowledgment stream ended");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Hand one received acknowledgment to the correlation store.
    pub fn deliver(&self, payload: &[u8]) {
        match ResponseEnvelope::from_json(payload) {
            Ok(envelope) => {
                let id = envelope.id.clone();
                if self.correlations.complete(&id, envelope) {
                    tracing::debug!(id = %id, "Acknowledgment delivered");
                    metrics::counter!("relay.completed").increment(1);
                } else {
                    tracing::warn!(id = %id, "Correlation miss for acknowledgment");
                    metrics::counter!("relay.correlation_miss").increment(1);
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "Discarding malformed acknowledgment");
                metrics::counter!("relay.malformed").increment(1);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use logbridge_core::message::ErrorCode;
    use logbridge_testing::InMemoryBroker;
    use std::time::Duration;

    fn relay(broker: &InMemoryBroker) -> (Arc<ResponseRelay>, Arc<CorrelationStore>) {
        let correlations = Arc::new(CorrelationStore::default());
        let relay = Arc::new(ResponseRelay::new(
            Arc::new(broker.clone()),
            Arc::clone(&correlations),
            "responses_queue",
        ));
        (relay, correlations)
    }

    #[tokio::test]
    async fn delivers_matching_acknowledgment() {
        let broker = InMemoryBroker::new();
        let (relay, correlations) = relay(&broker);
        let ticket = correlations.register("id-1").unwrap();

        relay.deliver(&ResponseEnvelope::ok("id-1".to_string()).to_json().unwrap());

        let resolved = ticket.wait().await.unwrap();
        assert_eq!(resolved.id, "id-1");
        assert_eq!(resolved.error_code, ErrorCode::Ok);
    }

    #[tokio::test]
    async fn unknown_id_and_garbage_do_not_stop_the_loop() {
        let broker = InMemoryBroker::new();
        let (relay, correlations) = relay(&broker);
        let ticket = correlations.register("id-known").unwrap();

        // A correlation miss, a malformed payload, then the real one.
        broker
            .publish(
                "responses_queue",
                &ResponseEnvelope::ok("id-unknown".to_string()).to_json().unwrap(),
            )
            .await
            .unwrap();
        broker.publish("responses_queue", b"not json").await.unwrap();
        broker
            .publish(
                "responses_queue",
                &ResponseEnvelope::ok("id-known".to_string()).to_json().unwrap(),
            )
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.run(shutdown_rx).await })
        };

        let resolved = tokio::time::timeout(Duration::from_secs(5), ticket.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, "id-known");

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let broker = InMemoryBroker::new();
        let (relay, _) = relay(&broker);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.run(shutdown_rx).await })
        };

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
