//! Synchronous-looking entry point over the asynchronous pipeline.
//!
//! [`LogGateway::submit`] validates caller input, assigns the submission its
//! id, registers the pending completion **before** publishing (closing the
//! race where the acknowledgment could arrive first), and hands back a
//! [`SubmitHandle`]. The handle resolves once the response relay completes
//! the pending entry, or reports [`GatewayError::TimedOut`] after the
//! correlation store evicts it.

use crate::correlation::CorrelationStore;
use logbridge_core::broker::{Broker, BrokerError};
use logbridge_core::message::{LogEntry, ResponseEnvelope, WireError, WireMessage};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced synchronously to the submitting caller.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A required field is missing or malformed; nothing was registered or
    /// published.
    #[error("Invalid submission: {0}")]
    Validation(String),

    /// The submission could not be encoded for the wire.
    #[error(transparent)]
    Encode(#[from] WireError),

    /// An entry with the generated id is already pending.
    #[error("Submission id '{id}' is already pending")]
    DuplicatePending {
        /// The colliding submission id.
        id: String,
    },

    /// The inbound publish failed; the submission was not enqueued.
    #[error("Failed to enqueue submission: {0}")]
    Broker(#[from] BrokerError),

    /// The pending entry expired before an acknowledgment arrived.
    #[error("No acknowledgment for submission '{id}' before expiry")]
    TimedOut {
        /// The submission id whose acknowledgment never arrived.
        id: String,
    },
}

/// Raw caller input for one log submission.
///
/// Every field is required; [`LogGateway::submit`] rejects the submission
/// before any side effect when one is absent or blank.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LogSubmission {
    /// The log text.
    pub payload: Option<String>,
    /// Hostname of the logging machine.
    pub hostname: Option<String>,
    /// Integer severity level.
    pub level: Option<i32>,
    /// Application that produced the log line.
    pub application: Option<String>,
    /// Epoch milliseconds of the log line.
    pub timestamp: Option<i64>,
}

impl LogSubmission {
    fn require_text(value: Option<&String>, field: &str) -> Result<String, GatewayError> {
        match value {
            Some(text) if !text.trim().is_empty() => Ok(text.clone()),
            Some(_) => Err(GatewayError::Validation(format!("'{field}' is blank"))),
            None => Err(GatewayError::Validation(format!("'{field}' is required"))),
        }
    }

    fn into_entry(self, id: String) -> Result<LogEntry, GatewayError> {
        let payload = Self::require_text(self.payload.as_ref(), "payload")?;
        let hostname = Self::require_text(self.hostname.as_ref(), "hostname")?;
        let application = Self::require_text(self.application.as_ref(), "application")?;
        let level = self
            .level
            .ok_or_else(|| GatewayError::Validation("'level' is required".to_string()))?;
        let timestamp = self
            .timestamp
            .ok_or_else(|| GatewayError::Validation("'timestamp' is required".to_string()))?;
        if timestamp < 0 {
            return Err(GatewayError::Validation(
                "'timestamp' must not be negative".to_string(),
            ));
        }
        Ok(LogEntry::new(
            id,
            timestamp,
            application,
            hostname,
            level,
            payload,
        ))
    }
}

/// One in-flight submission, held by the original caller.
///
/// Wraps the single-resolution pending ticket together with the assigned
/// submission id.
#[derive(Debug)]
pub struct SubmitHandle {
    id: String,
    ticket: crate::correlation::PendingTicket,
}

impl SubmitHandle {
    /// The id assigned to this submission.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the pipeline's acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::TimedOut`] if the pending entry expired
    /// before an acknowledgment arrived.
    pub async fn wait(self) -> Result<ResponseEnvelope, GatewayError> {
        let id = self.id;
        self.ticket
            .wait()
            .await
            .map_err(|_| GatewayError::TimedOut { id })
    }
}

/// Entry point that turns one validated submission into a published inbound
/// message plus a pending completion.
pub struct LogGateway {
    broker: Arc<dyn Broker>,
    correlations: Arc<CorrelationStore>,
    inbound_channel: String,
}

impl LogGateway {
    /// Create a gateway publishing to `inbound_channel`.
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        correlations: Arc<CorrelationStore>,
        inbound_channel: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            correlations,
            inbound_channel: inbound_channel.into(),
        }
    }

    /// Submit a log record to the pipeline.
    ///
    /// On success the record is durably enqueued and a [`SubmitHandle`] is
    /// returned; resolution happens asynchronously. On failure nothing
    /// remains registered: a failed publish eagerly discards the pending
    /// entry instead of leaving it to expire.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Validation`] for missing or malformed fields.
    /// - [`GatewayError::Broker`] if the inbound publish fails.
    pub async fn submit(&self, submission: LogSubmission) -> Result<SubmitHandle, GatewayError> {
        let id = Uuid::new_v4().to_string();
        let entry = submission.into_entry(id.clone())?;
        let payload = entry.to_json()?;

        tracing::info!(
            id = %entry.id,
            application = %entry.application,
            hostname = %entry.hostname,
            level = entry.level,
            "Accepted log submission"
        );

        let Some(ticket) = self.correlations.register(&id) else {
            return Err(GatewayError::DuplicatePending { id });
        };

        if let Err(error) = self.broker.publish(&self.inbound_channel, &payload).await {
            tracing::error!(id = %id, error = %error, "Inbound publish failed");
            self.correlations.discard(&id);
            return Err(GatewayError::Broker(error));
        }

        metrics::counter!("gateway.submitted").increment(1);
        Ok(SubmitHandle { id, ticket })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use logbridge_testing::InMemoryBroker;
    use std::collections::HashSet;

    fn submission() -> LogSubmission {
        LogSubmission {
            payload: Some("m1".to_string()),
            hostname: Some("h1".to_string()),
            level: Some(1),
            application: Some("a1".to_string()),
            timestamp: Some(1000),
        }
    }

    fn gateway(broker: &InMemoryBroker) -> (LogGateway, Arc<CorrelationStore>) {
        let correlations = Arc::new(CorrelationStore::default());
        let gateway = LogGateway::new(
            Arc::new(broker.clone()),
            Arc::clone(&correlations),
            "logs_queue",
        );
        (gateway, correlations)
    }

    #[tokio::test]
    async fn submit_registers_before_publishing() {
        let broker = InMemoryBroker::new();
        let (gateway, correlations) = gateway(&broker);

        let handle = gateway.submit(submission()).await.unwrap();

        assert_eq!(broker.depth("logs_queue"), 1);
        assert_eq!(correlations.pending_count(), 1);

        // The published entry carries the handle's id.
        let mut consumer = broker.consume_transactional("logs_queue").await.unwrap();
        let bytes = consumer.receive().await.unwrap();
        let entry = LogEntry::from_json(&bytes).unwrap();
        assert_eq!(entry.id, handle.id());
        assert_eq!(entry.payload, "m1");
        assert_eq!(entry.timestamp, 1000);
    }

    #[tokio::test]
    async fn missing_field_fails_without_side_effects() {
        let broker = InMemoryBroker::new();
        let (gateway, correlations) = gateway(&broker);

        let incomplete = LogSubmission {
            payload: Some("m1".to_string()),
            ..LogSubmission::default()
        };
        let result = gateway.submit(incomplete).await;

        assert!(matches!(result, Err(GatewayError::Validation(_))));
        assert_eq!(broker.depth("logs_queue"), 0);
        assert_eq!(correlations.pending_count(), 0);
    }

    #[tokio::test]
    async fn blank_field_is_rejected() {
        let broker = InMemoryBroker::new();
        let (gateway, _) = gateway(&broker);

        let blank = LogSubmission {
            hostname: Some("   ".to_string()),
            ..submission()
        };
        assert!(matches!(
            gateway.submit(blank).await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn negative_timestamp_is_rejected() {
        let broker = InMemoryBroker::new();
        let (gateway, _) = gateway(&broker);

        let invalid = LogSubmission {
            timestamp: Some(-5),
            ..submission()
        };
        assert!(matches!(
            gateway.submit(invalid).await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn publish_failure_discards_pending_entry() {
        let broker = InMemoryBroker::new();
        broker.set_publish_failing(true);
        let (gateway, correlations) = gateway(&broker);

        let result = gateway.submit(submission()).await;

        assert!(matches!(result, Err(GatewayError::Broker(_))));
        assert_eq!(correlations.pending_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_submissions_get_distinct_ids() {
        let broker = InMemoryBroker::new();
        let correlations = Arc::new(CorrelationStore::default());
        let gateway = Arc::new(LogGateway::new(
            Arc::new(broker.clone()),
            Arc::clone(&correlations),
            "logs_queue",
        ));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let gateway = Arc::clone(&gateway);
            tasks.push(tokio::spawn(async move {
                gateway.submit(submission()).await.map(|h| h.id().to_string())
            }));
        }

        let mut ids = HashSet::new();
        for task in tasks {
            let id = task.await.unwrap().unwrap();
            assert!(ids.insert(id), "duplicate submission id generated");
        }
        assert_eq!(ids.len(), 32);
        assert_eq!(correlations.pending_count(), 32);
        assert_eq!(broker.depth("logs_queue"), 32);
    }
}
