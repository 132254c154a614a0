//! Broker abstraction over the two durable channels.
//!
//! The pipeline consumes the broker through this boundary only: the gateway
//! publishes submissions to the inbound channel, the ingestion processor
//! consumes the inbound channel transactionally, and the response relay
//! consumes the outbound channel in auto-acknowledge mode.
//!
//! # Delivery Semantics
//!
//! - **Auto-acknowledge** ([`Broker::consume`]): each message is
//!   acknowledged on receipt. A consumer that fails to act on a message has
//!   no way to get it back - appropriate for the acknowledgment channel,
//!   where a miss is deliberately tolerated.
//! - **Transactional** ([`Broker::consume_transactional`]): one receive plus
//!   any publishes form a single unit. [`TransactionalConsumer::commit`]
//!   acknowledges the consumed message and makes the produced messages
//!   visible together; [`TransactionalConsumer::rollback`] discards the
//!   produced messages and returns the consumed message for redelivery.
//!
//! # Dyn Compatibility
//!
//! Methods return explicit `Pin<Box<dyn Future>>` instead of `async fn` so
//! the pipeline components can hold `Arc<dyn Broker>` and swap the Kafka
//! implementation for the in-memory one in tests.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a channel.
    #[error("Publish failed for channel '{channel}': {reason}")]
    PublishFailed {
        /// The channel that failed.
        channel: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to start consuming a channel.
    #[error("Subscription failed for channel '{channel}': {reason}")]
    SubscriptionFailed {
        /// The channel that failed to subscribe.
        channel: String,
        /// The reason for failure.
        reason: String,
    },

    /// A transactional begin/commit/rollback operation failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Network or transport error while receiving.
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Stream of raw message payloads from an auto-acknowledge subscription.
///
/// Each item is a `Result`: a received payload, or a transport-level error.
/// Errors do not terminate the stream; consumers log and continue.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, BrokerError>> + Send>>;

/// Trait for broker implementations.
///
/// All implementations must be `Send + Sync`: the gateway publishes from
/// concurrent handler tasks while the consumer loops run on their own tasks.
pub trait Broker: Send + Sync {
    /// Publish a raw payload to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the message could not be
    /// handed to the broker durably.
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Consume a channel in auto-acknowledge mode.
    ///
    /// Messages are acknowledged on receipt, independent of what the
    /// consumer does with them afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn consume(
        &self,
        channel: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>>;

    /// Consume a channel in transactional mode.
    ///
    /// The returned consumer scopes one receive and any number of publishes
    /// to a single unit, committed or rolled back atomically.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the subscription
    /// cannot be established, or [`BrokerError::TransactionFailed`] if the
    /// transactional session cannot be initialized.
    fn consume_transactional(
        &self,
        channel: &str,
    ) -> Pin<
        Box<dyn Future<Output = Result<Box<dyn TransactionalConsumer>, BrokerError>> + Send + '_>,
    >;
}

/// One transactional session over an inbound channel.
///
/// The protocol per unit is strict: `receive` → zero or more `publish` →
/// exactly one of `commit` or `rollback`. The consumer owns the received
/// message until the unit resolves; nothing published within the unit is
/// observable before `commit`.
pub trait TransactionalConsumer: Send {
    /// Receive the next message, opening a new unit.
    ///
    /// Blocks until a message is available.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TransportError`] if receiving fails.
    fn receive(&mut self)
    -> Pin<Box<dyn Future<Output = Result<Vec<u8>, BrokerError>> + Send + '_>>;

    /// Publish a payload within the current unit.
    ///
    /// The message becomes visible to consumers of `channel` only when the
    /// unit commits.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the payload cannot be
    /// staged.
    fn publish(
        &mut self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Commit the current unit.
    ///
    /// Acknowledges the consumed message and releases the staged publishes
    /// together.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TransactionFailed`] if the commit does not
    /// complete; the unit must then be treated as rolled back.
    fn commit(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Roll back the current unit.
    ///
    /// Discards the staged publishes and returns the consumed message to
    /// the channel for redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TransactionFailed`] if the rollback could not
    /// be signaled to the broker.
    fn rollback(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}
