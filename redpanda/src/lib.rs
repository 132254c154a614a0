//! Redpanda broker implementation for the logbridge pipeline.
//!
//! This crate provides a production [`Broker`] over rdkafka. Any
//! Kafka-compatible cluster works - Redpanda, Apache Kafka, AWS MSK - the
//! name records what we deploy against.
//!
//! # Channel Semantics
//!
//! - [`Broker::publish`] produces a raw payload to the channel's topic.
//! - [`Broker::consume`] is auto-acknowledge: offsets are committed by the
//!   client automatically, independent of what the caller does with each
//!   message. Used for the acknowledgment channel, where a dropped message
//!   is deliberately tolerated.
//! - [`Broker::consume_transactional`] binds one consumed message and the
//!   messages produced while handling it into a single Kafka transaction:
//!   `commit` sends the consumed offset and the produced messages atomically
//!   (`send_offsets_to_transaction` + `commit_transaction`); `rollback`
//!   aborts the transaction and seeks the consumer back so the message is
//!   redelivered. Consumers of the produced topic must read
//!   `read_committed` - both consumption modes here do.
//!
//! # Example
//!
//! ```no_run
//! use logbridge_redpanda::RedpandaBroker;
//! use logbridge_core::Broker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .build()?;
//!
//! broker.publish("logs_queue", br#"{"id":"..."}"#).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use logbridge_core::broker::{Broker, BrokerError, MessageStream, TransactionalConsumer};
use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Run one of rdkafka's blocking transaction calls off the async runtime.
async fn run_blocking<F>(task: F) -> Result<(), BrokerError>
where
    F: FnOnce() -> rdkafka::error::KafkaResult<()> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| BrokerError::TransactionFailed(format!("Blocking task failed: {e}")))?
        .map_err(|e| BrokerError::TransactionFailed(e.to_string()))
}

/// Kafka-compatible [`Broker`] implementation.
///
/// One shared producer handles direct publishes; each consumption call
/// creates its own consumer (and, for transactional mode, its own
/// transactional producer), so consumers can be opened during an explicit
/// startup phase and dropped on shutdown without affecting each other.
pub struct RedpandaBroker {
    /// Shared producer for direct publishes.
    producer: FutureProducer,
    /// Broker addresses (for creating consumers).
    brokers: String,
    /// Producer and transaction timeout.
    timeout: Duration,
    /// Consumer group ID (if explicitly set).
    consumer_group: Option<String>,
    /// Message buffer size for auto-acknowledge subscribers.
    buffer_size: usize,
    /// Auto offset reset policy.
    auto_offset_reset: String,
    /// Transactional id (if explicitly set).
    transactional_id: Option<String>,
}

impl RedpandaBroker {
    /// Create a broker with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be
    /// created from the given addresses.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the broker.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn group_id(&self, channel: &str) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| format!("logbridge-{channel}"))
    }

    fn transactional_id(&self, channel: &str) -> String {
        self.transactional_id
            .clone()
            .unwrap_or_else(|| format!("logbridge-{channel}-txn"))
    }

    fn create_consumer(&self, channel: &str, auto_commit: bool) -> Result<StreamConsumer, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", self.group_id(channel))
            .set("enable.auto.commit", if auto_commit { "true" } else { "false" })
            .set("isolation.level", "read_committed")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BrokerError::SubscriptionFailed {
                channel: channel.to_string(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer
            .subscribe(&[channel])
            .map_err(|e| BrokerError::SubscriptionFailed {
                channel: channel.to_string(),
                reason: format!("Failed to subscribe: {e}"),
            })?;
        Ok(consumer)
    }
}

/// Builder for configuring a [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    transactional_id: Option<String>,
}

impl RedpandaBrokerBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "1". Transactional producers always use "all".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send and transaction timeout.
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, a group is derived from the channel name
    /// (`logbridge-{channel}`), giving every instance of the service the
    /// competing-consumer semantics of a queue.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the message buffer size for auto-acknowledge subscriptions.
    ///
    /// Default: 1000.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where new consumer groups start reading: "earliest", "latest".
    ///
    /// Default: "latest".
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the transactional id used by transactional consumption.
    ///
    /// If not set, the id is derived from the channel name
    /// (`logbridge-{channel}-txn`). Deployments running more than one
    /// ingestion instance against the same channel MUST set a distinct id
    /// per instance, or the broker fences all but the newest producer.
    #[must_use]
    pub fn transactional_id(mut self, transactional_id: impl Into<String>) -> Self {
        self.transactional_id = Some(transactional_id.into());
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            BrokerError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            compression = self.compression.as_deref().unwrap_or("none"),
            buffer_size = self.buffer_size.unwrap_or(1000),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("latest"),
            "RedpandaBroker created"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "latest".to_string()),
            transactional_id: self.transactional_id,
        })
    }
}

impl Broker for RedpandaBroker {
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        // Clone data before moving into the async block.
        let channel = channel.to_string();
        let payload = payload.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::<(), _>::to(&channel).payload(&payload);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        channel = %channel,
                        partition = partition,
                        offset = offset,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        channel = %channel,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(BrokerError::PublishFailed {
                        channel,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn consume(
        &self,
        channel: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>> {
        let channel = channel.to_string();
        let buffer_size = self.buffer_size;

        Box::pin(async move {
            let consumer = self.create_consumer(&channel, true)?;

            tracing::info!(
                channel = %channel,
                group = %self.group_id(&channel),
                auto_commit = true,
                "Subscribed"
            );

            // Forward payloads through a channel; the spawned task owns the
            // consumer for its whole life.
            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    let result = match msg_result {
                        Ok(message) => {
                            tracing::trace!(
                                channel = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                "Received message"
                            );
                            Ok(message.payload().map(<[u8]>::to_vec).unwrap_or_default())
                        }
                        Err(e) => Err(BrokerError::TransportError(format!(
                            "Failed to receive message: {e}"
                        ))),
                    };

                    if tx.send(result).await.is_err() {
                        tracing::debug!("Subscriber dropped, exiting consumer task");
                        break;
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }

    fn consume_transactional(
        &self,
        channel: &str,
    ) -> Pin<
        Box<dyn Future<Output = Result<Box<dyn TransactionalConsumer>, BrokerError>> + Send + '_>,
    > {
        let channel = channel.to_string();

        Box::pin(async move {
            let consumer = self.create_consumer(&channel, false)?;
            let transactional_id = self.transactional_id(&channel);

            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("transactional.id", &transactional_id)
                .set("enable.idempotence", "true")
                .set("acks", "all")
                .set("message.timeout.ms", "5000")
                .create()
                .map_err(|e| {
                    BrokerError::ConnectionFailed(format!(
                        "Failed to create transactional producer: {e}"
                    ))
                })?;

            let timeout = self.timeout;
            {
                let producer = producer.clone();
                run_blocking(move || producer.init_transactions(Timeout::After(timeout))).await?;
            }

            tracing::info!(
                channel = %channel,
                group = %self.group_id(&channel),
                transactional_id = %transactional_id,
                "Transactional session opened"
            );

            Ok(Box::new(RedpandaTransactionalConsumer {
                consumer,
                producer,
                timeout,
                current: None,
            }) as Box<dyn TransactionalConsumer>)
        })
    }
}

/// Position of the message owned by the open unit.
struct CurrentMessage {
    topic: String,
    partition: i32,
    offset: i64,
}

/// Transactional session: one consumed message plus its produced messages
/// form a Kafka transaction.
struct RedpandaTransactionalConsumer {
    consumer: StreamConsumer,
    producer: FutureProducer,
    timeout: Duration,
    current: Option<CurrentMessage>,
}

impl RedpandaTransactionalConsumer {
    /// Abort the open transaction and seek back so the current message is
    /// redelivered on the next receive.
    async fn abort_unit(&mut self, current: CurrentMessage) -> Result<(), BrokerError> {
        let timeout = self.timeout;
        {
            let producer = self.producer.clone();
            run_blocking(move || producer.abort_transaction(Timeout::After(timeout))).await?;
        }

        self.consumer
            .seek(
                &current.topic,
                current.partition,
                Offset::Offset(current.offset),
                Timeout::After(self.timeout),
            )
            .map_err(|e| BrokerError::TransactionFailed(format!("Failed to seek back: {e}")))?;

        tracing::debug!(
            channel = %current.topic,
            partition = current.partition,
            offset = current.offset,
            "Unit aborted, message will be redelivered"
        );
        Ok(())
    }
}

impl TransactionalConsumer for RedpandaTransactionalConsumer {
    fn receive(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            if self.current.is_some() {
                return Err(BrokerError::TransactionFailed(
                    "previous unit not committed or rolled back".to_string(),
                ));
            }

            let (payload, current) = {
                let message = self
                    .consumer
                    .recv()
                    .await
                    .map_err(|e| BrokerError::TransportError(e.to_string()))?;
                (
                    message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    CurrentMessage {
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        offset: message.offset(),
                    },
                )
            };

            {
                let producer = self.producer.clone();
                run_blocking(move || producer.begin_transaction()).await?;
            }

            self.current = Some(current);
            Ok(payload)
        })
    }

    fn publish(
        &mut self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let channel = channel.to_string();
        let payload = payload.to_vec();
        Box::pin(async move {
            if self.current.is_none() {
                return Err(BrokerError::PublishFailed {
                    channel,
                    reason: "no open unit".to_string(),
                });
            }

            let record = FutureRecord::<(), _>::to(&channel).payload(&payload);
            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok(_) => Ok(()),
                Err((kafka_error, _)) => Err(BrokerError::PublishFailed {
                    channel,
                    reason: kafka_error.to_string(),
                }),
            }
        })
    }

    fn commit(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let Some(current) = self.current.take() else {
                return Err(BrokerError::TransactionFailed(
                    "commit without an open unit".to_string(),
                ));
            };

            let Some(group_metadata) = self.consumer.group_metadata() else {
                self.abort_unit(current).await?;
                return Err(BrokerError::TransactionFailed(
                    "consumer group metadata unavailable".to_string(),
                ));
            };

            let mut offsets = TopicPartitionList::new();
            if let Err(e) = offsets.add_partition_offset(
                &current.topic,
                current.partition,
                Offset::Offset(current.offset + 1),
            ) {
                self.abort_unit(current).await?;
                return Err(BrokerError::TransactionFailed(e.to_string()));
            }

            let timeout = self.timeout;
            let producer = self.producer.clone();
            let committed = run_blocking(move || {
                producer.send_offsets_to_transaction(
                    &offsets,
                    &group_metadata,
                    Timeout::After(timeout),
                )?;
                producer.commit_transaction(Timeout::After(timeout))
            })
            .await;

            match committed {
                Ok(()) => Ok(()),
                Err(error) => {
                    // A failed commit leaves the unit unresolved on the
                    // broker; abort and rewind so it is redelivered.
                    self.abort_unit(current).await?;
                    Err(error)
                }
            }
        })
    }

    fn rollback(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let Some(current) = self.current.take() else {
                return Err(BrokerError::TransactionFailed(
                    "rollback without an open unit".to_string(),
                ));
            };
            self.abort_unit(current).await
        })
    }
}
