//! In-memory broker with transactional channel semantics.

use logbridge_core::broker::{Broker, BrokerError, MessageStream, TransactionalConsumer};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

#[derive(Default)]
struct Channel {
    messages: VecDeque<Vec<u8>>,
    notify: Arc<Notify>,
}

type Channels = Arc<Mutex<HashMap<String, Channel>>>;

fn lock(channels: &Mutex<HashMap<String, Channel>>) -> std::sync::MutexGuard<'_, HashMap<String, Channel>> {
    channels.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pop the next message from a channel, waiting until one arrives.
async fn pop(channels: &Mutex<HashMap<String, Channel>>, channel: &str) -> Vec<u8> {
    loop {
        let notify = {
            let mut map = lock(channels);
            let chan = map.entry(channel.to_string()).or_default();
            if let Some(msg) = chan.messages.pop_front() {
                return msg;
            }
            Arc::clone(&chan.notify)
        };
        notify.notified().await;
    }
}

fn push_back(channels: &Mutex<HashMap<String, Channel>>, channel: &str, payload: Vec<u8>) {
    let mut map = lock(channels);
    let chan = map.entry(channel.to_string()).or_default();
    chan.messages.push_back(payload);
    chan.notify.notify_one();
}

fn push_front(channels: &Mutex<HashMap<String, Channel>>, channel: &str, payload: Vec<u8>) {
    let mut map = lock(channels);
    let chan = map.entry(channel.to_string()).or_default();
    chan.messages.push_front(payload);
    chan.notify.notify_one();
}

/// In-memory [`Broker`] implementation for tests.
///
/// Channels are competing-consumer queues: each message is delivered to
/// exactly one consumer. Transactional consumption stages the in-flight
/// message and any publishes until the unit resolves; rollback returns the
/// message to the **front** of its queue, so redelivery order matches a
/// durable broker's.
///
/// Cloning is cheap and shares the underlying channels, so a test can hold
/// one handle for publishing and hand clones to the pipeline components.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    channels: Channels,
    fail_publish: Arc<AtomicBool>,
}

impl InMemoryBroker {
    /// Create a new broker with no channels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle publish failure injection: while `true`, every direct
    /// [`Broker::publish`] fails. Transactional publishes are unaffected.
    pub fn set_publish_failing(&self, failing: bool) {
        self.fail_publish.store(failing, Ordering::SeqCst);
    }

    /// Number of messages currently queued on a channel.
    ///
    /// Messages held in-flight by an open transactional unit are not
    /// counted; they reappear here after a rollback.
    #[must_use]
    pub fn depth(&self, channel: &str) -> usize {
        lock(&self.channels)
            .get(channel)
            .map_or(0, |c| c.messages.len())
    }
}

impl Broker for InMemoryBroker {
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let channel = channel.to_string();
        let payload = payload.to_vec();
        Box::pin(async move {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(BrokerError::PublishFailed {
                    channel,
                    reason: "injected failure".to_string(),
                });
            }
            push_back(&self.channels, &channel, payload);
            Ok(())
        })
    }

    fn consume(
        &self,
        channel: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>> {
        let channel = channel.to_string();
        let channels = Arc::clone(&self.channels);
        Box::pin(async move {
            let stream = async_stream::stream! {
                loop {
                    let payload = pop(&channels, &channel).await;
                    yield Ok(payload);
                    // `pop` never returns `None`, so this loop never exits;
                    // the unreachable `break` only makes the generator body
                    // resolve to `()` (not `!`), which `async_stream` requires
                    // under the 2024 edition's never-type fallback.
                    if false {
                        break;
                    }
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
        let channels = Arc::clone(&self.channels);
        Box::pin(async move {
            Ok(Box::new(InMemoryTransactionalConsumer {
                channels,
                channel,
                in_flight: None,
                staged: Vec::new(),
            }) as Box<dyn TransactionalConsumer>)
        })
    }
}

/// Transactional session over one in-memory channel.
struct InMemoryTransactionalConsumer {
    channels: Channels,
    channel: String,
    /// The received message of the open unit, kept for redelivery.
    in_flight: Option<Vec<u8>>,
    /// Publishes staged within the open unit.
    staged: Vec<(String, Vec<u8>)>,
}

impl TransactionalConsumer for InMemoryTransactionalConsumer {
    fn receive(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, BrokerError>> + Send + '_>> {
        Box::pin(async move {
            if self.in_flight.is_some() {
                return Err(BrokerError::TransactionFailed(
                    "previous unit not committed or rolled back".to_string(),
                ));
            }
            let payload = pop(&self.channels, &self.channel).await;
            self.in_flight = Some(payload.clone());
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
            if self.in_flight.is_none() {
                return Err(BrokerError::PublishFailed {
                    channel,
                    reason: "no open unit".to_string(),
                });
            }
            self.staged.push((channel, payload));
            Ok(())
        })
    }

    fn commit(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            if self.in_flight.take().is_none() {
                return Err(BrokerError::TransactionFailed(
                    "commit without an open unit".to_string(),
                ));
            }
            for (channel, payload) in self.staged.drain(..) {
                push_back(&self.channels, &channel, payload);
            }
            Ok(())
        })
    }

    fn rollback(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            let Some(payload) = self.in_flight.take() else {
                return Err(BrokerError::TransactionFailed(
                    "rollback without an open unit".to_string(),
                ));
            };
            self.staged.clear();
            push_front(&self.channels, &self.channel, payload);
            tracing::debug!(channel = %self.channel, "Unit rolled back, message requeued");
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn broker_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<InMemoryBroker>();
        assert_sync::<InMemoryBroker>();
    }

    #[tokio::test]
    async fn publish_then_consume() {
        let broker = InMemoryBroker::new();
        broker.publish("logs", b"one").await.unwrap();
        broker.publish("logs", b"two").await.unwrap();

        let mut stream = broker.consume("logs").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), b"one");
        assert_eq!(stream.next().await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn consume_waits_for_later_publish() {
        let broker = InMemoryBroker::new();
        let mut stream = broker.consume("logs").await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            publisher.publish("logs", b"late").await.unwrap();
        });

        assert_eq!(stream.next().await.unwrap().unwrap(), b"late");
    }

    #[tokio::test]
    async fn commit_releases_staged_publishes() {
        let broker = InMemoryBroker::new();
        broker.publish("in", b"request").await.unwrap();

        let mut consumer = broker.consume_transactional("in").await.unwrap();
        let received = consumer.receive().await.unwrap();
        assert_eq!(received, b"request");

        consumer.publish("out", b"response").await.unwrap();
        // Not visible before commit.
        assert_eq!(broker.depth("out"), 0);

        consumer.commit().await.unwrap();
        assert_eq!(broker.depth("out"), 1);
        assert_eq!(broker.depth("in"), 0);
    }

    #[tokio::test]
    async fn rollback_requeues_and_discards_staged() {
        let broker = InMemoryBroker::new();
        broker.publish("in", b"first").await.unwrap();
        broker.publish("in", b"second").await.unwrap();

        let mut consumer = broker.consume_transactional("in").await.unwrap();
        let received = consumer.receive().await.unwrap();
        assert_eq!(received, b"first");
        consumer.publish("out", b"response").await.unwrap();

        consumer.rollback().await.unwrap();

        // Nothing escaped the unit, and the message is redelivered first.
        assert_eq!(broker.depth("out"), 0);
        assert_eq!(broker.depth("in"), 2);
        assert_eq!(consumer.receive().await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn receive_with_open_unit_is_rejected() {
        let broker = InMemoryBroker::new();
        broker.publish("in", b"a").await.unwrap();
        broker.publish("in", b"b").await.unwrap();

        let mut consumer = broker.consume_transactional("in").await.unwrap();
        consumer.receive().await.unwrap();
        assert!(consumer.receive().await.is_err());
    }
}
