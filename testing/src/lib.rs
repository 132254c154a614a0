//! # Logbridge Testing
//!
//! Testing doubles for the logbridge pipeline.
//!
//! This crate provides in-memory implementations of the two external
//! collaborators so the whole pipeline - gateway, ingestion processor,
//! response relay - runs at memory speed in tests:
//!
//! - [`InMemoryBroker`]: channel queues with real transactional semantics
//!   (staged publishes, front-of-queue redelivery on rollback).
//! - [`InMemoryLogStore`]: a map-backed store with failure injection for
//!   exercising the rollback path.
//!
//! ## Example
//!
//! ```
//! use logbridge_testing::InMemoryBroker;
//! use logbridge_core::Broker;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), logbridge_core::BrokerError> {
//! let broker = InMemoryBroker::new();
//! broker.publish("logs", b"payload").await?;
//! assert_eq!(broker.depth("logs"), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod broker;
mod store;

pub use broker::InMemoryBroker;
pub use store::InMemoryLogStore;
