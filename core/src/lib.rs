//! Core types and trait boundaries for the logbridge pipeline.
//!
//! This crate defines the shared vocabulary of the system:
//!
//! - [`message`]: the wire types carried over the broker channels -
//!   [`message::LogEntry`] travels inbound, [`message::ResponseEnvelope`]
//!   travels outbound, correlated by id.
//! - [`broker`]: the [`broker::Broker`] trait abstracting the two durable
//!   channels, including transactional consumption for the ingestion side.
//! - [`store`]: the [`store::LogStore`] trait abstracting durable
//!   persistence of log records.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   inbound    ┌───────────────────┐
//! │   Gateway   │─────────────▶│ IngestionProcessor│──▶ LogStore
//! └──────▲──────┘   channel    └─────────┬─────────┘
//!        │                               │ outbound
//!        │         ┌───────────────┐     │ channel
//!        └─────────│ ResponseRelay │◀────┘
//!   completes      └───────────────┘
//!   pending handle
//! ```
//!
//! The traits here use explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so implementations can be held as trait objects
//! (`Arc<dyn Broker>`, `Arc<dyn LogStore>`) by the pipeline components.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod message;
pub mod store;

pub use broker::{Broker, BrokerError, MessageStream, TransactionalConsumer};
pub use message::{ErrorCode, LogEntry, ResponseEnvelope, WireError, WireMessage};
pub use store::{LogStore, StoreError};
