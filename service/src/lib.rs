//! Pipeline components bridging synchronous callers to the asynchronous
//! log channels.
//!
//! A submission flows through four cooperating pieces:
//!
//! 1. [`gateway::LogGateway`] validates caller input, registers a pending
//!    completion in the [`correlation::CorrelationStore`], and publishes the
//!    entry to the inbound channel.
//! 2. [`ingestion::IngestionProcessor`] consumes the inbound channel
//!    transactionally: persist the entry, publish the acknowledgment, commit
//!    - or roll back and let the broker redeliver.
//! 3. [`relay::ResponseRelay`] consumes the outbound channel in
//!    auto-acknowledge mode and completes the matching pending entry.
//! 4. The caller awaits the [`gateway::SubmitHandle`], which resolves with
//!    the acknowledgment or reports expiry once the pending entry's
//!    inactivity window lapses.
//!
//! The correlation store is the only state shared between unrelated tasks;
//! everything else owns its consumer exclusively.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod correlation;
pub mod gateway;
pub mod ingestion;
pub mod relay;

pub use config::{ConfigError, ServiceConfig};
pub use correlation::{CorrelationStore, PendingExpired, PendingTicket};
pub use gateway::{GatewayError, LogGateway, LogSubmission, SubmitHandle};
pub use ingestion::{IngestionProcessor, UnitFailure, UnitOutcome};
pub use relay::ResponseRelay;
