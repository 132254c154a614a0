//! Application state for Axum handlers.

use logbridge_service::LogGateway;
use std::sync::Arc;

/// State shared across all HTTP handlers.
///
/// Holds the gateway that fronts the asynchronous pipeline; handlers never
/// touch the broker or the correlation store directly.
#[derive(Clone)]
pub struct AppState {
    gateway: Arc<LogGateway>,
}

impl AppState {
    /// Create state over the given gateway.
    #[must_use]
    pub fn new(gateway: Arc<LogGateway>) -> Self {
        Self { gateway }
    }

    /// The submission gateway.
    #[must_use]
    pub fn gateway(&self) -> &LogGateway {
        &self.gateway
    }
}
