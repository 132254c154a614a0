//! Axum HTTP surface for the logbridge pipeline.
//!
//! One operation is exposed: `POST /log/message` accepts a form-urlencoded
//! log submission and answers with the pipeline's acknowledgment once the
//! asynchronous round trip completes. The handler layer stays thin - it
//! parses the request, hands it to the [`logbridge_service::LogGateway`],
//! and maps the outcome to HTTP:
//!
//! | Outcome                  | Status |
//! |--------------------------|--------|
//! | Acknowledged             | 200    |
//! | Missing/malformed field  | 400    |
//! | Inbound publish failed   | 500    |
//! | Pending entry expired    | 504    |
//!
//! A `GET /health` liveness endpoint and an `X-Correlation-ID`
//! request/response middleware round out the surface.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

// Re-export key types for convenience
pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router over the given state.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/log/message", post(handlers::logs::submit_log))
        .route("/health", get(handlers::health::health_check))
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
