//! Health check endpoint.
//!
//! Used by load balancers and monitoring systems to verify the process is
//! up. It does not check dependencies; a broker or database outage shows up
//! as request failures and consumer-loop logs, not as a dead process.

use axum::http::StatusCode;

/// Simple liveness check.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
