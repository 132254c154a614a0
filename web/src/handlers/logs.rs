//! Log submission endpoint.

use crate::error::AppError;
use crate::state::AppState;
use axum::{Form, Json, extract::State};
use logbridge_core::message::ResponseEnvelope;
use logbridge_service::LogSubmission;

/// Submit a log record and wait for the pipeline's acknowledgment.
///
/// The response is produced only after the record has been durably
/// persisted and its acknowledgment has travelled back through the
/// outbound channel. If the pipeline never answers, the request fails with
/// 504 once the pending entry expires.
///
/// # Endpoint
///
/// ```text
/// POST /log/message
/// Content-Type: application/x-www-form-urlencoded
///
/// payload=m1&hostname=h1&level=1&application=a1&timestamp=1000
/// ```
///
/// # Response
///
/// ```json
/// { "id": "4bf1…", "errorCode": 0 }
/// ```
///
/// # Errors
///
/// - 400 when a required field is missing or malformed.
/// - 500 when the submission cannot be enqueued.
/// - 504 when no acknowledgment arrives before expiry.
pub async fn submit_log(
    State(state): State<AppState>,
    Form(submission): Form<LogSubmission>,
) -> Result<Json<ResponseEnvelope>, AppError> {
    let handle = state.gateway().submit(submission).await?;
    tracing::debug!(id = %handle.id(), "Submission enqueued, awaiting acknowledgment");

    let envelope = handle.wait().await?;
    Ok(Json(envelope))
}
