//! Wire types carried over the broker channels.
//!
//! Two messages flow through the system: a [`LogEntry`] travels the inbound
//! channel from the gateway to the ingestion processor, and a
//! [`ResponseEnvelope`] travels the outbound channel back to the response
//! relay. Both are encoded as JSON and correlated by their shared `id`.
//!
//! # Wire Format
//!
//! ```json
//! { "id": "…", "timestamp": 1000, "application": "a1",
//!   "hostname": "h1", "level": 1, "payload": "m1" }
//! ```
//!
//! ```json
//! { "id": "…", "errorCode": 0 }
//! ```
//!
//! A `LogEntry` is created once by the gateway and never mutated afterwards;
//! the envelope's `id` must equal the entry's `id` for correlation to
//! succeed. Ids are never reused within a process lifetime.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Error types for wire encoding and decoding.
#[derive(Error, Debug)]
pub enum WireError {
    /// Failed to serialize a message to JSON.
    #[error("Failed to serialize message: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize a message from JSON.
    #[error("Failed to deserialize message: {0}")]
    DeserializationFailed(String),
}

/// A message that crosses a broker channel as JSON.
///
/// Provides the encode/decode pair used by every component that touches a
/// channel. The JSON field names are part of the external contract; changing
/// them breaks correlation with non-Rust producers and consumers.
pub trait WireMessage: Serialize + DeserializeOwned + Sized {
    /// Serialize this message to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::SerializationFailed`] if the message cannot be
    /// serialized. With plain string/integer fields this is effectively
    /// unreachable, but the transactional ingestion path still treats it as
    /// a rollback cause rather than panicking.
    fn to_json(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(|e| WireError::SerializationFailed(e.to_string()))
    }

    /// Deserialize a message from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::DeserializationFailed`] if the bytes are not
    /// valid JSON for this message shape.
    fn from_json(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(|e| WireError::DeserializationFailed(e.to_string()))
    }
}

/// An immutable log record submitted for persistence.
///
/// The `id` is assigned exactly once by the gateway at creation and is the
/// correlation key for the whole pipeline. The remaining fields are caller
/// input, validated before construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Globally unique submission id, assigned at creation.
    pub id: String,

    /// Epoch milliseconds supplied by the caller.
    pub timestamp: i64,

    /// Name of the application that produced the log line.
    pub application: String,

    /// Hostname of the machine that produced the log line.
    pub hostname: String,

    /// Integer severity level.
    pub level: i32,

    /// The log text itself.
    pub payload: String,
}

impl LogEntry {
    /// Create a new log entry.
    #[must_use]
    pub const fn new(
        id: String,
        timestamp: i64,
        application: String,
        hostname: String,
        level: i32,
        payload: String,
    ) -> Self {
        Self {
            id,
            timestamp,
            application,
            hostname,
            level,
            payload,
        }
    }
}

impl WireMessage for LogEntry {}

/// Acknowledgment correlated back to a [`LogEntry`] by id.
///
/// Built by the ingestion processor after the entry has been durably
/// persisted, inside the same transactional unit that consumed the entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// The id of the log entry this envelope acknowledges.
    pub id: String,

    /// Processing outcome, serialized as the integer `errorCode` field.
    #[serde(rename = "errorCode")]
    pub error_code: ErrorCode,
}

impl ResponseEnvelope {
    /// Create an acknowledgment for the given entry id.
    #[must_use]
    pub const fn new(id: String, error_code: ErrorCode) -> Self {
        Self { id, error_code }
    }

    /// Create a successful acknowledgment for the given entry id.
    #[must_use]
    pub const fn ok(id: String) -> Self {
        Self::new(id, ErrorCode::Ok)
    }
}

impl WireMessage for ResponseEnvelope {}

/// Processing outcome codes carried on the acknowledgment path.
///
/// Only [`ErrorCode::Ok`] is ever emitted: ingestion failures roll the
/// transactional unit back and rely on broker redelivery instead of sending
/// a negative acknowledgment. The remaining codes are kept for wire
/// compatibility with consumers of the envelope format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ErrorCode {
    /// Entry persisted and acknowledged.
    Ok,
    /// Persistence failed.
    StoreError,
    /// Broker interaction failed.
    BrokerError,
    /// Any other processing failure.
    GeneralError,
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Ok => 0,
            ErrorCode::StoreError => 1,
            ErrorCode::BrokerError => 2,
            ErrorCode::GeneralError => 3,
        }
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = UnknownErrorCode;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::StoreError),
            2 => Ok(Self::BrokerError),
            3 => Ok(Self::GeneralError),
            other => Err(UnknownErrorCode(other)),
        }
    }
}

/// An integer on the wire that maps to no known [`ErrorCode`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unknown error code: {0}")]
pub struct UnknownErrorCode(pub i32);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_entry() -> LogEntry {
        LogEntry::new(
            "log-1".to_string(),
            1000,
            "a1".to_string(),
            "h1".to_string(),
            1,
            "m1".to_string(),
        )
    }

    #[test]
    fn log_entry_json_field_names() {
        let bytes = sample_entry().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["id"], "log-1");
        assert_eq!(value["timestamp"], 1000);
        assert_eq!(value["application"], "a1");
        assert_eq!(value["hostname"], "h1");
        assert_eq!(value["level"], 1);
        assert_eq!(value["payload"], "m1");
    }

    #[test]
    fn envelope_serializes_error_code_as_integer() {
        let envelope = ResponseEnvelope::ok("log-1".to_string());
        let bytes = envelope.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["id"], "log-1");
        assert_eq!(value["errorCode"], 0);
    }

    #[test]
    fn envelope_roundtrip() {
        let envelope = ResponseEnvelope::new("log-2".to_string(), ErrorCode::StoreError);
        let bytes = envelope.to_json().unwrap();
        let decoded = ResponseEnvelope::from_json(&bytes).unwrap();
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn unknown_error_code_is_rejected() {
        let result = ResponseEnvelope::from_json(br#"{"id":"x","errorCode":42}"#);
        assert!(matches!(result, Err(WireError::DeserializationFailed(_))));
    }

    #[test]
    fn error_code_integer_mapping() {
        for (code, n) in [
            (ErrorCode::Ok, 0),
            (ErrorCode::StoreError, 1),
            (ErrorCode::BrokerError, 2),
            (ErrorCode::GeneralError, 3),
        ] {
            assert_eq!(i32::from(code), n);
            assert_eq!(ErrorCode::try_from(n).unwrap(), code);
        }
        assert_eq!(ErrorCode::try_from(7), Err(UnknownErrorCode(7)));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(LogEntry::from_json(b"not json").is_err());
        assert!(LogEntry::from_json(br#"{"id":"x"}"#).is_err());
    }

    proptest! {
        #[test]
        fn log_entry_roundtrip(
            id in "[a-f0-9-]{1,36}",
            timestamp in proptest::num::i64::ANY,
            application in ".{0,64}",
            hostname in ".{0,64}",
            level in proptest::num::i32::ANY,
            payload in ".{0,256}",
        ) {
            let entry = LogEntry::new(id, timestamp, application, hostname, level, payload);
            let bytes = entry.to_json().unwrap();
            let decoded = LogEntry::from_json(&bytes).unwrap();
            prop_assert_eq!(entry, decoded);
        }
    }
}
