use serde::Serialize;

use crate::common::types::{NodeId, now_ms};

/// Every failure the control plane reports synchronously.
///
/// Node crashes and heartbeat evictions are never returned from a call; they
/// surface as [`crate::player::PlayerEvent::NodeLost`].
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("{0} is not a live node")]
    NodeNotFound(NodeId),

    #[error("session {0} is not bound to a node")]
    NodeUnavailable(String),

    #[error("node did not become ready within {timeout_ms}ms")]
    SpawnTimeout { timeout_ms: u64 },

    #[error("failed to spawn node: {0}")]
    SpawnFailed(String),

    #[error("play request received but no track was provided")]
    NoPlayableTrack,

    #[error("could not extract stream for track {title}{}", format_reason(.reason))]
    StreamResolutionFailed {
        title: String,
        reason: Option<String>,
    },

    #[error("queue is full ({capacity} tracks)")]
    QueueCapacityExceeded { capacity: usize },

    #[error("track {0} is not in the queue")]
    TrackNotFound(String),

    #[error("track {0} is already in the queue")]
    DuplicateTrack(String),

    #[error("index {index} is out of range for a queue of {len} tracks")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to deserialize: {0}")]
    DeserializationFailed(String),

    #[error("failed to serialize: {0}")]
    SerializationFailed(String),
}

pub type PlayerResult<T> = Result<T, PlayerError>;

fn format_reason(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

/// JSON error body returned by the status API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// HTTP status code.
    pub status: u16,
    /// HTTP status reason phrase (e.g. "Not Found").
    pub error: String,
    pub message: String,
    /// The request path that caused the error.
    pub path: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: now_ms(),
            status: 404,
            error: "Not Found".into(),
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn internal(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: now_ms(),
            status: 500,
            error: "Internal Server Error".into(),
            message: message.into(),
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_failure_message_includes_reason() {
        let err = PlayerError::StreamResolutionFailed {
            title: "Song".into(),
            reason: Some("all extractors failed".into()),
        };
        assert_eq!(
            err.to_string(),
            "could not extract stream for track Song: all extractors failed"
        );

        let err = PlayerError::StreamResolutionFailed {
            title: "Song".into(),
            reason: None,
        };
        assert_eq!(err.to_string(), "could not extract stream for track Song");
    }

    #[test]
    fn test_api_error_serializes_camelcase() {
        let body = serde_json::to_value(ApiError::not_found("Session not found", "/v1/sessions/1"))
            .unwrap();
        assert_eq!(body["status"], 404);
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["path"], "/v1/sessions/1");
        assert!(body.get("timestamp").is_some());
    }
}
