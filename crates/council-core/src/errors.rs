use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Typed failure taxonomy for one advisor stream.
///
/// Only [`StreamError::Protocol`] is recoverable: a single malformed record is
/// skipped and decoding continues. Every other variant ends the affected
/// advisor's stream and nothing else.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("stream terminated early: {0}")]
    TerminatedEarly(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl StreamError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Short classification string for logging and the wire.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_error",
            Self::HttpStatus { .. } => "http_status",
            Self::Protocol(_) => "protocol_error",
            Self::Backend(_) => "backend_error",
            Self::TerminatedEarly(_) => "stream_terminated_early",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Build an HTTP status failure, keeping at most `MAX_BODY_CHARS` of the body.
    pub fn from_status(status: u16, body: &str) -> Self {
        const MAX_BODY_CHARS: usize = 512;
        let body = if body.chars().count() > MAX_BODY_CHARS {
            let mut cut: String = body.chars().take(MAX_BODY_CHARS).collect();
            cut.push('…');
            cut
        } else {
            body.to_string()
        };
        Self::HttpStatus { status, body }
    }
}

/// Serializable projection of a [`StreamError`], stored on failed messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: String,
    pub message: String,
}

impl From<&StreamError> for FailureInfo {
    fn from(e: &StreamError) -> Self {
        Self {
            kind: e.error_kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_protocol_errors_are_recoverable() {
        assert!(StreamError::Protocol("bad json".into()).is_recoverable());
        assert!(!StreamError::Transport("refused".into()).is_recoverable());
        assert!(!StreamError::from_status(500, "boom").is_recoverable());
        assert!(!StreamError::Backend("model crashed".into()).is_recoverable());
        assert!(!StreamError::TerminatedEarly("eof".into()).is_recoverable());
        assert!(!StreamError::Timeout(Duration::from_secs(2)).is_recoverable());
        assert!(!StreamError::Cancelled.is_recoverable());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(StreamError::Cancelled.error_kind(), "cancelled");
        assert_eq!(StreamError::Timeout(Duration::from_millis(1)).error_kind(), "timeout");
        assert_eq!(
            StreamError::TerminatedEarly("eof".into()).error_kind(),
            "stream_terminated_early"
        );
        assert_eq!(StreamError::from_status(502, "").error_kind(), "http_status");
    }

    #[test]
    fn from_status_truncates_long_bodies() {
        let body = "x".repeat(2_000);
        match StreamError::from_status(500, &body) {
            StreamError::HttpStatus { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.chars().count(), 513);
                assert!(body.ends_with('…'));
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[test]
    fn failure_info_from_stream_error() {
        let info = FailureInfo::from(&StreamError::Timeout(Duration::from_millis(2000)));
        assert_eq!(info.kind, "timeout");
        assert!(info.message.contains("timeout after"));
    }
}
