use serde::{Deserialize, Serialize};

use crate::errors::StreamError;

/// Events produced by the frame decoder. Framing is fully consumed before
/// this boundary.
///
/// Delta* → Done, with Error allowed anywhere. Nothing follows Done.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Delta { text: String },
    Done,
    Error { error: StreamError },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { text: text.into() }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Done => true,
            Self::Error { error } => !error.is_recoverable(),
            Self::Delta { .. } => false,
        }
    }
}

/// Wire framing used by an advisor backend's response body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    /// `data: {"chunk": ".."}` records terminated by `data: [DONE]`.
    #[default]
    EventStream,
    /// Raw UTF-8 text; the end of the body is the end of the stream.
    PlainText,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(!StreamEvent::delta("x").is_terminal());
        assert!(!StreamEvent::Error {
            error: StreamError::Protocol("bad".into())
        }
        .is_terminal());
        assert!(StreamEvent::Error {
            error: StreamError::Backend("boom".into())
        }
        .is_terminal());
    }

    #[test]
    fn frame_format_wire_names() {
        assert_eq!(
            serde_json::to_string(&FrameFormat::EventStream).unwrap(),
            "\"event_stream\""
        );
        let parsed: FrameFormat = serde_json::from_str("\"plain_text\"").unwrap();
        assert_eq!(parsed, FrameFormat::PlainText);
        assert_eq!(FrameFormat::default(), FrameFormat::EventStream);
    }
}
