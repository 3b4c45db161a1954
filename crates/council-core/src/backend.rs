use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::StreamError;
use crate::messages::AdvisorId;
use crate::stream::FrameFormat;

/// Raw response body of a backend request.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// JSON body sent to an advisor backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisorRequest {
    pub message: String,
}

impl AdvisorRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One advisor's text-generation endpoint.
///
/// `open` resolves once the response headers have been accepted; a refused
/// connection or a non-success status is an `Err`. The returned body is read
/// lazily and released when dropped.
#[async_trait]
pub trait AdvisorBackend: Send + Sync {
    fn advisor(&self) -> AdvisorId;
    fn name(&self) -> &str;
    fn frame_format(&self) -> FrameFormat;

    async fn open(&self, request: &AdvisorRequest) -> Result<ByteStream, StreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let json = serde_json::to_value(AdvisorRequest::new("Should I?")).unwrap();
        assert_eq!(json, serde_json::json!({"message": "Should I?"}));
    }
}
