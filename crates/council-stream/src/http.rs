use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use tracing::{debug, instrument};

use council_core::{AdvisorBackend, AdvisorId, AdvisorRequest, ByteStream, FrameFormat, StreamError};
use council_settings::{AdvisorSettings, StreamSettings};

use crate::decoded::DEFAULT_IDLE_TIMEOUT;

/// Bytes of a non-success body kept for the failure message.
const MAX_ERROR_BODY_BYTES: usize = 2048;

/// Advisor backend reached over HTTP: `POST <endpoint>` with `{"message": ..}`.
pub struct HttpBackend {
    client: reqwest::Client,
    advisor: AdvisorId,
    name: String,
    endpoint: String,
    format: FrameFormat,
    error_body_timeout: Duration,
}

impl HttpBackend {
    pub fn new(
        advisor: AdvisorId,
        name: impl Into<String>,
        endpoint: impl Into<String>,
        format: FrameFormat,
        connect_timeout: Duration,
    ) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            advisor,
            name: name.into(),
            endpoint: endpoint.into(),
            format,
            error_body_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    pub fn from_settings(
        advisor: AdvisorId,
        settings: &AdvisorSettings,
        stream: &StreamSettings,
    ) -> Result<Self, StreamError> {
        Self::new(
            advisor,
            settings.label.clone(),
            settings.endpoint.clone(),
            settings.format,
            stream.connect_timeout(),
        )
        .map(|backend| backend.with_error_body_timeout(stream.idle_timeout()))
    }

    /// Bound on reading the body of a non-success response.
    pub fn with_error_body_timeout(mut self, timeout: Duration) -> Self {
        self.error_body_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AdvisorBackend for HttpBackend {
    fn advisor(&self) -> AdvisorId {
        self.advisor
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn frame_format(&self) -> FrameFormat {
        self.format
    }

    #[instrument(skip(self, request), fields(advisor = %self.advisor, endpoint = %self.endpoint))]
    async fn open(&self, request: &AdvisorRequest) -> Result<ByteStream, StreamError> {
        let accept = match self.format {
            FrameFormat::EventStream => "text/event-stream",
            FrameFormat::PlainText => "text/plain",
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, accept)
            .json(request)
            .send()
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = read_error_body(resp, self.error_body_timeout).await;
            return Err(StreamError::from_status(status, &body));
        }
        debug!(status = resp.status().as_u16(), "advisor stream opened");

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::TerminatedEarly(e.to_string())));
        Ok(Box::pin(body))
    }
}

/// Read at most `MAX_ERROR_BODY_BYTES` of an error body. A body that stalls
/// yields whatever arrived before `timeout`.
async fn read_error_body(resp: reqwest::Response, timeout: Duration) -> String {
    let mut body = Vec::new();
    let mut chunks = resp.bytes_stream();
    let read = async {
        while let Some(Ok(chunk)) = chunks.next().await {
            body.extend_from_slice(&chunk);
            if body.len() >= MAX_ERROR_BODY_BYTES {
                break;
            }
        }
    };
    if tokio::time::timeout(timeout, read).await.is_err() {
        debug!(read = body.len(), "error body stalled, giving up");
    }
    body.truncate(MAX_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&body).into_owned()
}
