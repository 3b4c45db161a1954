use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use council_core::{AdvisorBackend, AdvisorId, AdvisorRequest, ByteStream, FrameFormat, StreamError};

/// One step of a scripted response body.
#[derive(Clone, Debug)]
pub enum ScriptedChunk {
    Bytes(Bytes),
    /// Sleep before the next step.
    Pause(Duration),
    /// Fail the body read and end it.
    Error(StreamError),
    /// Never produce another chunk.
    Hang,
}

/// Pre-programmed responses for deterministic testing without a network.
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    Body(Vec<ScriptedChunk>),
    /// Non-success HTTP status from `open`.
    Status { status: u16, body: String },
    /// Fail `open` with this error.
    Fail(StreamError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<ScriptedResponse>),
    /// `open` never resolves.
    Hang,
}

impl ScriptedResponse {
    /// Event-stream body with one record per chunk followed by `[DONE]`.
    pub fn sse_text(chunks: &[&str]) -> Self {
        let mut steps: Vec<ScriptedChunk> = chunks
            .iter()
            .map(|c| ScriptedChunk::Bytes(Bytes::from(sse_record(c))))
            .collect();
        steps.push(ScriptedChunk::Bytes(Bytes::from_static(SSE_DONE.as_bytes())));
        Self::Body(steps)
    }

    /// Event-stream body with a pause between records, followed by `[DONE]`.
    pub fn sse_paced(chunks: &[&str], every: Duration) -> Self {
        let mut steps = Vec::new();
        for chunk in chunks {
            steps.push(ScriptedChunk::Pause(every));
            steps.push(ScriptedChunk::Bytes(Bytes::from(sse_record(chunk))));
        }
        steps.push(ScriptedChunk::Bytes(Bytes::from_static(SSE_DONE.as_bytes())));
        Self::Body(steps)
    }

    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        Self::Body(vec![ScriptedChunk::Bytes(bytes.into())])
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// One `data:` record carrying `text` as a chunk.
pub fn sse_record(text: &str) -> String {
    format!("data: {}\n\n", serde_json::json!({ "chunk": text }))
}

/// Backend that replays scripted responses in order, one per `open`.
pub struct ScriptedBackend {
    advisor: AdvisorId,
    name: String,
    format: FrameFormat,
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<AdvisorRequest>>,
    opens: AtomicUsize,
    inflight: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(advisor: AdvisorId, responses: Vec<ScriptedResponse>) -> Self {
        Self {
            advisor,
            name: format!("scripted-{advisor}"),
            format: FrameFormat::EventStream,
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            opens: AtomicUsize::new(0),
            inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Requests opened but not yet released (open pending or body alive).
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AdvisorRequest> {
        self.requests.lock().clone()
    }
}

struct InflightGuard(Arc<AtomicUsize>);

impl InflightGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AdvisorBackend for ScriptedBackend {
    fn advisor(&self) -> AdvisorId {
        self.advisor
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn frame_format(&self) -> FrameFormat {
        self.format
    }

    async fn open(&self, request: &AdvisorRequest) -> Result<ByteStream, StreamError> {
        let idx = self.opens.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let guard = InflightGuard::acquire(&self.inflight);

        let next = self.responses.lock().pop_front();
        let Some(mut current) = next else {
            return Err(StreamError::Transport(format!(
                "ScriptedBackend: no response configured for call {idx}"
            )));
        };

        loop {
            match current {
                ScriptedResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
                ScriptedResponse::Hang => futures::future::pending::<()>().await,
                ScriptedResponse::Fail(e) => return Err(e),
                ScriptedResponse::Status { status, body } => {
                    return Err(StreamError::from_status(status, &body))
                }
                ScriptedResponse::Body(steps) => return Ok(body_stream(steps, guard)),
            }
        }
    }
}

fn body_stream(steps: Vec<ScriptedChunk>, guard: InflightGuard) -> ByteStream {
    type Item = Result<Bytes, StreamError>;

    Box::pin(async_stream::stream! {
        let _guard = guard;
        for step in steps {
            match step {
                ScriptedChunk::Bytes(bytes) => {
                    let v: Item = Ok(bytes);
                    yield v;
                }
                ScriptedChunk::Pause(duration) => tokio::time::sleep(duration).await,
                ScriptedChunk::Error(error) => {
                    let v: Item = Err(error);
                    yield v;
                    break;
                }
                ScriptedChunk::Hang => futures::future::pending::<()>().await,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect_body(body: ByteStream) -> Vec<Result<Bytes, StreamError>> {
        body.collect().await
    }

    #[tokio::test]
    async fn replays_in_order_then_runs_out() {
        let backend = ScriptedBackend::new(
            AdvisorId::A,
            vec![
                ScriptedResponse::raw("first"),
                ScriptedResponse::status(503, "busy"),
            ],
        );
        let req = AdvisorRequest::new("q");

        let body = backend.open(&req).await.unwrap();
        let chunks = collect_body(body).await;
        assert_eq!(chunks, vec![Ok(Bytes::from("first"))]);

        let err = backend.open(&req).await.err().unwrap();
        assert_eq!(err, StreamError::from_status(503, "busy"));

        let err = backend.open(&req).await.err().unwrap();
        assert!(matches!(err, StreamError::Transport(msg) if msg.contains("call 2")));
        assert_eq!(backend.open_count(), 3);
        assert_eq!(backend.requests().len(), 3);
    }

    #[tokio::test]
    async fn inflight_tracks_body_lifetime() {
        let backend = ScriptedBackend::new(
            AdvisorId::B,
            vec![ScriptedResponse::Body(vec![
                ScriptedChunk::Bytes(Bytes::from("a")),
                ScriptedChunk::Hang,
            ])],
        );
        let mut body = backend.open(&AdvisorRequest::new("q")).await.unwrap();
        assert_eq!(backend.inflight(), 1);
        assert_eq!(body.next().await, Some(Ok(Bytes::from("a"))));
        drop(body);
        assert_eq!(backend.inflight(), 0);
    }

    #[tokio::test]
    async fn failed_open_releases_immediately() {
        let backend = ScriptedBackend::new(
            AdvisorId::A,
            vec![ScriptedResponse::Fail(StreamError::Transport("refused".into()))],
        );
        assert!(backend.open(&AdvisorRequest::new("q")).await.is_err());
        assert_eq!(backend.inflight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_response_waits() {
        let backend = ScriptedBackend::new(
            AdvisorId::A,
            vec![ScriptedResponse::delayed(
                Duration::from_secs(3),
                ScriptedResponse::sse_text(&["x"]),
            )],
        );
        let start = tokio::time::Instant::now();
        let body = backend.open(&AdvisorRequest::new("q")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
        let chunks = collect_body(body).await;
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn sse_record_escapes_text() {
        assert_eq!(sse_record("a \"quote\""), "data: {\"chunk\":\"a \\\"quote\\\"\"}\n\n");
    }
}
