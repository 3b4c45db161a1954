use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use council_core::{AdvisorBackend, AdvisorId, AdvisorRequest, StreamError, StreamEvent};

use crate::decoded::{DecodedStream, DEFAULT_IDLE_TIMEOUT};

/// Progress reported by a client run.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// Full text accumulated so far. Each snapshot extends the previous one.
    Snapshot { advisor: AdvisorId, text: String },
    /// Sent exactly once per run.
    Terminal {
        advisor: AdvisorId,
        result: Result<String, StreamError>,
    },
}

impl ClientEvent {
    pub fn advisor(&self) -> AdvisorId {
        match self {
            Self::Snapshot { advisor, .. } | Self::Terminal { advisor, .. } => *advisor,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Inflight,
    Done,
    Failed,
}

/// State of one request while it is being read.
struct AgentSession {
    advisor: AdvisorId,
    partial_text: String,
    state: SessionState,
}

impl AgentSession {
    fn new(advisor: AdvisorId) -> Self {
        Self {
            advisor,
            partial_text: String::new(),
            state: SessionState::Inflight,
        }
    }

    fn settle(&mut self, result: &Result<String, StreamError>) {
        self.state = match result {
            Ok(_) => SessionState::Done,
            Err(_) => SessionState::Failed,
        };
    }
}

/// Drives one advisor request from open to a single terminal result.
///
/// Never retries. The response body and decoder are owned by the run and
/// dropped on every exit path, including cancellation.
pub struct AgentStreamClient {
    backend: Arc<dyn AdvisorBackend>,
    idle_timeout: Duration,
}

impl AgentStreamClient {
    pub fn new(backend: Arc<dyn AdvisorBackend>) -> Self {
        Self {
            backend,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn advisor(&self) -> AdvisorId {
        self.backend.advisor()
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Run one request. Snapshots and the terminal result are sent on
    /// `events`; the terminal result is also returned.
    #[instrument(skip_all, fields(advisor = %self.advisor(), backend = self.name()))]
    pub async fn run(
        &self,
        request: &AdvisorRequest,
        cancel: &CancellationToken,
        events: &mpsc::Sender<ClientEvent>,
    ) -> Result<String, StreamError> {
        let mut session = AgentSession::new(self.advisor());

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(StreamError::Cancelled),
            result = self.drive(request, &mut session, events) => result,
        };
        session.settle(&result);

        match &result {
            Ok(text) => info!(chars = text.len(), "advisor answered"),
            Err(StreamError::Cancelled) => info!(
                partial_chars = session.partial_text.len(),
                "advisor stream cancelled"
            ),
            Err(e) => warn!(
                kind = e.error_kind(),
                error = %e,
                partial_chars = session.partial_text.len(),
                "advisor stream failed"
            ),
        }
        debug!(state = ?session.state, "session settled");

        let terminal = ClientEvent::Terminal {
            advisor: session.advisor,
            result: result.clone(),
        };
        if events.send(terminal).await.is_err() {
            debug!("terminal event dropped, receiver gone");
        }
        result
    }

    async fn drive(
        &self,
        request: &AdvisorRequest,
        session: &mut AgentSession,
        events: &mpsc::Sender<ClientEvent>,
    ) -> Result<String, StreamError> {
        let body = self.backend.open(request).await?;
        let mut stream =
            DecodedStream::with_idle_timeout(body, self.backend.frame_format(), self.idle_timeout);

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta { text } => {
                    if text.is_empty() {
                        continue;
                    }
                    session.partial_text.push_str(&text);
                    let snapshot = ClientEvent::Snapshot {
                        advisor: session.advisor,
                        text: session.partial_text.clone(),
                    };
                    events
                        .send(snapshot)
                        .await
                        .map_err(|_| StreamError::Cancelled)?;
                }
                StreamEvent::Done => return Ok(session.partial_text.clone()),
                StreamEvent::Error { error } if error.is_recoverable() => {
                    warn!(error = %error, "skipping malformed record");
                }
                StreamEvent::Error { error } => return Err(error),
            }
        }

        Err(StreamError::TerminatedEarly(
            "response body ended before the done marker".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{sse_record, ScriptedBackend, ScriptedChunk, ScriptedResponse};
    use bytes::Bytes;
    use council_core::FrameFormat;

    fn client(backend: &Arc<ScriptedBackend>) -> AgentStreamClient {
        AgentStreamClient::new(backend.clone())
    }

    async fn run_to_end(
        client: &AgentStreamClient,
        message: &str,
    ) -> (Result<String, StreamError>, Vec<ClientEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let result = client.run(&AdvisorRequest::new(message), &cancel, &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    #[tokio::test]
    async fn hi_there_produces_snapshots_then_terminal() {
        let backend = Arc::new(ScriptedBackend::new(
            AdvisorId::A,
            vec![ScriptedResponse::sse_text(&["Hi ", "there"])],
        ));
        let (result, events) = run_to_end(&client(&backend), "hello").await;

        assert_eq!(result, Ok("Hi there".to_string()));
        assert_eq!(
            events,
            vec![
                ClientEvent::Snapshot {
                    advisor: AdvisorId::A,
                    text: "Hi ".into()
                },
                ClientEvent::Snapshot {
                    advisor: AdvisorId::A,
                    text: "Hi there".into()
                },
                ClientEvent::Terminal {
                    advisor: AdvisorId::A,
                    result: Ok("Hi there".into())
                },
            ]
        );
        assert_eq!(backend.requests()[0].message, "hello");
        assert_eq!(backend.inflight(), 0);
    }

    #[tokio::test]
    async fn body_end_without_done_is_terminated_early() {
        let backend = Arc::new(ScriptedBackend::new(
            AdvisorId::B,
            vec![ScriptedResponse::raw(sse_record("partial"))],
        ));
        let (result, events) = run_to_end(&client(&backend), "q").await;

        assert!(matches!(result, Err(StreamError::TerminatedEarly(_))));
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            ClientEvent::Terminal { result: Err(StreamError::TerminatedEarly(_)), .. }
        ));
    }

    #[tokio::test]
    async fn malformed_record_is_skipped() {
        let body = format!("data: oops\n\n{}data: [DONE]\n\n", sse_record("fine"));
        let backend = Arc::new(ScriptedBackend::new(
            AdvisorId::A,
            vec![ScriptedResponse::raw(body)],
        ));
        let (result, _) = run_to_end(&client(&backend), "q").await;
        assert_eq!(result, Ok("fine".to_string()));
    }

    #[tokio::test]
    async fn backend_error_record_fails_run() {
        let body = format!("{}data: {{\"error\": \"quota\"}}\n\n", sse_record("so"));
        let backend = Arc::new(ScriptedBackend::new(
            AdvisorId::A,
            vec![ScriptedResponse::raw(body)],
        ));
        let (result, _) = run_to_end(&client(&backend), "q").await;
        assert_eq!(result, Err(StreamError::Backend("quota".into())));
    }

    #[tokio::test]
    async fn open_failure_is_single_terminal() {
        let backend = Arc::new(ScriptedBackend::new(
            AdvisorId::A,
            vec![ScriptedResponse::status(500, "boom")],
        ));
        let (result, events) = run_to_end(&client(&backend), "q").await;
        assert_eq!(result, Err(StreamError::from_status(500, "boom")));
        assert_eq!(events.len(), 1);
        assert_eq!(backend.open_count(), 1);
    }

    #[tokio::test]
    async fn plain_text_backend() {
        let backend = Arc::new(
            ScriptedBackend::new(
                AdvisorId::B,
                vec![ScriptedResponse::Body(vec![
                    ScriptedChunk::Bytes(Bytes::from("Go ")),
                    ScriptedChunk::Bytes(Bytes::from("for it")),
                ])],
            )
            .with_format(FrameFormat::PlainText),
        );
        let (result, _) = run_to_end(&client(&backend), "q").await;
        assert_eq!(result, Ok("Go for it".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_releases_body() {
        let backend = Arc::new(ScriptedBackend::new(
            AdvisorId::A,
            vec![ScriptedResponse::Body(vec![
                ScriptedChunk::Bytes(Bytes::from(sse_record("thinking"))),
                ScriptedChunk::Hang,
            ])],
        ));
        let client = client(&backend);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let run = {
            let cancel = cancel.clone();
            async move {
                client
                    .run(&AdvisorRequest::new("q"), &cancel, &tx)
                    .await
            }
        };
        let handle = tokio::spawn(run);

        assert!(matches!(rx.recv().await, Some(ClientEvent::Snapshot { .. })));
        assert_eq!(backend.inflight(), 1);

        cancel.cancel();
        let result = handle.await.unwrap();
        assert_eq!(result, Err(StreamError::Cancelled));
        assert!(matches!(
            rx.recv().await,
            Some(ClientEvent::Terminal { result: Err(StreamError::Cancelled), .. })
        ));
        assert_eq!(backend.inflight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_fails_run() {
        let backend = Arc::new(ScriptedBackend::new(
            AdvisorId::B,
            vec![ScriptedResponse::Body(vec![ScriptedChunk::Hang])],
        ));
        let client = client(&backend).with_idle_timeout(Duration::from_secs(3));
        let (result, _) = run_to_end(&client, "q").await;
        assert_eq!(result, Err(StreamError::Timeout(Duration::from_secs(3))));
        assert_eq!(backend.inflight(), 0);
    }
}
