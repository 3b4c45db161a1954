use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Future, Stream};

use council_core::{ByteStream, FrameFormat, StreamError, StreamEvent};

use crate::decoder::FrameDecoder;

/// Longest silence tolerated between two body reads.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Wraps a backend body and yields decoded events.
///
/// Ends after `Done` or after the first non-recoverable error. If no bytes
/// arrive within the idle timeout it yields `Timeout` and ends.
pub struct DecodedStream {
    inner: ByteStream,
    decoder: FrameDecoder,
    pending: VecDeque<StreamEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_timeout: Duration,
    finished: bool,
}

impl DecodedStream {
    pub fn new(body: ByteStream, format: FrameFormat) -> Self {
        Self::with_idle_timeout(body, format, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(body: ByteStream, format: FrameFormat, idle_timeout: Duration) -> Self {
        Self {
            inner: body,
            decoder: FrameDecoder::new(format),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_timeout,
            finished: false,
        }
    }
}

impl Stream for DecodedStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                if event.is_terminal() {
                    this.finished = true;
                    this.pending.clear();
                }
                return Poll::Ready(Some(event));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deadline = tokio::time::Instant::now() + this.idle_timeout;
                    this.idle_deadline.as_mut().reset(deadline);
                    this.pending.extend(this.decoder.push(&bytes));
                }
                Poll::Ready(Some(Err(error))) => {
                    this.finished = true;
                    return Poll::Ready(Some(StreamEvent::Error { error }));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    this.pending.extend(this.decoder.finish());
                }
                Poll::Pending => {
                    if this.idle_deadline.as_mut().poll(cx).is_ready() {
                        this.finished = true;
                        return Poll::Ready(Some(StreamEvent::Error {
                            error: StreamError::Timeout(this.idle_timeout),
                        }));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
