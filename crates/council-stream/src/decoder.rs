//! Incremental decoder for advisor response bodies.
//!
//! Bytes arrive in chunks with arbitrary boundaries. The decoder buffers
//! whatever does not yet form a complete record, so splitting a body at any
//! byte offset yields the same events as decoding it whole.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use council_core::{FrameFormat, StreamError, StreamEvent};

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Deserialize)]
struct Record {
    chunk: Option<String>,
    error: Option<Value>,
}

pub struct FrameDecoder {
    format: FrameFormat,
    buffer: Vec<u8>,
    done: bool,
}

impl FrameDecoder {
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            buffer: Vec::new(),
            done: false,
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// True once `Done` has been produced. Further input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk of the body and return every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);
        match self.format {
            FrameFormat::EventStream => self.drain_lines(),
            FrameFormat::PlainText => self.drain_text(false).into_iter().collect(),
        }
    }

    /// Signal the end of the body and flush what is left in the buffer.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        match self.format {
            FrameFormat::EventStream => {
                let mut events = self.drain_lines();
                if !self.done && !self.buffer.is_empty() {
                    let mut line = std::mem::take(&mut self.buffer);
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    events.extend(self.decode_line(&line));
                }
                events
            }
            FrameFormat::PlainText => {
                let mut events: Vec<StreamEvent> = self.drain_text(true).into_iter().collect();
                self.done = true;
                events.push(StreamEvent::Done);
                events
            }
        }
    }

    fn drain_lines(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
                if self.done {
                    self.buffer.clear();
                    break;
                }
            }
        }
        events
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<StreamEvent> {
        let Ok(line) = std::str::from_utf8(line) else {
            warn!(len = line.len(), "discarding record with invalid utf-8");
            return Some(protocol_error("record is not valid utf-8"));
        };
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field != "data" {
            debug!(field, "ignoring non-data field");
            return None;
        }

        let event = decode_payload(value);
        if event == StreamEvent::Done {
            self.done = true;
        }
        Some(event)
    }

    /// Emit the longest valid UTF-8 prefix. An incomplete trailing sequence is
    /// held back unless `flush` is set; invalid bytes are replaced.
    fn drain_text(&mut self, flush: bool) -> Option<StreamEvent> {
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.buffer) {
                Ok(s) => {
                    text.push_str(s);
                    self.buffer.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    match e.error_len() {
                        None if !flush => {
                            text.push_str(&String::from_utf8_lossy(&self.buffer[..valid]));
                            self.buffer.drain(..valid);
                            break;
                        }
                        None => {
                            text.push_str(&String::from_utf8_lossy(&self.buffer));
                            self.buffer.clear();
                            break;
                        }
                        Some(len) => {
                            text.push_str(&String::from_utf8_lossy(&self.buffer[..valid + len]));
                            self.buffer.drain(..valid + len);
                        }
                    }
                }
            }
        }
        (!text.is_empty()).then(|| StreamEvent::delta(text))
    }
}

fn decode_payload(payload: &str) -> StreamEvent {
    if payload.trim() == DONE_SENTINEL {
        return StreamEvent::Done;
    }
    match serde_json::from_str::<Record>(payload) {
        Ok(Record {
            chunk: Some(text), ..
        }) => StreamEvent::Delta { text },
        Ok(Record {
            error: Some(reason), ..
        }) => {
            let reason = match reason {
                Value::String(s) => s,
                other => other.to_string(),
            };
            StreamEvent::Error {
                error: StreamError::Backend(reason),
            }
        }
        Ok(_) => {
            warn!(payload, "record has neither chunk nor error");
            protocol_error("record has neither chunk nor error")
        }
        Err(e) => {
            warn!(payload, error = %e, "malformed record");
            protocol_error(&format!("malformed record: {e}"))
        }
    }
}

fn protocol_error(reason: &str) -> StreamEvent {
    StreamEvent::Error {
        error: StreamError::Protocol(reason.to_string()),
    }
}
