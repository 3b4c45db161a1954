//! Advisor stream plumbing: frame decoding, the per-advisor stream client,
//! and the HTTP and scripted backends it talks to.

pub mod client;
pub mod decoded;
pub mod decoder;
pub mod http;
pub mod mock;

pub use client::{AgentStreamClient, ClientEvent};
pub use decoded::{DecodedStream, DEFAULT_IDLE_TIMEOUT};
pub use decoder::FrameDecoder;
pub use http::HttpBackend;
pub use mock::{ScriptedBackend, ScriptedChunk, ScriptedResponse};
