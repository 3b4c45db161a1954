//! HTTP surface for the council: submit turns, follow them over SSE,
//! cancel them, and read or clear the conversation.

pub mod handlers;
pub mod server;

pub use handlers::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
