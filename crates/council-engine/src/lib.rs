//! Turn orchestration: one user message fans out to both advisors, their
//! streams are merged into the conversation, and subscribers see each
//! advisor's progress as it happens.

pub mod conversation;
pub mod error;
pub mod orchestrator;
pub mod subscription;

pub use conversation::{ConversationState, TurnMessages};
pub use error::{ConversationError, EngineError};
pub use orchestrator::{DualStreamOrchestrator, OrchestratorConfig, TurnInput};
pub use subscription::{TurnSubscription, UpdateTracker};
