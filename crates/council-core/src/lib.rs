//! Shared types for the council: identifiers, conversation messages, the
//! decoded stream protocol, the error taxonomy, and the seams to advisor
//! backends and the voice collaborator.

pub mod backend;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod stream;
pub mod voice;

pub use backend::{AdvisorBackend, AdvisorRequest, ByteStream};
pub use errors::{FailureInfo, StreamError};
pub use events::{AdvisorOutcome, AdvisorUpdate, CouncilEvent, TurnOutcome};
pub use ids::{MessageId, TurnId};
pub use messages::{AdvisorId, Author, FailurePolicy, Message, MessageStatus};
pub use stream::{FrameFormat, StreamEvent};
