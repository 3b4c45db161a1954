use council_core::{MessageId, MessageStatus, TurnId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("message not found: {0}")]
    NotFound(MessageId),

    #[error("message {0} is already terminal")]
    AlreadyTerminal(MessageId),

    #[error("duplicate message id: {0}")]
    DuplicateId(MessageId),

    #[error("invalid status transition for {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("content of {0} would shrink")]
    ContentShrank(MessageId),

    #[error("identity of {0} cannot change")]
    IdentityChanged(MessageId),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("turn {0} is still in progress")]
    TurnInProgress(TurnId),

    #[error("unknown turn: {0}")]
    UnknownTurn(TurnId),

    #[error("conversation error: {0}")]
    Conversation(#[from] ConversationError),
}

impl EngineError {
    /// Short classification string for logging and the wire.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "empty_message",
            Self::TurnInProgress(_) => "turn_in_progress",
            Self::UnknownTurn(_) => "unknown_turn",
            Self::Conversation(_) => "conversation_error",
        }
    }
}
