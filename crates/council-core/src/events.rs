use serde::{Deserialize, Serialize};

use crate::errors::FailureInfo;
use crate::ids::{MessageId, TurnId};
use crate::messages::{AdvisorId, Message, MessageStatus};

/// State of one advisor message at a point in time, as pushed to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorUpdate {
    pub turn_id: TurnId,
    pub advisor: AdvisorId,
    pub message_id: MessageId,
    pub text: String,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl AdvisorUpdate {
    /// Project an advisor message. Returns `None` for non-advisor messages or
    /// messages outside a turn.
    pub fn from_message(message: &Message) -> Option<Self> {
        Some(Self {
            turn_id: message.turn_id.clone()?,
            advisor: message.advisor()?,
            message_id: message.id.clone(),
            text: message.content.clone(),
            status: message.status,
            failure: message.failure.clone(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorOutcome {
    pub advisor: AdvisorId,
    pub message_id: MessageId,
    pub status: MessageStatus,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

/// Combined completion signal for a turn: both advisors are terminal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    pub advisors: Vec<AdvisorOutcome>,
}

impl TurnOutcome {
    pub fn advisor(&self, advisor: AdvisorId) -> Option<&AdvisorOutcome> {
        self.advisors.iter().find(|o| o.advisor == advisor)
    }

    pub fn all_complete(&self) -> bool {
        self.advisors.iter().all(|o| o.status == MessageStatus::Complete)
    }

    pub fn any_failed(&self) -> bool {
        self.advisors.iter().any(|o| o.status == MessageStatus::Failed)
    }
}

/// Process-wide event feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum CouncilEvent {
    #[serde(rename = "turn_started")]
    TurnStarted {
        turn_id: TurnId,
        user_message_id: MessageId,
    },

    #[serde(rename = "advisor_update")]
    AdvisorUpdate(AdvisorUpdate),

    #[serde(rename = "turn_finished")]
    TurnFinished(TurnOutcome),

    #[serde(rename = "playback_started")]
    PlaybackStarted { turn_id: TurnId, advisor: AdvisorId },

    #[serde(rename = "playback_finished")]
    PlaybackFinished { turn_id: TurnId, advisor: AdvisorId },

    #[serde(rename = "playback_failed")]
    PlaybackFailed {
        turn_id: TurnId,
        advisor: AdvisorId,
        reason: String,
    },
}

impl CouncilEvent {
    pub fn turn_id(&self) -> &TurnId {
        match self {
            Self::TurnStarted { turn_id, .. }
            | Self::PlaybackStarted { turn_id, .. }
            | Self::PlaybackFinished { turn_id, .. }
            | Self::PlaybackFailed { turn_id, .. } => turn_id,
            Self::AdvisorUpdate(update) => &update.turn_id,
            Self::TurnFinished(outcome) => &outcome.turn_id,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::TurnStarted { .. } => "turn_started",
            Self::AdvisorUpdate(_) => "advisor_update",
            Self::TurnFinished(_) => "turn_finished",
            Self::PlaybackStarted { .. } => "playback_started",
            Self::PlaybackFinished { .. } => "playback_finished",
            Self::PlaybackFailed { .. } => "playback_failed",
        }
    }
}
