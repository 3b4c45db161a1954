use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FailureInfo;
use crate::ids::{MessageId, TurnId};

/// One of the two independent backend identities answering every turn.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum AdvisorId {
    #[serde(rename = "advisor_a")]
    A,
    #[serde(rename = "advisor_b")]
    B,
}

impl AdvisorId {
    pub const ALL: [AdvisorId; 2] = [AdvisorId::A, AdvisorId::B];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "advisor_a",
            Self::B => "advisor_b",
        }
    }

    /// Position in per-advisor arrays.
    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

impl fmt::Display for AdvisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    AdvisorA,
    AdvisorB,
    System,
}

impl Author {
    pub fn advisor(id: AdvisorId) -> Self {
        match id {
            AdvisorId::A => Self::AdvisorA,
            AdvisorId::B => Self::AdvisorB,
        }
    }

    pub fn advisor_id(self) -> Option<AdvisorId> {
        match self {
            Self::AdvisorA => Some(AdvisorId::A),
            Self::AdvisorB => Some(AdvisorId::B),
            Self::User | Self::System => None,
        }
    }
}

/// `pending → streaming → {complete | failed}`; `pending → failed` when a
/// turn dies before its advisor starts.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Complete,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        match (self, next) {
            (a, b) if a == b => !a.is_terminal(),
            (Pending, Streaming | Complete | Failed) => true,
            (Streaming, Complete | Failed) => true,
            _ => false,
        }
    }
}

/// What happens to text an advisor streamed before it failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Replace the partial text with the failure placeholder.
    #[default]
    Discard,
    /// Keep the partial text; the failure is attached alongside it.
    Retain,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<TurnId>,
    pub author: Author,
    pub content: String,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(turn_id: TurnId, text: impl Into<String>) -> Self {
        Self::new(Some(turn_id), Author::User, text.into(), MessageStatus::Complete)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(None, Author::System, text.into(), MessageStatus::Complete)
    }

    /// Empty placeholder for an advisor's answer to `turn_id`.
    pub fn advisor_placeholder(turn_id: TurnId, advisor: AdvisorId) -> Self {
        Self::new(
            Some(turn_id),
            Author::advisor(advisor),
            String::new(),
            MessageStatus::Pending,
        )
    }

    fn new(turn_id: Option<TurnId>, author: Author, content: String, status: MessageStatus) -> Self {
        Self {
            id: MessageId::new(),
            turn_id,
            author,
            content,
            status,
            failure: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_turn(mut self, turn_id: TurnId) -> Self {
        self.turn_id = Some(turn_id);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn advisor(&self) -> Option<AdvisorId> {
        self.author.advisor_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisor_wire_names() {
        assert_eq!(serde_json::to_string(&AdvisorId::A).unwrap(), "\"advisor_a\"");
        assert_eq!(AdvisorId::B.to_string(), "advisor_b");
        assert_eq!(AdvisorId::B.index(), 1);
    }

    #[test]
    fn author_maps_to_advisor() {
        for advisor in AdvisorId::ALL {
            assert_eq!(Author::advisor(advisor).advisor_id(), Some(advisor));
        }
        assert_eq!(Author::User.advisor_id(), None);
        assert_eq!(serde_json::to_string(&Author::AdvisorB).unwrap(), "\"advisor_b\"");
    }

    #[test]
    fn status_transitions() {
        use MessageStatus::*;
        assert!(Pending.can_transition_to(Streaming));
        assert!(Pending.can_transition_to(Failed));
        assert!(Streaming.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Complete));
        assert!(Streaming.can_transition_to(Failed));
        assert!(!Streaming.can_transition_to(Pending));
        assert!(!Complete.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Complete.can_transition_to(Complete));
    }

    #[test]
    fn placeholder_starts_pending_and_empty() {
        let turn = TurnId::new();
        let msg = Message::advisor_placeholder(turn.clone(), AdvisorId::B);
        assert_eq!(msg.status, MessageStatus::Pending);
        assert!(msg.content.is_empty());
        assert_eq!(msg.turn_id, Some(turn));
        assert_eq!(msg.advisor(), Some(AdvisorId::B));
    }

    #[test]
    fn message_serializes_camel_case() {
        let msg = Message::user(TurnId::from_raw("turn_1"), "hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["turnId"], "turn_1");
        assert_eq!(json["author"], "user");
        assert_eq!(json["status"], "complete");
        assert!(json.get("failure").is_none());
        assert!(json.get("createdAt").is_some());
    }
}
