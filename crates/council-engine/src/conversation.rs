//! Ordered, append-only message log shared by the orchestrator, its turn
//! supervisors, and readers.
//!
//! Every write happens under one lock, so a check-then-write (is this message
//! still streaming? is the new text longer?) is atomic with respect to
//! concurrent cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use council_core::{
    AdvisorId, FailureInfo, FailurePolicy, Message, MessageId, MessageStatus, TurnId,
};

use crate::error::ConversationError;

type Result<T> = std::result::Result<T, ConversationError>;

/// Ids of the three messages a turn starts with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnMessages {
    pub user: MessageId,
    pub advisors: [MessageId; 2],
}

impl TurnMessages {
    pub fn advisor(&self, advisor: AdvisorId) -> &MessageId {
        &self.advisors[advisor.index()]
    }
}

#[derive(Default)]
struct Inner {
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
}

impl Inner {
    fn push(&mut self, message: Message) -> Result<()> {
        if self.index.contains_key(&message.id) {
            return Err(ConversationError::DuplicateId(message.id));
        }
        self.index.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
        Ok(())
    }

    fn find_mut(&mut self, id: &MessageId) -> Result<&mut Message> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| ConversationError::NotFound(id.clone()))?;
        Ok(&mut self.messages[idx])
    }

    /// Look up a message that may still change.
    fn open_mut(&mut self, id: &MessageId) -> Result<&mut Message> {
        let current = self.find_mut(id)?;
        if current.is_terminal() {
            return Err(ConversationError::AlreadyTerminal(id.clone()));
        }
        Ok(current)
    }
}

/// Validate `draft` against `current` and store it.
fn commit(current: &mut Message, draft: Message) -> Result<Message> {
    if draft.id != current.id
        || draft.author != current.author
        || draft.turn_id != current.turn_id
        || draft.created_at != current.created_at
    {
        return Err(ConversationError::IdentityChanged(current.id.clone()));
    }
    if !current.status.can_transition_to(draft.status) {
        return Err(ConversationError::InvalidTransition {
            id: current.id.clone(),
            from: current.status,
            to: draft.status,
        });
    }
    if !draft.is_terminal() && draft.content.len() < current.content.len() {
        return Err(ConversationError::ContentShrank(current.id.clone()));
    }
    *current = draft.clone();
    Ok(draft)
}

#[derive(Clone, Default)]
pub struct ConversationState {
    inner: Arc<Mutex<Inner>>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: Message) -> Result<MessageId> {
        let id = message.id.clone();
        self.inner.lock().push(message)?;
        Ok(id)
    }

    /// Apply `mutate` to a copy of a non-terminal message and store the copy
    /// if it is a legal successor.
    pub fn update<F>(&self, id: &MessageId, mutate: F) -> Result<Message>
    where
        F: FnOnce(&mut Message),
    {
        let mut inner = self.inner.lock();
        let current = inner.open_mut(id)?;
        let mut draft = current.clone();
        mutate(&mut draft);
        commit(current, draft)
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        let inner = self.inner.lock();
        inner.index.get(id).map(|idx| inner.messages[*idx].clone())
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.lock().messages.clone()
    }

    pub fn turn_messages(&self, turn_id: &TurnId) -> Vec<Message> {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.turn_id.as_ref() == Some(turn_id))
            .cloned()
            .collect()
    }

    pub fn advisor_message(&self, turn_id: &TurnId, advisor: AdvisorId) -> Option<Message> {
        self.inner
            .lock()
            .messages
            .iter()
            .find(|m| m.turn_id.as_ref() == Some(turn_id) && m.advisor() == Some(advisor))
            .cloned()
    }

    /// Append the user message and both pending advisor placeholders in one
    /// step.
    pub fn begin_turn(&self, turn_id: &TurnId, text: &str) -> Result<TurnMessages> {
        let user = Message::user(turn_id.clone(), text);
        let a = Message::advisor_placeholder(turn_id.clone(), AdvisorId::A);
        let b = Message::advisor_placeholder(turn_id.clone(), AdvisorId::B);
        let ids = TurnMessages {
            user: user.id.clone(),
            advisors: [a.id.clone(), b.id.clone()],
        };

        let mut inner = self.inner.lock();
        inner.push(user)?;
        inner.push(a)?;
        inner.push(b)?;
        Ok(ids)
    }

    pub fn mark_streaming(&self, id: &MessageId) -> Result<Message> {
        self.update(id, |m| m.status = MessageStatus::Streaming)
    }

    /// Store a snapshot unless it is older (shorter) than what is stored.
    /// Returns `None` for a stale snapshot.
    pub fn apply_snapshot(&self, id: &MessageId, text: &str) -> Result<Option<Message>> {
        let mut inner = self.inner.lock();
        let current = inner.open_mut(id)?;
        let unchanged = current.status == MessageStatus::Streaming && current.content == text;
        if unchanged || text.len() < current.content.len() {
            return Ok(None);
        }
        let mut draft = current.clone();
        draft.content = text.to_string();
        draft.status = MessageStatus::Streaming;
        commit(current, draft).map(Some)
    }

    pub fn complete(&self, id: &MessageId, final_text: String) -> Result<Message> {
        self.update(id, |m| {
            if final_text.len() >= m.content.len() {
                m.content = final_text;
            }
            m.status = MessageStatus::Complete;
        })
    }

    /// Mark a message failed. Under `Discard` the content becomes
    /// `placeholder`; under `Retain` streamed content is kept and the
    /// placeholder is only used when nothing arrived.
    pub fn fail(
        &self,
        id: &MessageId,
        failure: FailureInfo,
        policy: FailurePolicy,
        placeholder: &str,
    ) -> Result<Message> {
        self.update(id, |m| {
            if policy == FailurePolicy::Discard || m.content.is_empty() {
                m.content = placeholder.to_string();
            }
            m.status = MessageStatus::Failed;
            m.failure = Some(failure);
        })
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.messages.clear();
        inner.index.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
