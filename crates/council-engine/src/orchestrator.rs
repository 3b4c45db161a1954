//! Dual-stream orchestrator: runs both advisors for every user message.
//!
//! `submit` records the turn and returns at once. A spawned supervisor runs
//! both advisor clients concurrently, folds their snapshots into the
//! conversation, and joins when both advisor messages are terminal. One
//! advisor's failure never touches the other's message.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use council_core::voice::VoiceCollaborator;
use council_core::{
    AdvisorId, AdvisorOutcome, AdvisorRequest, AdvisorUpdate, CouncilEvent, FailureInfo,
    FailurePolicy, Message, StreamError, TurnId, TurnOutcome,
};
use council_settings::CouncilSettings;
use council_stream::{AgentStreamClient, ClientEvent};

use crate::conversation::{ConversationState, TurnMessages};
use crate::error::{ConversationError, EngineError};
use crate::subscription::{TurnSubscription, UpdateTracker};

const CLIENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Deadline for a whole turn. `None` waits for both advisors.
    pub turn_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    pub failure_placeholder: String,
    pub announce_failures: bool,
    pub failure_announcement: String,
    pub allow_concurrent_turns: bool,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&CouncilSettings::default())
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &CouncilSettings) -> Self {
        let turn = &settings.turn;
        Self {
            turn_timeout: turn.timeout(),
            failure_policy: turn.failure_policy,
            failure_placeholder: turn.failure_placeholder.clone(),
            announce_failures: turn.announce_failures,
            failure_announcement: turn.failure_announcement.clone(),
            allow_concurrent_turns: turn.allow_concurrent_turns,
            event_capacity: 256,
        }
    }
}

/// A user message to put to both advisors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnInput {
    pub text: String,
}

impl TurnInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// State shared by a turn's supervisor and by `cancel`.
struct TurnContext {
    turn_id: TurnId,
    messages: TurnMessages,
    conversation: ConversationState,
    event_tx: broadcast::Sender<CouncilEvent>,
    config: Arc<OrchestratorConfig>,
}

impl TurnContext {
    fn publish(&self, message: &Message) {
        if let Some(update) = AdvisorUpdate::from_message(message) {
            // No receivers is fine.
            let _ = self.event_tx.send(CouncilEvent::AdvisorUpdate(update));
        }
    }

    /// Fail `advisor` if it is still open. Returns true if this call made the
    /// message terminal.
    fn fail_advisor(&self, advisor: AdvisorId, error: &StreamError) -> bool {
        let result = self.conversation.fail(
            self.messages.advisor(advisor),
            FailureInfo::from(error),
            self.config.failure_policy,
            &self.config.failure_placeholder,
        );
        match result {
            Ok(message) => {
                warn!(turn_id = %self.turn_id, %advisor, kind = error.error_kind(), "advisor failed");
                self.publish(&message);
                true
            }
            Err(ConversationError::AlreadyTerminal(_)) => false,
            Err(e) => {
                warn!(turn_id = %self.turn_id, %advisor, error = %e, "could not record advisor failure");
                false
            }
        }
    }

    fn fail_open_advisors(&self, error: &StreamError) -> usize {
        AdvisorId::ALL
            .into_iter()
            .filter(|advisor| self.fail_advisor(*advisor, error))
            .count()
    }

    fn outcome(&self) -> TurnOutcome {
        outcome_from(&self.conversation, &self.turn_id, Some(&self.messages))
            .unwrap_or_else(|| TurnOutcome {
                turn_id: self.turn_id.clone(),
                advisors: Vec::new(),
            })
    }
}

/// Build a turn outcome from the conversation. `None` if the turn is
/// unknown or an advisor message is missing.
fn outcome_from(
    conversation: &ConversationState,
    turn_id: &TurnId,
    messages: Option<&TurnMessages>,
) -> Option<TurnOutcome> {
    let mut advisors = Vec::with_capacity(2);
    for advisor in AdvisorId::ALL {
        let message = match messages {
            Some(ids) => conversation.get(ids.advisor(advisor)),
            None => conversation.advisor_message(turn_id, advisor),
        }?;
        advisors.push(AdvisorOutcome {
            advisor,
            message_id: message.id,
            status: message.status,
            content: message.content,
            failure: message.failure,
        });
    }
    Some(TurnOutcome {
        turn_id: turn_id.clone(),
        advisors,
    })
}

/// Tracks a running turn.
struct ActiveTurn {
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<TurnOutcome>>,
    ctx: Arc<TurnContext>,
    _started_at: Instant,
}

pub struct DualStreamOrchestrator {
    clients: [Arc<AgentStreamClient>; 2],
    conversation: ConversationState,
    config: Arc<OrchestratorConfig>,
    event_tx: broadcast::Sender<CouncilEvent>,
    voice: Option<Arc<dyn VoiceCollaborator>>,
    playback_lock: Arc<tokio::sync::Mutex<()>>,
    /// Replaced each time `stop_playback` fires it.
    playback_cancel: parking_lot::Mutex<CancellationToken>,
    active_turns: Arc<DashMap<TurnId, ActiveTurn>>,
    submit_lock: parking_lot::Mutex<()>,
}

impl DualStreamOrchestrator {
    pub fn new(
        advisor_a: Arc<AgentStreamClient>,
        advisor_b: Arc<AgentStreamClient>,
        config: OrchestratorConfig,
    ) -> Self {
        debug_assert_eq!(advisor_a.advisor(), AdvisorId::A);
        debug_assert_eq!(advisor_b.advisor(), AdvisorId::B);
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            clients: [advisor_a, advisor_b],
            conversation: ConversationState::new(),
            config: Arc::new(config),
            event_tx,
            voice: None,
            playback_lock: Arc::new(tokio::sync::Mutex::new(())),
            playback_cancel: parking_lot::Mutex::new(CancellationToken::new()),
            active_turns: Arc::new(DashMap::new()),
            submit_lock: parking_lot::Mutex::new(()),
        }
    }

    pub fn with_voice(mut self, voice: Arc<dyn VoiceCollaborator>) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn with_conversation(mut self, conversation: ConversationState) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn client(&self, advisor: AdvisorId) -> &AgentStreamClient {
        &self.clients[advisor.index()]
    }

    /// Subscribe to every event the council publishes.
    pub fn events(&self) -> broadcast::Receiver<CouncilEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_running(&self, turn_id: &TurnId) -> bool {
        self.active_turns.contains_key(turn_id)
    }

    pub fn active_turn_ids(&self) -> Vec<TurnId> {
        self.active_turns.iter().map(|e| e.key().clone()).collect()
    }

    /// Start a turn. Must be called from within a Tokio runtime.
    pub fn submit(&self, input: TurnInput) -> Result<TurnId, EngineError> {
        let text = input.text.trim();
        if text.is_empty() {
            return Err(EngineError::EmptyMessage);
        }

        let _guard = self.submit_lock.lock();
        if !self.config.allow_concurrent_turns {
            if let Some(running) = self.active_turns.iter().next() {
                return Err(EngineError::TurnInProgress(running.key().clone()));
            }
        }

        let turn_id = TurnId::new();
        let messages = self.conversation.begin_turn(&turn_id, text)?;
        let user_message_id = messages.user.clone();

        let ctx = Arc::new(TurnContext {
            turn_id: turn_id.clone(),
            messages,
            conversation: self.conversation.clone(),
            event_tx: self.event_tx.clone(),
            config: Arc::clone(&self.config),
        });
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        self.active_turns.insert(
            turn_id.clone(),
            ActiveTurn {
                cancel: cancel.clone(),
                outcome: outcome_rx,
                ctx: Arc::clone(&ctx),
                _started_at: Instant::now(),
            },
        );

        info!(turn_id = %turn_id, chars = text.len(), "turn submitted");
        let _ = self.event_tx.send(CouncilEvent::TurnStarted {
            turn_id: turn_id.clone(),
            user_message_id,
        });

        let supervisor = TurnSupervisor {
            ctx,
            request: AdvisorRequest::new(text),
            clients: self.clients.clone(),
            cancel,
            outcome_tx,
            voice: self.voice.clone(),
            playback_lock: Arc::clone(&self.playback_lock),
            playback_cancel: self.playback_cancel.lock().clone(),
            active_turns: Arc::clone(&self.active_turns),
        };
        tokio::spawn(supervisor.run());

        Ok(turn_id)
    }

    /// Cancel a running turn. Its open advisor messages are failed with
    /// `cancelled` before this returns; nothing is written to them afterwards.
    pub fn cancel(&self, turn_id: &TurnId) -> bool {
        let Some((cancel, ctx)) = self
            .active_turns
            .get(turn_id)
            .map(|turn| (turn.cancel.clone(), Arc::clone(&turn.ctx)))
        else {
            return false;
        };

        let failed = ctx.fail_open_advisors(&StreamError::Cancelled);
        cancel.cancel();
        info!(turn_id = %turn_id, failed, "turn cancelled");
        true
    }

    /// Cancel every running turn and stop all voice playback, queued or
    /// playing. Returns how many turns were running.
    pub fn cancel_all(&self) -> usize {
        let ids = self.active_turn_ids();
        let cancelled = ids.iter().filter(|id| self.cancel(id)).count();
        self.stop_playback();
        cancelled
    }

    /// Stop every playback started so far, including answers of finished
    /// turns still waiting for their turn to play.
    pub fn stop_playback(&self) {
        let previous = std::mem::replace(&mut *self.playback_cancel.lock(), CancellationToken::new());
        previous.cancel();
    }

    /// Live updates for one turn, starting with the current state of both
    /// advisor messages. `None` for an unknown turn.
    pub fn subscribe(&self, turn_id: &TurnId) -> Option<TurnSubscription> {
        // Subscribe before reading state so no update falls in between.
        let mut rx = self.event_tx.subscribe();
        let replay = replay_updates(&self.conversation, turn_id)?;
        let conversation = self.conversation.clone();
        let turn_id = turn_id.clone();

        Some(Box::pin(async_stream::stream! {
            let mut tracker = UpdateTracker::new();
            for update in replay {
                if tracker.accept(&update) {
                    yield update;
                }
            }

            while !tracker.all_terminal() {
                match rx.recv().await {
                    Ok(CouncilEvent::AdvisorUpdate(update)) if update.turn_id == turn_id => {
                        if tracker.accept(&update) {
                            yield update;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(turn_id = %turn_id, skipped, "subscriber lagged, resyncing");
                        for update in replay_updates(&conversation, &turn_id).unwrap_or_default() {
                            if tracker.accept(&update) {
                                yield update;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Resolve once both advisors of `turn_id` are terminal.
    pub async fn wait(&self, turn_id: &TurnId) -> Option<TurnOutcome> {
        let outcome_rx = self.active_turns.get(turn_id).map(|t| t.outcome.clone());
        if let Some(mut rx) = outcome_rx {
            let finished = match rx.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => None,
            };
            if finished.is_some() {
                return finished;
            }
        }
        outcome_from(&self.conversation, turn_id, None)
            .filter(|o| o.advisors.iter().all(|a| a.status.is_terminal()))
    }

    /// All messages of a turn in conversation order.
    pub fn turn(&self, turn_id: &TurnId) -> Result<Vec<Message>, EngineError> {
        let messages = self.conversation.turn_messages(turn_id);
        if messages.is_empty() {
            return Err(EngineError::UnknownTurn(turn_id.clone()));
        }
        Ok(messages)
    }

    /// Clear the conversation. Refused while a turn is running.
    pub fn clear(&self) -> Result<(), EngineError> {
        let _guard = self.submit_lock.lock();
        if let Some(running) = self.active_turns.iter().next() {
            return Err(EngineError::TurnInProgress(running.key().clone()));
        }
        self.conversation.clear();
        info!("conversation cleared");
        Ok(())
    }
}

fn replay_updates(conversation: &ConversationState, turn_id: &TurnId) -> Option<Vec<AdvisorUpdate>> {
    let updates: Vec<AdvisorUpdate> = conversation
        .turn_messages(turn_id)
        .iter()
        .filter_map(AdvisorUpdate::from_message)
        .collect();
    (!updates.is_empty()).then_some(updates)
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Owns one turn from launch to its combined completion signal.
struct TurnSupervisor {
    ctx: Arc<TurnContext>,
    request: AdvisorRequest,
    clients: [Arc<AgentStreamClient>; 2],
    cancel: CancellationToken,
    outcome_tx: watch::Sender<Option<TurnOutcome>>,
    voice: Option<Arc<dyn VoiceCollaborator>>,
    playback_lock: Arc<tokio::sync::Mutex<()>>,
    playback_cancel: CancellationToken,
    active_turns: Arc<DashMap<TurnId, ActiveTurn>>,
}

impl TurnSupervisor {
    #[instrument(skip_all, fields(turn_id = %self.ctx.turn_id))]
    async fn run(self) {
        let started = tokio::time::Instant::now();
        let ctx = Arc::clone(&self.ctx);

        for advisor in AdvisorId::ALL {
            match ctx.conversation.mark_streaming(ctx.messages.advisor(advisor)) {
                Ok(message) => ctx.publish(&message),
                Err(e) => debug!(%advisor, error = %e, "advisor not started"),
            }
        }

        let streams = self.cancel.child_token();
        let (tx, mut rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        let mut handles = Vec::with_capacity(2);
        for client in &self.clients {
            let client = Arc::clone(client);
            let request = self.request.clone();
            let cancel = streams.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                client.run(&request, &cancel, &tx).await
            }));
        }
        drop(tx);

        let timeout = ctx.config.turn_timeout;
        let deadline = timeout.map(|t| started + t);
        let mut settled = [false; 2];

        while !settled.iter().all(|s| *s) {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    ctx.fail_open_advisors(&StreamError::Cancelled);
                    break;
                }
                () = sleep_until_deadline(deadline) => {
                    self.expire(&mut rx, &mut settled, timeout.unwrap_or_default());
                    break;
                }
                event = rx.recv() => match event {
                    Some(event) => self.apply(event, &mut settled),
                    None => break,
                },
            }
        }

        // Release both requests before reporting the outcome.
        drop(rx);
        streams.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "advisor task panicked");
            }
        }
        ctx.fail_open_advisors(&StreamError::TerminatedEarly(
            "advisor task ended without a result".into(),
        ));

        let outcome = ctx.outcome();
        if outcome.any_failed() && ctx.config.announce_failures {
            let notice = Message::system(ctx.config.failure_announcement.clone())
                .with_turn(ctx.turn_id.clone());
            if let Err(e) = ctx.conversation.append(notice) {
                warn!(error = %e, "could not append failure announcement");
            }
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            all_complete = outcome.all_complete(),
            "turn finished"
        );
        self.active_turns.remove(&ctx.turn_id);
        let _ = ctx.event_tx.send(CouncilEvent::TurnFinished(outcome.clone()));
        self.outcome_tx.send_replace(Some(outcome));
    }

    /// Deadline reached. Results already queued still count; whatever is
    /// left open fails with `timeout`.
    fn expire(&self, rx: &mut mpsc::Receiver<ClientEvent>, settled: &mut [bool; 2], limit: Duration) {
        while let Ok(event) = rx.try_recv() {
            self.apply(event, settled);
        }
        let failed = self.ctx.fail_open_advisors(&StreamError::Timeout(limit));
        warn!(timeout_ms = limit.as_millis() as u64, failed, "turn deadline reached");
    }

    fn apply(&self, event: ClientEvent, settled: &mut [bool; 2]) {
        let ctx = &self.ctx;
        let advisor = event.advisor();
        if settled[advisor.index()] {
            return;
        }
        let id = ctx.messages.advisor(advisor);

        match event {
            ClientEvent::Snapshot { text, .. } => match ctx.conversation.apply_snapshot(id, &text) {
                Ok(Some(message)) => ctx.publish(&message),
                Ok(None) => debug!(%advisor, "stale snapshot ignored"),
                Err(ConversationError::AlreadyTerminal(_)) => {
                    debug!(%advisor, "snapshot after terminal ignored")
                }
                Err(e) => warn!(%advisor, error = %e, "could not apply snapshot"),
            },
            ClientEvent::Terminal { result, .. } => {
                settled[advisor.index()] = true;
                match result {
                    Ok(text) => match ctx.conversation.complete(id, text) {
                        Ok(message) => {
                            ctx.publish(&message);
                            self.speak(advisor, message.content);
                        }
                        Err(ConversationError::AlreadyTerminal(_)) => {
                            debug!(%advisor, "completion after terminal ignored")
                        }
                        Err(e) => warn!(%advisor, error = %e, "could not complete advisor"),
                    },
                    Err(error) => {
                        ctx.fail_advisor(advisor, &error);
                    }
                }
            }
        }
    }

    /// Hand a completed answer to the voice collaborator without blocking
    /// the turn. Playback of different answers never overlaps. Cancelling the
    /// turn or stopping playback drops queued audio and silences a playing
    /// clip.
    fn speak(&self, advisor: AdvisorId, text: String) {
        let Some(voice) = self.voice.clone() else {
            return;
        };
        if text.trim().is_empty() {
            return;
        }
        let event_tx = self.ctx.event_tx.clone();
        let turn_id = self.ctx.turn_id.clone();
        let playback_lock = Arc::clone(&self.playback_lock);
        let turn_cancel = self.cancel.clone();
        let playback_cancel = self.playback_cancel.clone();

        tokio::spawn(async move {
            let stopped = async {
                tokio::select! {
                    () = turn_cancel.cancelled() => {}
                    () = playback_cancel.cancelled() => {}
                }
            };
            tokio::pin!(stopped);

            let audio = tokio::select! {
                biased;
                () = &mut stopped => {
                    debug!(turn_id = %turn_id, %advisor, "voice request dropped");
                    return;
                }
                audio = voice.request_audio(advisor, &text) => audio,
            };
            let audio = match audio {
                Ok(audio) => audio,
                Err(e) => {
                    warn!(turn_id = %turn_id, %advisor, error = %e, "voice synthesis failed");
                    let _ = event_tx.send(CouncilEvent::PlaybackFailed {
                        turn_id,
                        advisor,
                        reason: e.to_string(),
                    });
                    return;
                }
            };

            let _playing = tokio::select! {
                biased;
                () = &mut stopped => {
                    debug!(turn_id = %turn_id, %advisor, "queued playback dropped");
                    return;
                }
                guard = playback_lock.lock() => guard,
            };
            let _ = event_tx.send(CouncilEvent::PlaybackStarted {
                turn_id: turn_id.clone(),
                advisor,
            });
            let result = tokio::select! {
                biased;
                () = &mut stopped => {
                    voice.stop(advisor);
                    Err("stopped".to_string())
                }
                result = voice.playback(advisor, audio) => result.map_err(|e| e.to_string()),
            };
            let event = match result {
                Ok(()) => CouncilEvent::PlaybackFinished { turn_id, advisor },
                Err(reason) => {
                    warn!(turn_id = %turn_id, %advisor, %reason, "playback ended early");
                    CouncilEvent::PlaybackFailed {
                        turn_id,
                        advisor,
                        reason,
                    }
                }
            };
            let _ = event_tx.send(event);
        });
    }
}
