use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use council_core::{Message, TurnId};
use council_engine::{EngineError, TurnInput};

use crate::server::AppState;

/// Error body: `{"error": {"kind": .., "message": ..}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::EmptyMessage => StatusCode::BAD_REQUEST,
            EngineError::TurnInProgress(_) => StatusCode::CONFLICT,
            EngineError::UnknownTurn(_) => StatusCode::NOT_FOUND,
            EngineError::Conversation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: e.error_kind(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "kind": self.kind, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTurnRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnView {
    pub turn_id: TurnId,
    pub running: bool,
    pub messages: Vec<Message>,
}

fn sse_event<T: Serialize>(name: &'static str, value: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(value)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "activeTurns": state.orchestrator.active_turn_ids().len(),
    }))
}

pub async fn create_turn(
    State(state): State<AppState>,
    Json(req): Json<CreateTurnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let turn_id = state.orchestrator.submit(TurnInput::new(req.text))?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "turnId": turn_id }))))
}

pub async fn get_turn(
    State(state): State<AppState>,
    Path(turn_id): Path<TurnId>,
) -> Result<Json<TurnView>, ApiError> {
    let messages = state.orchestrator.turn(&turn_id)?;
    Ok(Json(TurnView {
        running: state.orchestrator.is_running(&turn_id),
        turn_id,
        messages,
    }))
}

/// `advisor_update` events until both advisors are terminal, then one
/// `turn_finished` event.
pub async fn turn_events(
    State(state): State<AppState>,
    Path(turn_id): Path<TurnId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Some(mut updates) = state.orchestrator.subscribe(&turn_id) else {
        return Err(EngineError::UnknownTurn(turn_id).into());
    };
    let orchestrator = state.orchestrator.clone();

    let stream = async_stream::stream! {
        while let Some(update) = updates.next().await {
            yield Ok::<Event, Infallible>(sse_event("advisor_update", &update));
        }
        if let Some(outcome) = orchestrator.wait(&turn_id).await {
            yield Ok(sse_event("turn_finished", &outcome));
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn cancel_turn(
    State(state): State<AppState>,
    Path(turn_id): Path<TurnId>,
) -> impl IntoResponse {
    let cancelled = state.orchestrator.cancel(&turn_id);
    Json(json!({ "cancelled": cancelled }))
}

pub async fn get_conversation(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "messages": state.orchestrator.conversation().snapshot() }))
}

pub async fn clear_conversation(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.orchestrator.clear()?;
    Ok(StatusCode::NO_CONTENT)
}

/// Every council event, named by its `type`.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.orchestrator.events()).filter_map(|result| async move {
        match result {
            Ok(event) => Some(Ok::<Event, Infallible>(sse_event(event.event_name(), &event))),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged, dropped events");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
