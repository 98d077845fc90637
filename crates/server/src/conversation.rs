//! Conversation turn endpoint

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Json, State},
    http::header,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use parley_core::ConversationPayload;
use parley_pipeline::TurnContext;

use crate::auth::CurrentUser;
use crate::state::AppState;
use crate::wire::{EventDto, TurnRequest};
use crate::ServerError;

pub const NDJSON: &str = "application/x-ndjson";

/// `POST /api/conversation/turn`
///
/// Streams the turn's events as NDJSON. The response body owns the turn:
/// when the client disconnects the body is dropped and the turn is
/// cancelled.
pub async fn conversation_turn(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<TurnRequest>,
) -> Result<Response, ServerError> {
    if state.pipeline.is_shutting_down() {
        return Err(ServerError::Unavailable);
    }

    let payload = ConversationPayload::try_from(request)?;
    let turn = state.pipeline.run(
        payload,
        TurnContext {
            user_id: user.user_id,
            settings: user.settings,
        },
    );

    tracing::debug!(
        conversation_id = %turn.conversation_id(),
        turn_id = %turn.turn_id(),
        "Turn accepted"
    );

    let lines = turn.filter_map(|item| async move {
        let dto = match item {
            Ok(event) => EventDto::from(event),
            Err(e) => EventDto::failure(&e),
        };
        dto.to_line().map(Ok::<_, Infallible>)
    });

    Ok(([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response())
}
