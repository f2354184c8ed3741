//! Room history endpoint.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{MessagePageParams, MessagePageResponse};
use crate::app_state::AppState;
use crate::domain::RoomId;
use crate::error::{ChatError, ErrorResponse};

/// `GET /rooms/{id}/messages`: One page of a room's message log.
///
/// # Errors
///
/// Returns [`ChatError::RoomNotFound`] if the room is unknown.
#[utoipa::path(
    get,
    path = "/api/v1/rooms/{id}/messages",
    tag = "Rooms",
    summary = "Replay room messages",
    description = "Returns messages with id >= `since`, in log order. Clients reconnecting pass the last id they saw plus one.",
    params(
        ("id" = uuid::Uuid, Path, description = "Room UUID"),
        MessagePageParams,
    ),
    responses(
        (status = 200, description = "Message page", body = MessagePageResponse),
        (status = 404, description = "Room not found", body = ErrorResponse),
    )
)]
pub async fn room_messages(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Query(params): Query<MessagePageParams>,
) -> Result<impl IntoResponse, ChatError> {
    let room_id = RoomId::from_uuid(id);
    let (messages, next_message_id) = state
        .gateway
        .history(room_id, params.since, params.limit)
        .await?;
    Ok(Json(MessagePageResponse {
        room_id,
        messages,
        next_message_id,
    }))
}

/// Room routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/rooms/{id}/messages", get(room_messages))
}
