//! Room endpoint DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{Message, MessageId, RoomId};

/// Query for `GET /api/v1/rooms/{id}/messages`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MessagePageParams {
    /// First message id to return (inclusive). Defaults to 0.
    #[serde(default)]
    pub since: MessageId,
    /// Page size; capped by `REPLAY_MAX_LIMIT`.
    pub limit: Option<usize>,
}

/// One page of a room's history.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessagePageResponse {
    /// Room.
    pub room_id: RoomId,
    /// Messages in log order.
    pub messages: Vec<Message>,
    /// Pass as `since` to fetch the next page.
    pub next_message_id: MessageId,
}
