//! Database row models.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Message, MessageKind, RoomId, SessionId, UserId};
use crate::error::ChatError;

/// A stored row from the `chat_messages` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    /// Room the message belongs to.
    pub room_id: Uuid,
    /// Per-room sequence number.
    pub message_id: i64,
    /// Sending session, null for system messages.
    pub sender_session_id: Option<Uuid>,
    /// Sending user, null for system messages.
    pub sender_user_id: Option<String>,
    /// Message body.
    pub body: String,
    /// Message kind (`text`, `system`, `attachment_ref`).
    pub kind: String,
    /// Append timestamp.
    pub sent_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = ChatError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            message_id: u64::try_from(row.message_id)
                .map_err(|e| ChatError::Persistence(e.to_string()))?,
            room_id: RoomId::from_uuid(row.room_id),
            sender_session_id: row.sender_session_id.map(SessionId::from_uuid),
            sender_user_id: row.sender_user_id.map(UserId::new),
            body: row.body,
            sent_at: row.sent_at,
            kind: row
                .kind
                .parse::<MessageKind>()
                .map_err(|e| ChatError::Persistence(e.to_string()))?,
        })
    }
}

/// A stored row from the `support_tickets` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TicketRow {
    /// Ticket identifier.
    pub ticket_id: Uuid,
    /// Full ticket document, including history.
    pub ticket_json: serde_json::Value,
    /// Last save timestamp.
    pub updated_at: DateTime<Utc>,
}
