//! Immutable chat messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{RoomId, SessionId, UserId};

/// Per-room sequence number. Starts at 0 and has no gaps.
pub type MessageId = u64;

/// Message flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text typed by a participant.
    Text,
    /// Server-authored notice (assignment, resolution, disconnect).
    System,
    /// Reference to an attachment stored elsewhere; `body` holds the ref.
    AttachmentRef,
}

impl MessageKind {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::System => "system",
            Self::AttachmentRef => "attachment_ref",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = crate::error::ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Text, Self::System, Self::AttachmentRef]
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| crate::error::ChatError::InvalidPayload(format!("unknown message kind: {s}")))
    }
}

/// One entry of a room's message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    /// Position in the room's log.
    pub message_id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Sending session; `None` for system messages.
    pub sender_session_id: Option<SessionId>,
    /// Sending user; survives reconnects unlike the session id.
    pub sender_user_id: Option<UserId>,
    /// Message body.
    pub body: String,
    /// Server timestamp at append time.
    pub sent_at: DateTime<Utc>,
    /// Message flavour.
    pub kind: MessageKind,
}

/// Who authored a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    /// A live session of a user.
    Session {
        /// Sending session.
        session_id: SessionId,
        /// User behind the session.
        user_id: UserId,
    },
    /// The server itself.
    System,
}

impl Sender {
    /// Returns the sending user, if any.
    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Session { user_id, .. } => Some(user_id),
            Self::System => None,
        }
    }
}
