//! Outbound events.
//!
//! Every state change produces a [`ServerEvent`]. Room-scoped events are
//! delivered to room members through their outboxes; ticket events are
//! additionally fanned out to agent-queue subscribers and published on the
//! [`super::EventBus`] for dashboard consumers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    Actor, Message, MessageId, Presence, Priority, RoomId, RoomSummary, SessionId, Ticket,
    TicketId, TicketStatus, UserId,
};

/// Server → client event. Serialized as `{"type": "<snake_case>", ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake accepted.
    Connected {
        /// Newly assigned session.
        session_id: SessionId,
        /// Authenticated user.
        user_id: UserId,
        /// Rooms rejoined automatically (active tickets).
        rejoined_room_ids: Vec<RoomId>,
    },

    /// A room was created or made visible to the recipient.
    RoomOpened {
        /// Room summary.
        room: RoomSummary,
    },

    /// A session joined a room.
    MemberJoined {
        /// Room joined.
        room_id: RoomId,
        /// Joining session.
        session_id: SessionId,
        /// User behind the session.
        user_id: UserId,
        /// Display name of the user.
        display_name: String,
    },

    /// A session left a room.
    MemberLeft {
        /// Room left.
        room_id: RoomId,
        /// Leaving session.
        session_id: SessionId,
        /// User behind the session.
        user_id: UserId,
    },

    /// A message was appended to a room's log.
    Message {
        /// The appended message, including its `message_id`.
        #[serde(flatten)]
        message: Message,
    },

    /// A support ticket was opened.
    TicketCreated {
        /// Newly created ticket.
        ticket: Ticket,
    },

    /// A ticket moved along its lifecycle.
    TicketStatusChanged {
        /// Ticket.
        ticket_id: TicketId,
        /// Bound room.
        room_id: RoomId,
        /// Status before.
        old_status: TicketStatus,
        /// Status after.
        new_status: TicketStatus,
        /// Who caused it.
        actor: Actor,
        /// Assigned agent after the transition.
        assigned_agent_id: Option<UserId>,
        /// Transition timestamp.
        at: DateTime<Utc>,
    },

    /// A ticket's priority changed.
    TicketPriorityChanged {
        /// Ticket.
        ticket_id: TicketId,
        /// Bound room.
        room_id: RoomId,
        /// Priority before.
        old_priority: Priority,
        /// Priority after.
        new_priority: Priority,
        /// Who changed it.
        actor: Actor,
    },

    /// A user's presence changed.
    PresenceChanged {
        /// User.
        user_id: UserId,
        /// Session whose presence changed.
        session_id: SessionId,
        /// New presence.
        presence: Presence,
        /// Room through which the recipient shares the session.
        room_id: RoomId,
    },

    /// Typing indicator relayed to other members.
    Typing {
        /// Room.
        room_id: RoomId,
        /// Typing user.
        user_id: UserId,
        /// `true` on start, `false` on stop.
        active: bool,
    },

    /// Backlog page requested through `replay`.
    History {
        /// Room.
        room_id: RoomId,
        /// Messages in log order.
        messages: Vec<Message>,
        /// Id to pass as `since` for the next page.
        next_message_id: MessageId,
    },

    /// Active tickets, sent when an agent subscribes to the queue.
    QueueSnapshot {
        /// Non-closed tickets, oldest first.
        tickets: Vec<Ticket>,
    },

    /// Heartbeat reply.
    Pong,

    /// A request from this session failed.
    Error {
        /// Stable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

impl ServerEvent {
    /// Returns the ticket this event concerns, if any.
    #[must_use]
    pub fn ticket_id(&self) -> Option<TicketId> {
        match self {
            Self::TicketCreated { ticket } => Some(ticket.ticket_id),
            Self::TicketStatusChanged { ticket_id, .. }
            | Self::TicketPriorityChanged { ticket_id, .. } => Some(*ticket_id),
            _ => None,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::RoomOpened { .. } => "room_opened",
            Self::MemberJoined { .. } => "member_joined",
            Self::MemberLeft { .. } => "member_left",
            Self::Message { .. } => "message",
            Self::TicketCreated { .. } => "ticket_created",
            Self::TicketStatusChanged { .. } => "ticket_status_changed",
            Self::TicketPriorityChanged { .. } => "ticket_priority_changed",
            Self::PresenceChanged { .. } => "presence_changed",
            Self::Typing { .. } => "typing",
            Self::History { .. } => "history",
            Self::QueueSnapshot { .. } => "queue_snapshot",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }
}

impl From<&crate::error::ChatError> for ServerEvent {
    fn from(err: &crate::error::ChatError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::MessageKind;
    use crate::error::ChatError;

    #[test]
    fn message_event_is_flattened() {
        let room_id = RoomId::new();
        let event = ServerEvent::Message {
            message: Message {
                message_id: 7,
                room_id,
                sender_session_id: None,
                sender_user_id: None,
                body: "hello".to_string(),
                sent_at: Utc::now(),
                kind: MessageKind::System,
            },
        };
        let Ok(json) = serde_json::to_value(&event) else {
            panic!("serialization failed");
        };
        assert_eq!(json["type"], "message");
        assert_eq!(json["message_id"], 7);
        assert_eq!(json["room_id"], room_id.to_string());
        assert_eq!(json["kind"], "system");
    }

    #[test]
    fn error_event_carries_code() {
        let event = ServerEvent::from(&ChatError::InvalidPayload("empty body".to_string()));
        assert_eq!(event.event_type_str(), "error");
        let json = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(json["code"], "invalid_payload");
    }

    #[test]
    fn ticket_id_accessor() {
        let ticket_id = TicketId::new();
        let event = ServerEvent::TicketStatusChanged {
            ticket_id,
            room_id: RoomId::new(),
            old_status: TicketStatus::Open,
            new_status: TicketStatus::Assigned,
            actor: Actor::System,
            assigned_agent_id: None,
            at: Utc::now(),
        };
        assert_eq!(event.ticket_id(), Some(ticket_id));
        assert_eq!(ServerEvent::Pong.ticket_id(), None);
    }
}
