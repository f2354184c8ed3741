//! WebSocket wire format.
//!
//! Every frame is a JSON object tagged by `type`. Inbound frames decode to
//! [`ClientEvent`]; outbound frames are [`ServerEvent`]s.

use serde::Deserialize;

use crate::domain::{MessageId, MessageKind, Presence, Priority, RoomId, RoomKind, ServerEvent, TicketId, UserId};
use crate::error::ChatError;

/// Client → server event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Handshake. Must be the first frame on a connection.
    Connect {
        /// User to authenticate as.
        user_id: UserId,
        /// Name shown to other participants; defaults to the user id.
        #[serde(default)]
        display_name: Option<String>,
        /// Opaque credential checked by the authorizer.
        #[serde(default)]
        auth_token: String,
    },
    /// Join an existing room.
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
    },
    /// Leave a room.
    LeaveRoom {
        /// Room to leave.
        room_id: RoomId,
    },
    /// Open a direct or group room.
    CreateRoom {
        /// Room flavour; `support` rooms are opened by `request_support`.
        kind: RoomKind,
        /// Other users to include.
        #[serde(default)]
        members: Vec<UserId>,
    },
    /// Post a message to a room.
    SendMessage {
        /// Target room.
        room_id: RoomId,
        /// Message text or attachment reference.
        body: String,
        /// Defaults to `text`.
        #[serde(default)]
        kind: Option<MessageKind>,
    },
    /// Open a support ticket with its own room.
    RequestSupport {
        /// Opening message.
        #[serde(default)]
        body: String,
        /// Defaults to `normal`.
        #[serde(default)]
        priority: Priority,
    },
    /// Assign a ticket to an agent.
    AssignTicket {
        /// Ticket.
        ticket_id: TicketId,
        /// Agent to assign.
        agent_id: UserId,
    },
    /// Mark work started on an assigned ticket.
    StartWork {
        /// Ticket.
        ticket_id: TicketId,
    },
    /// Resolve a ticket.
    ResolveTicket {
        /// Ticket.
        ticket_id: TicketId,
        /// Resolution summary.
        summary: String,
    },
    /// Close a resolved ticket.
    CloseTicket {
        /// Ticket.
        ticket_id: TicketId,
    },
    /// Reopen a recently resolved ticket.
    ReopenTicket {
        /// Ticket.
        ticket_id: TicketId,
    },
    /// Change a ticket's priority.
    SetPriority {
        /// Ticket.
        ticket_id: TicketId,
        /// New priority.
        priority: Priority,
    },
    /// Request a page of a room's history.
    Replay {
        /// Room.
        room_id: RoomId,
        /// First message id to return (inclusive).
        #[serde(default)]
        since: MessageId,
        /// Page size; capped by the server.
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Typing indicator.
    Typing {
        /// Room.
        room_id: RoomId,
        /// `true` when typing starts.
        active: bool,
    },
    /// Explicit presence change (`online` or `away`).
    SetPresence {
        /// New presence.
        presence: Presence,
    },
    /// Heartbeat.
    Ping,
    /// Start receiving every ticket event (agents only).
    SubscribeQueue,
    /// Stop receiving queue events.
    UnsubscribeQueue,
}

impl ClientEvent {
    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::CreateRoom { .. } => "create_room",
            Self::SendMessage { .. } => "send_message",
            Self::RequestSupport { .. } => "request_support",
            Self::AssignTicket { .. } => "assign_ticket",
            Self::StartWork { .. } => "start_work",
            Self::ResolveTicket { .. } => "resolve_ticket",
            Self::CloseTicket { .. } => "close_ticket",
            Self::ReopenTicket { .. } => "reopen_ticket",
            Self::SetPriority { .. } => "set_priority",
            Self::Replay { .. } => "replay",
            Self::Typing { .. } => "typing",
            Self::SetPresence { .. } => "set_presence",
            Self::Ping => "ping",
            Self::SubscribeQueue => "subscribe_queue",
            Self::UnsubscribeQueue => "unsubscribe_queue",
        }
    }
}

/// Decodes one inbound text frame.
///
/// # Errors
///
/// Returns [`ChatError::InvalidPayload`] for malformed JSON, an unknown
/// `type`, or missing fields.
pub fn decode(text: &str) -> Result<ClientEvent, ChatError> {
    serde_json::from_str(text).map_err(|e| ChatError::InvalidPayload(e.to_string()))
}

/// Encodes one outbound event as a text frame.
///
/// # Errors
///
/// Returns the `serde_json` error if the event cannot be serialized.
pub fn encode(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
