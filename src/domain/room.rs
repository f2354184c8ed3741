//! Chat room aggregate.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{RoomId, SessionId, TicketId, UserId};

/// Room flavour. Decides lifetime and who may join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Private conversation between exactly two users.
    Direct,
    /// Open conversation; anyone may join.
    Group,
    /// Conversation bound 1:1 to a support ticket.
    Support,
}

impl RoomKind {
    /// Returns `true` if joins are restricted to listed participants.
    #[must_use]
    pub const fn is_private(self) -> bool {
        matches!(self, Self::Direct | Self::Support)
    }
}

/// A set of sessions sharing one message stream.
///
/// Membership holds session ids only; the session objects stay owned by
/// the session registry.
#[derive(Debug, Clone)]
pub struct Room {
    /// Room identifier.
    pub room_id: RoomId,
    /// Room flavour.
    pub kind: RoomKind,
    /// Sessions currently in the room.
    pub member_session_ids: BTreeSet<SessionId>,
    /// Users entitled to join a private room.
    pub participants: BTreeSet<UserId>,
    /// Bound ticket for support rooms.
    pub ticket_id: Option<TicketId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last join, leave, or message.
    pub last_activity_at: DateTime<Utc>,
    /// Bumped on every join; a scheduled empty-room removal only fires if
    /// the epoch it observed is still current.
    pub(crate) epoch: u64,
    /// Set once the room has been deleted from the manager.
    pub(crate) released: bool,
}

impl Room {
    /// Creates an empty room.
    #[must_use]
    pub fn new(kind: RoomKind, participants: BTreeSet<UserId>, ticket_id: Option<TicketId>) -> Self {
        let now = Utc::now();
        Self {
            room_id: RoomId::new(),
            kind,
            member_session_ids: BTreeSet::new(),
            participants,
            ticket_id,
            created_at: now,
            last_activity_at: now,
            epoch: 0,
            released: false,
        }
    }

    /// Returns `true` if removal must wait for the bound ticket to close.
    #[must_use]
    pub const fn is_ticket_bound(&self) -> bool {
        self.ticket_id.is_some()
    }

    /// Returns a serializable summary.
    #[must_use]
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.room_id,
            kind: self.kind,
            member_session_ids: self.member_session_ids.iter().copied().collect(),
            ticket_id: self.ticket_id,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

/// Serializable view of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoomSummary {
    /// Room identifier.
    pub room_id: RoomId,
    /// Room flavour.
    pub kind: RoomKind,
    /// Sessions currently in the room.
    pub member_session_ids: Vec<SessionId>,
    /// Bound ticket, if any.
    pub ticket_id: Option<TicketId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last join, leave, or message.
    pub last_activity_at: DateTime<Utc>,
}
