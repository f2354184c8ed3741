//! Live sessions: identity, outbox, presence, and room back-references.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, mpsc};
use utoipa::ToSchema;

use super::{RoomId, ServerEvent, SessionId, UserId};
use crate::error::ChatError;

/// Observable online state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Connected and recently active.
    Online,
    /// Connected but idle or explicitly away.
    Away,
    /// Disconnected. Only ever observed in the final presence broadcast.
    Offline,
}

/// Capability level granted by the auth collaborator at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End user; may chat and request support.
    Customer,
    /// Support agent; may take and work tickets.
    Agent,
    /// Administrator; everything an agent can do plus overrides.
    Admin,
}

impl Role {
    /// Returns `true` if the role may be assigned to and work on tickets.
    #[must_use]
    pub const fn handles_tickets(self) -> bool {
        matches!(self, Self::Agent | Self::Admin)
    }

    /// Returns `true` for the admin override capability.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Point-in-time view of a session, safe to hand out and serialize.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Session {
    /// Server-assigned session identifier.
    pub session_id: SessionId,
    /// Authenticated user.
    pub user_id: UserId,
    /// Name shown to other participants.
    pub display_name: String,
    /// Capability level.
    pub role: Role,
    /// Handshake timestamp.
    pub connected_at: DateTime<Utc>,
    /// Last heartbeat or inbound event.
    pub last_active_at: DateTime<Utc>,
    /// Current presence.
    pub presence: Presence,
    /// Rooms this session is a member of.
    pub active_room_ids: Vec<RoomId>,
}

#[derive(Debug)]
struct SessionState {
    presence: Presence,
    last_active_at: DateTime<Utc>,
    active_room_ids: BTreeSet<RoomId>,
    removed: bool,
}

/// Registry-owned entry for one live connection.
///
/// Rooms never hold a `SessionHandle`; they store the [`SessionId`] and
/// resolve it through the registry when delivering.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: SessionId,
    user_id: UserId,
    display_name: String,
    role: Role,
    connected_at: DateTime<Utc>,
    outbox: mpsc::UnboundedSender<ServerEvent>,
    state: Mutex<SessionState>,
    /// `true` while the session accepts dispatches. Dispatch holds a read
    /// guard; removal takes the write guard and flips it.
    gate: RwLock<bool>,
}

impl SessionHandle {
    /// Creates a handle for a freshly authenticated connection.
    #[must_use]
    pub fn new(
        user_id: UserId,
        display_name: String,
        role: Role,
        outbox: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: SessionId::new(),
            user_id,
            display_name,
            role,
            connected_at: now,
            outbox,
            state: Mutex::new(SessionState {
                presence: Presence::Online,
                last_active_at: now,
                active_room_ids: BTreeSet::new(),
                removed: false,
            }),
            gate: RwLock::new(true),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session identifier.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Authenticated user.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Capability level.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Current presence.
    #[must_use]
    pub fn presence(&self) -> Presence {
        self.state().presence
    }

    /// Last heartbeat or inbound event.
    #[must_use]
    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.state().last_active_at
    }

    /// Rooms this session belongs to, in id order.
    #[must_use]
    pub fn active_room_ids(&self) -> Vec<RoomId> {
        self.state().active_room_ids.iter().copied().collect()
    }

    /// Returns a serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        let state = self.state();
        Session {
            session_id: self.session_id,
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            connected_at: self.connected_at,
            last_active_at: state.last_active_at,
            presence: state.presence,
            active_room_ids: state.active_room_ids.iter().copied().collect(),
        }
    }

    /// Queues an event on this session's outbox.
    ///
    /// Never blocks. Returns `false` if the connection is gone, in which case
    /// the event is dropped; the client recovers through replay.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        let delivered = self.outbox.send(event).is_ok();
        if !delivered {
            tracing::debug!(session_id = %self.session_id, "dropping event for closed outbox");
        }
        delivered
    }

    /// Marks activity and returns the previous presence.
    pub(crate) fn touch(&self) -> Presence {
        let mut state = self.state();
        let previous = state.presence;
        state.last_active_at = Utc::now();
        if state.presence != Presence::Offline {
            state.presence = Presence::Online;
        }
        previous
    }

    /// Sets presence unless the session is already offline. Returns the
    /// previous presence.
    pub(crate) fn set_presence(&self, presence: Presence) -> Presence {
        let mut state = self.state();
        let previous = state.presence;
        if previous != Presence::Offline {
            state.presence = presence;
        }
        previous
    }

    /// Records room membership. Fails once the session has been removed so
    /// a racing join cannot resurrect a back-reference.
    pub(crate) fn attach_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        let mut state = self.state();
        if state.removed {
            return Err(ChatError::Unauthenticated);
        }
        state.active_room_ids.insert(room_id);
        Ok(())
    }

    /// Drops a room back-reference.
    pub(crate) fn detach_room(&self, room_id: RoomId) {
        self.state().active_room_ids.remove(&room_id);
    }

    /// Flags the session offline and returns the rooms it still belongs to.
    pub(crate) fn mark_removed(&self) -> Vec<RoomId> {
        let mut state = self.state();
        state.removed = true;
        state.presence = Presence::Offline;
        state.active_room_ids.iter().copied().collect()
    }

    /// Enters the dispatch section.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Unauthenticated`] once removal has completed.
    pub async fn enter(&self) -> Result<RwLockReadGuard<'_, bool>, ChatError> {
        let guard = self.gate.read().await;
        if *guard {
            Ok(guard)
        } else {
            Err(ChatError::Unauthenticated)
        }
    }

    /// Closes the dispatch gate, waiting for any in-flight dispatch.
    /// Returns `false` if it was already closed.
    pub(crate) async fn close_gate(&self) -> bool {
        let mut gate = self.gate.write().await;
        std::mem::replace(&mut *gate, false)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn handle() -> (SessionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SessionHandle::new(UserId::from("alice"), "Alice".to_string(), Role::Customer, tx),
            rx,
        )
    }

    #[test]
    fn touch_restores_online() {
        let (session, _rx) = handle();
        assert_eq!(session.set_presence(Presence::Away), Presence::Online);
        assert_eq!(session.touch(), Presence::Away);
        assert_eq!(session.presence(), Presence::Online);
    }

    #[test]
    fn removed_session_rejects_attach() {
        let (session, _rx) = handle();
        let room = RoomId::new();
        assert!(session.attach_room(room).is_ok());
        let rooms = session.mark_removed();
        assert_eq!(rooms, vec![room]);
        assert_eq!(session.presence(), Presence::Offline);
        assert_eq!(session.attach_room(RoomId::new()), Err(ChatError::Unauthenticated));
    }

    #[test]
    fn deliver_reports_closed_outbox() {
        let (session, rx) = handle();
        assert!(session.deliver(ServerEvent::Pong));
        drop(rx);
        assert!(!session.deliver(ServerEvent::Pong));
    }

    #[tokio::test]
    async fn closed_gate_rejects_dispatch() {
        let (session, _rx) = handle();
        {
            let entered = session.enter().await;
            assert!(entered.is_ok());
        }
        assert!(session.close_gate().await);
        assert!(session.enter().await.is_err());
        assert!(!session.close_gate().await);
    }
}
