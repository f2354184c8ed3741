//! Room storage, membership, and in-order broadcast.
//!
//! [`RoomManager`] keeps every live room behind its own
//! [`tokio::sync::Mutex`]. The outer map lock is held only long enough to
//! clone the room's `Arc`; all membership changes, appends, and fan-out
//! happen under the per-room lock, which makes delivery order equal to log
//! order.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use super::{
    Message, MessageKind, MessageLog, Room, RoomId, RoomKind, RoomSummary, Sender, ServerEvent,
    SessionHandle, SessionId, SessionRegistry, TicketId, UserId,
};
use crate::error::ChatError;
use crate::persistence::ChatStore;

/// Central store for all live chat rooms.
///
/// # Concurrency
///
/// - Operations on different rooms run in parallel.
/// - Operations on the same room are serialized by its mutex.
/// - No operation holds two room locks at once.
#[derive(Debug)]
pub struct RoomManager {
    rooms: RwLock<HashMap<RoomId, Arc<Mutex<Room>>>>,
    sessions: Arc<SessionRegistry>,
    log: Arc<MessageLog>,
    store: Arc<dyn ChatStore>,
    empty_room_grace: Duration,
    idempotent_join: bool,
}

impl RoomManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionRegistry>,
        log: Arc<MessageLog>,
        store: Arc<dyn ChatStore>,
        empty_room_grace: Duration,
        idempotent_join: bool,
    ) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            sessions,
            log,
            store,
            empty_room_grace,
            idempotent_join,
        }
    }

    async fn room(&self, room_id: RoomId) -> Result<Arc<Mutex<Room>>, ChatError> {
        self.rooms
            .read()
            .await
            .get(&room_id)
            .cloned()
            .ok_or(ChatError::RoomNotFound(room_id))
    }

    /// Creates a room with the given sessions as its first members.
    ///
    /// `participants` lists the users entitled to a private room; the users
    /// behind `initial_member_ids` are added to it. Each initial member
    /// receives a `room_opened` event. Unknown session ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Persistence`] if the membership cannot be saved.
    pub async fn create_room(
        &self,
        kind: RoomKind,
        participants: BTreeSet<UserId>,
        initial_member_ids: &[SessionId],
        ticket_id: Option<TicketId>,
    ) -> Result<RoomSummary, ChatError> {
        let room = Room::new(kind, participants, ticket_id);
        let room_id = room.room_id;
        self.log.open(room_id).await;

        let cell = Arc::new(Mutex::new(room));
        let mut room = cell.lock().await;
        self.rooms.write().await.insert(room_id, Arc::clone(&cell));

        for session_id in initial_member_ids {
            let Some(handle) = self.sessions.by_session_id(*session_id).await else {
                continue;
            };
            if handle.attach_room(room_id).is_ok() {
                room.member_session_ids.insert(*session_id);
                room.participants.insert(handle.user_id().clone());
            }
        }

        let members: Vec<UserId> = room.participants.iter().cloned().collect();
        self.store.save_room_membership(room_id, &members).await?;

        let summary = room.summary();
        self.fan_out(&room, &ServerEvent::RoomOpened { room: summary.clone() }, None)
            .await;

        tracing::info!(%room_id, ?kind, members = room.member_session_ids.len(), "room created");
        Ok(summary)
    }

    /// Adds a session to a room and announces it to existing members.
    ///
    /// # Errors
    ///
    /// - [`ChatError::Unauthenticated`] if the session is gone.
    /// - [`ChatError::RoomNotFound`] if the room does not exist.
    /// - [`ChatError::PermissionDenied`] for a private room the user is not
    ///   entitled to.
    /// - [`ChatError::AlreadyMember`] if the session is already in the room
    ///   and joins are not idempotent.
    pub async fn join(&self, room_id: RoomId, session_id: SessionId) -> Result<RoomSummary, ChatError> {
        let handle = self.sessions.require(session_id).await?;
        let cell = self.room(room_id).await?;
        let mut room = cell.lock().await;
        if room.released {
            return Err(ChatError::RoomNotFound(room_id));
        }

        if room.member_session_ids.contains(&session_id) {
            return if self.idempotent_join {
                Ok(room.summary())
            } else {
                Err(ChatError::AlreadyMember(room_id))
            };
        }

        let user_id = handle.user_id().clone();
        let entitled = !room.kind.is_private()
            || handle.role().is_admin()
            || room.participants.contains(&user_id)
            || self
                .store
                .load_room_membership(room_id)
                .await?
                .contains(&user_id);
        if !entitled {
            return Err(ChatError::PermissionDenied(format!(
                "user {user_id} may not join room {room_id}"
            )));
        }

        handle.attach_room(room_id)?;
        room.member_session_ids.insert(session_id);
        room.epoch = room.epoch.wrapping_add(1);
        room.last_activity_at = Utc::now();

        if room.participants.insert(user_id.clone()) {
            let members: Vec<UserId> = room.participants.iter().cloned().collect();
            self.store.save_room_membership(room_id, &members).await?;
        }

        let event = ServerEvent::MemberJoined {
            room_id,
            session_id,
            user_id,
            display_name: handle.display_name().to_string(),
        };
        self.fan_out(&room, &event, Some(session_id)).await;

        tracing::debug!(%room_id, %session_id, members = room.member_session_ids.len(), "member joined");
        Ok(room.summary())
    }

    /// Removes a live session from a room and announces it to the rest.
    ///
    /// An emptied room that is not bound to a ticket is removed after the
    /// grace period unless someone joins in the meantime.
    ///
    /// # Errors
    ///
    /// - [`ChatError::Unauthenticated`] if the session is gone.
    /// - [`ChatError::RoomNotFound`] if the room does not exist.
    /// - [`ChatError::PermissionDenied`] if the session is not a member.
    pub async fn leave(self: &Arc<Self>, room_id: RoomId, session_id: SessionId) -> Result<(), ChatError> {
        let handle = self.sessions.require(session_id).await?;
        self.depart(room_id, &handle).await
    }

    /// Same as [`RoomManager::leave`] for a handle that may already have
    /// been purged from the registry (disconnect cleanup).
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RoomNotFound`] if the room does not exist and
    /// [`ChatError::PermissionDenied`] if the session is not a member.
    pub async fn depart(self: &Arc<Self>, room_id: RoomId, handle: &SessionHandle) -> Result<(), ChatError> {
        let session_id = handle.session_id();
        let cell = self.room(room_id).await?;
        let mut room = cell.lock().await;
        if room.released {
            return Err(ChatError::RoomNotFound(room_id));
        }
        if !room.member_session_ids.remove(&session_id) {
            return Err(ChatError::PermissionDenied(format!(
                "session {session_id} is not a member of room {room_id}"
            )));
        }
        room.last_activity_at = Utc::now();
        handle.detach_room(room_id);

        let event = ServerEvent::MemberLeft {
            room_id,
            session_id,
            user_id: handle.user_id().clone(),
        };
        self.fan_out(&room, &event, None).await;

        tracing::debug!(%room_id, %session_id, members = room.member_session_ids.len(), "member left");

        if room.member_session_ids.is_empty() && !room.is_ticket_bound() {
            if self.empty_room_grace.is_zero() {
                self.remove_locked(&mut room).await;
            } else {
                let epoch = room.epoch;
                let cell = Arc::clone(&cell);
                let manager = Arc::clone(self);
                let grace = self.empty_room_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let mut room = cell.lock().await;
                    if room.epoch == epoch && room.member_session_ids.is_empty() && !room.released {
                        manager.remove_locked(&mut room).await;
                    }
                });
            }
        }
        Ok(())
    }

    /// Delivers an event to every member except `except`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RoomNotFound`] if the room does not exist.
    pub async fn broadcast(
        &self,
        room_id: RoomId,
        event: &ServerEvent,
        except: Option<SessionId>,
    ) -> Result<usize, ChatError> {
        let cell = self.room(room_id).await?;
        let room = cell.lock().await;
        if room.released {
            return Err(ChatError::RoomNotFound(room_id));
        }
        Ok(self.fan_out(&room, event, except).await)
    }

    /// Appends a message to the room's log and delivers it to every member,
    /// both under the room lock.
    ///
    /// # Errors
    ///
    /// - [`ChatError::RoomNotFound`] if the room does not exist.
    /// - [`ChatError::PermissionDenied`] if a session sender is not a member.
    /// - [`ChatError::Persistence`] if the store rejects the append.
    pub async fn post(
        &self,
        room_id: RoomId,
        sender: Sender,
        body: String,
        kind: MessageKind,
    ) -> Result<Message, ChatError> {
        let cell = self.room(room_id).await?;
        let mut room = cell.lock().await;
        if room.released {
            return Err(ChatError::RoomNotFound(room_id));
        }
        if let Sender::Session { session_id, .. } = &sender
            && !room.member_session_ids.contains(session_id)
        {
            return Err(ChatError::PermissionDenied(format!(
                "session {session_id} is not a member of room {room_id}"
            )));
        }

        let message = self.log.append(room_id, &sender, body, kind).await?;
        room.last_activity_at = message.sent_at;
        let event = ServerEvent::Message {
            message: message.clone(),
        };
        self.fan_out(&room, &event, None).await;
        Ok(message)
    }

    /// Entitles a user to a private room without joining any session.
    ///
    /// The membership is saved before it takes effect. Returns `true` if
    /// the user was not entitled before.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RoomNotFound`] if the room does not exist and
    /// [`ChatError::Persistence`] if the membership cannot be saved.
    pub async fn add_participant(&self, room_id: RoomId, user_id: UserId) -> Result<bool, ChatError> {
        let cell = self.room(room_id).await?;
        let mut room = cell.lock().await;
        if room.participants.contains(&user_id) {
            return Ok(false);
        }
        let mut members: Vec<UserId> = room.participants.iter().cloned().collect();
        members.push(user_id.clone());
        self.store.save_room_membership(room_id, &members).await?;
        room.participants.insert(user_id);
        Ok(true)
    }

    /// Withdraws an entitlement granted by [`Self::add_participant`].
    /// Sessions already in the room stay.
    pub async fn remove_participant(&self, room_id: RoomId, user_id: &UserId) {
        let Ok(cell) = self.room(room_id).await else {
            return;
        };
        let mut room = cell.lock().await;
        if !room.participants.remove(user_id) {
            return;
        }
        let members: Vec<UserId> = room.participants.iter().cloned().collect();
        if let Err(e) = self.store.save_room_membership(room_id, &members).await {
            tracing::warn!(%room_id, %user_id, error = %e, "membership rollback not persisted");
        }
    }

    /// Joins every live session of `user_id` to the room and sends each a
    /// `room_opened`. Returns the number of sessions joined.
    pub async fn admit_user(&self, room_id: RoomId, user_id: &UserId) -> usize {
        let mut joined = 0;
        for handle in self.sessions.by_user_id(user_id).await {
            match self.join(room_id, handle.session_id()).await {
                Ok(room) => {
                    handle.deliver(ServerEvent::RoomOpened { room });
                    joined += 1;
                }
                Err(ChatError::AlreadyMember(_)) => {}
                Err(e) => {
                    tracing::debug!(%room_id, %user_id, error = %e, "session not admitted");
                }
            }
        }
        joined
    }

    /// Drops every member and deletes the room. Its history stays
    /// readable through the store.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RoomNotFound`] if the room does not exist.
    pub async fn release(&self, room_id: RoomId) -> Result<(), ChatError> {
        let cell = self.room(room_id).await?;
        let mut room = cell.lock().await;
        if room.released {
            return Err(ChatError::RoomNotFound(room_id));
        }

        for &session_id in &room.member_session_ids {
            let Some(handle) = self.sessions.by_session_id(session_id).await else {
                continue;
            };
            handle.detach_room(room_id);
            handle.deliver(ServerEvent::MemberLeft {
                room_id,
                session_id,
                user_id: handle.user_id().clone(),
            });
        }
        room.member_session_ids.clear();
        self.remove_locked(&mut room).await;
        Ok(())
    }

    /// Returns `true` if the session is a member of the room.
    pub async fn is_member(&self, room_id: RoomId, session_id: SessionId) -> bool {
        match self.room(room_id).await {
            Ok(cell) => cell.lock().await.member_session_ids.contains(&session_id),
            Err(_) => false,
        }
    }

    /// Returns a room summary.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RoomNotFound`] if the room does not exist.
    pub async fn summary(&self, room_id: RoomId) -> Result<RoomSummary, ChatError> {
        Ok(self.room(room_id).await?.lock().await.summary())
    }

    /// Returns the number of live rooms.
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Returns `true` if no room is live.
    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }

    async fn remove_locked(&self, room: &mut Room) {
        room.released = true;
        self.rooms.write().await.remove(&room.room_id);
        self.log.close(room.room_id).await;
        tracing::info!(room_id = %room.room_id, "room removed");
    }

    async fn fan_out(&self, room: &Room, event: &ServerEvent, except: Option<SessionId>) -> usize {
        let mut delivered = 0;
        for session_id in &room.member_session_ids {
            if Some(*session_id) == except {
                continue;
            }
            if let Some(handle) = self.sessions.by_session_id(*session_id).await
                && handle.deliver(event.clone())
            {
                delivered += 1;
            }
        }
        delivered
    }
}
