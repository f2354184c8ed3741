//! Live session storage with O(1) lookup by session and by user.
//!
//! [`SessionRegistry`] keeps both indices behind one [`tokio::sync::RwLock`]
//! so a lookup racing a removal sees either the full pre-removal entry or
//! nothing at all.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};

use super::{Presence, Role, RoomId, ServerEvent, SessionHandle, SessionId, UserId};
use crate::error::ChatError;

#[derive(Debug, Default)]
struct Index {
    sessions: HashMap<SessionId, Arc<SessionHandle>>,
    by_user: HashMap<UserId, Vec<SessionId>>,
}

/// A session that has just been removed from the registry.
#[derive(Debug)]
pub struct RemovedSession {
    /// The purged session (presence already `offline`).
    pub handle: Arc<SessionHandle>,
    /// Rooms the session still belonged to at removal time.
    pub room_ids: Vec<RoomId>,
}

/// Owner of every live [`SessionHandle`].
///
/// # Concurrency
///
/// - Lookups take the read lock only for the map probe.
/// - `remove` first closes the session's dispatch gate (waiting for any
///   in-flight dispatch), then purges both indices under the write lock.
#[derive(Debug)]
pub struct SessionRegistry {
    index: RwLock<Index>,
    allow_multi_session: bool,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(allow_multi_session: bool) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            allow_multi_session,
        }
    }

    /// Registers a freshly authenticated connection.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::DuplicateConnection`] if the user already has a
    /// live session and multi-session is disabled.
    pub async fn register(
        &self,
        user_id: UserId,
        display_name: String,
        role: Role,
        outbox: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<Arc<SessionHandle>, ChatError> {
        let mut index = self.index.write().await;
        let existing = index.by_user.get(&user_id).map_or(0, Vec::len);
        if existing > 0 && !self.allow_multi_session {
            return Err(ChatError::DuplicateConnection(user_id.to_string()));
        }

        let handle = Arc::new(SessionHandle::new(user_id.clone(), display_name, role, outbox));
        let session_id = handle.session_id();
        index.sessions.insert(session_id, Arc::clone(&handle));
        index.by_user.entry(user_id).or_default().push(session_id);

        tracing::info!(
            %session_id,
            user_id = %handle.user_id(),
            total_sessions = index.sessions.len(),
            "session registered"
        );
        Ok(handle)
    }

    /// Records activity. Idempotent.
    ///
    /// Returns the handle and whether presence flipped back to `online`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Unauthenticated`] for an unknown session.
    pub async fn touch(&self, session_id: SessionId) -> Result<(Arc<SessionHandle>, bool), ChatError> {
        let handle = self.require(session_id).await?;
        let previous = handle.touch();
        Ok((handle, previous == Presence::Away))
    }

    /// Sets an explicit presence (`online` or `away`).
    ///
    /// Returns the handle and whether presence actually changed.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Unauthenticated`] for an unknown session and
    /// [`ChatError::InvalidPayload`] for `offline`, which only removal sets.
    pub async fn set_presence(
        &self,
        session_id: SessionId,
        presence: Presence,
    ) -> Result<(Arc<SessionHandle>, bool), ChatError> {
        if presence == Presence::Offline {
            return Err(ChatError::InvalidPayload(
                "presence offline is set by disconnecting".to_string(),
            ));
        }
        let handle = self.require(session_id).await?;
        let previous = handle.set_presence(presence);
        Ok((handle, previous != presence))
    }

    /// Removes a session: waits for in-flight dispatch, flips presence to
    /// `offline`, and purges it from both indices.
    ///
    /// Returns `None` if the session is unknown or already being removed.
    pub async fn remove(&self, session_id: SessionId) -> Option<RemovedSession> {
        let handle = self.by_session_id(session_id).await?;
        if !handle.close_gate().await {
            return None;
        }

        let mut index = self.index.write().await;
        index.sessions.remove(&session_id);
        if let Some(ids) = index.by_user.get_mut(handle.user_id()) {
            ids.retain(|id| *id != session_id);
            if ids.is_empty() {
                index.by_user.remove(handle.user_id());
            }
        }
        let room_ids = handle.mark_removed();

        tracing::info!(
            %session_id,
            user_id = %handle.user_id(),
            rooms = room_ids.len(),
            remaining_sessions = index.sessions.len(),
            "session removed"
        );
        Some(RemovedSession { handle, room_ids })
    }

    /// Looks up a session by id.
    pub async fn by_session_id(&self, session_id: SessionId) -> Option<Arc<SessionHandle>> {
        self.index.read().await.sessions.get(&session_id).cloned()
    }

    /// Looks up a session by id, failing with `Unauthenticated`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Unauthenticated`] for an unknown session.
    pub async fn require(&self, session_id: SessionId) -> Result<Arc<SessionHandle>, ChatError> {
        self.by_session_id(session_id)
            .await
            .ok_or(ChatError::Unauthenticated)
    }

    /// Returns every live session of a user.
    pub async fn by_user_id(&self, user_id: &UserId) -> Vec<Arc<SessionHandle>> {
        let index = self.index.read().await;
        index
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| index.sessions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns online sessions whose last activity is older than `cutoff`.
    pub async fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<Arc<SessionHandle>> {
        let index = self.index.read().await;
        index
            .sessions
            .values()
            .filter(|s| s.presence() == Presence::Online && s.last_active_at() < cutoff)
            .cloned()
            .collect()
    }

    /// Returns the number of live sessions.
    pub async fn len(&self) -> usize {
        self.index.read().await.sessions.len()
    }

    /// Returns `true` if no session is live.
    pub async fn is_empty(&self) -> bool {
        self.index.read().await.sessions.is_empty()
    }
}
