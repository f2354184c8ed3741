//! Append-only, per-room ordered message log.
//!
//! Each room has its own stream with a dedicated append lock; `append` is
//! the single point of total order for a room. Readers copy entries under a
//! short read lock and never wait on the append lock, so a slow replay does
//! not hold up new messages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use chrono::Utc;
use futures_util::Stream;
use tokio::sync::{Mutex, RwLock};

use super::{Message, MessageId, MessageKind, RoomId, Sender};
use crate::error::ChatError;
use crate::persistence::ChatStore;

#[derive(Debug, Default)]
struct RoomStream {
    append_lock: Mutex<()>,
    entries: StdRwLock<Vec<Message>>,
    sealed: AtomicBool,
}

impl RoomStream {
    fn len(&self) -> MessageId {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len() as MessageId
    }

    fn get(&self, message_id: MessageId) -> Option<Message> {
        let index = usize::try_from(message_id).ok()?;
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }
}

/// Store of every room's message stream.
#[derive(Debug)]
pub struct MessageLog {
    streams: RwLock<HashMap<RoomId, Arc<RoomStream>>>,
    store: Arc<dyn ChatStore>,
}

impl MessageLog {
    /// Creates an empty log persisting through `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Opens an empty stream for a new room. Idempotent.
    pub async fn open(&self, room_id: RoomId) {
        self.streams.write().await.entry(room_id).or_default();
    }

    /// Drops a removed room's stream. Later reads must go to the store;
    /// cursors already handed out keep working.
    pub async fn close(&self, room_id: RoomId) {
        if let Some(stream) = self.streams.write().await.remove(&room_id) {
            stream.sealed.store(true, Ordering::Release);
        }
    }

    async fn stream(&self, room_id: RoomId) -> Result<Arc<RoomStream>, ChatError> {
        self.streams
            .read()
            .await
            .get(&room_id)
            .cloned()
            .ok_or(ChatError::RoomNotFound(room_id))
    }

    /// Appends a message and assigns it the next id of the room.
    ///
    /// The message is written to the store before it becomes visible, so a
    /// failed write consumes no id.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RoomNotFound`] for an unknown or closed room and
    /// [`ChatError::Persistence`] if the store rejects the write.
    pub async fn append(
        &self,
        room_id: RoomId,
        sender: &Sender,
        body: String,
        kind: MessageKind,
    ) -> Result<Message, ChatError> {
        let stream = self.stream(room_id).await?;
        let _serial = stream.append_lock.lock().await;
        if stream.sealed.load(Ordering::Acquire) {
            return Err(ChatError::RoomNotFound(room_id));
        }

        let message = Message {
            message_id: stream.len(),
            room_id,
            sender_session_id: match sender {
                Sender::Session { session_id, .. } => Some(*session_id),
                Sender::System => None,
            },
            sender_user_id: sender.user_id().cloned(),
            body,
            sent_at: Utc::now(),
            kind,
        };

        self.store.append_message(&message).await?;
        stream
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());

        tracing::trace!(%room_id, message_id = message.message_id, "message appended");
        Ok(message)
    }

    /// Returns a cursor over messages with `message_id >= from`, at most
    /// `limit` of them, bounded by the log length at call time.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RoomNotFound`] if the room is unknown or closed.
    pub async fn replay(
        &self,
        room_id: RoomId,
        from: MessageId,
        limit: Option<usize>,
    ) -> Result<Replay, ChatError> {
        let stream = self.stream(room_id).await?;
        let high_water = stream.len();
        let end = match limit {
            Some(limit) => high_water.min(from.saturating_add(limit as MessageId)),
            None => high_water,
        };
        Ok(Replay {
            stream,
            from,
            next: from,
            end,
        })
    }

    /// Returns the number of messages in a room.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RoomNotFound`] if the room never existed.
    pub async fn len(&self, room_id: RoomId) -> Result<MessageId, ChatError> {
        Ok(self.stream(room_id).await?.len())
    }

    /// Returns `true` if the room's stream is known to this log.
    pub async fn contains(&self, room_id: RoomId) -> bool {
        self.streams.read().await.contains_key(&room_id)
    }
}

/// Lazy, finite, restartable cursor over a room's log.
///
/// Produced by [`MessageLog::replay`]. Entries are read one at a time on
/// demand; the upper bound is fixed when the cursor is created, so messages
/// appended afterwards are not included.
#[derive(Debug, Clone)]
pub struct Replay {
    stream: Arc<RoomStream>,
    from: MessageId,
    next: MessageId,
    end: MessageId,
}

impl Replay {
    /// Rewinds the cursor to its starting position.
    pub fn restart(&mut self) {
        self.next = self.from;
    }

    /// Id of the next message this cursor would yield; pass it as `since`
    /// to resume after this cursor is exhausted.
    #[must_use]
    pub const fn position(&self) -> MessageId {
        self.next
    }

    /// Number of messages left in this cursor.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.next)
    }

    /// Converts the cursor into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Message> {
        futures_util::stream::iter(self)
    }
}

impl Iterator for Replay {
    type Item = Message;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let message = self.stream.get(self.next)?;
        self.next = self.next.saturating_add(1);
        Some(message)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (0, Some(remaining))
    }
}
