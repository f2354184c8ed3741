//! In-process [`ChatStore`] used when persistence is disabled.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::ChatStore;
use crate::domain::{Message, MessageId, RoomId, Ticket, TicketId, UserId};
use crate::error::ChatError;

/// Volatile store keeping everything in hash maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<HashMap<RoomId, Vec<Message>>>,
    tickets: RwLock<HashMap<TicketId, Ticket>>,
    memberships: RwLock<HashMap<RoomId, Vec<UserId>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn append_message(&self, message: &Message) -> Result<(), ChatError> {
        let mut messages = self.messages.write().await;
        let log = messages.entry(message.room_id).or_default();
        let expected = log.len() as MessageId;
        if message.message_id != expected {
            return Err(ChatError::Persistence(format!(
                "out-of-order append in room {}: expected {expected}, got {}",
                message.room_id, message.message_id
            )));
        }
        log.push(message.clone());
        Ok(())
    }

    async fn load_messages(
        &self,
        room_id: RoomId,
        from: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError> {
        let messages = self.messages.read().await;
        Ok(messages
            .get(&room_id)
            .map(|log| {
                log.iter()
                    .filter(|m| m.message_id >= from)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, ChatError> {
        Ok(self.tickets.read().await.get(&ticket_id).cloned())
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<(), ChatError> {
        self.tickets
            .write()
            .await
            .insert(ticket.ticket_id, ticket.clone());
        Ok(())
    }

    async fn load_room_membership(&self, room_id: RoomId) -> Result<Vec<UserId>, ChatError> {
        Ok(self
            .memberships
            .read()
            .await
            .get(&room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_room_membership(&self, room_id: RoomId, members: &[UserId]) -> Result<(), ChatError> {
        self.memberships
            .write()
            .await
            .insert(room_id, members.to_vec());
        Ok(())
    }
}

/// [`MemoryStore`] whose ticket and membership writes can be switched to fail.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FailingStore {
    inner: MemoryStore,
    fail_tickets: std::sync::atomic::AtomicBool,
    fail_memberships: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FailingStore {
    pub(crate) fn set_fail_tickets(&self, fail: bool) {
        self.fail_tickets.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn set_fail_memberships(&self, fail: bool) {
        self.fail_memberships.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(flag: &std::sync::atomic::AtomicBool) -> Result<(), ChatError> {
        if flag.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ChatError::Persistence("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl ChatStore for FailingStore {
    async fn append_message(&self, message: &Message) -> Result<(), ChatError> {
        self.inner.append_message(message).await
    }

    async fn load_messages(
        &self,
        room_id: RoomId,
        from: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError> {
        self.inner.load_messages(room_id, from, limit).await
    }

    async fn load_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, ChatError> {
        self.inner.load_ticket(ticket_id).await
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<(), ChatError> {
        Self::check(&self.fail_tickets)?;
        self.inner.save_ticket(ticket).await
    }

    async fn load_room_membership(&self, room_id: RoomId) -> Result<Vec<UserId>, ChatError> {
        self.inner.load_room_membership(room_id).await
    }

    async fn save_room_membership(&self, room_id: RoomId, members: &[UserId]) -> Result<(), ChatError> {
        Self::check(&self.fail_memberships)?;
        self.inner.save_room_membership(room_id, members).await
    }
}
