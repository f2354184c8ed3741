//! Persistence layer: the storage collaborator of the chat core.
//!
//! [`ChatStore`] is the narrow interface the core needs for durable
//! message history, tickets and room membership. Two implementations ship:
//! [`memory::MemoryStore`] (default, and used by tests) and
//! [`postgres::PostgresStore`] backed by `sqlx::PgPool`.
//!
//! Ordering and atomicity: `append_message` is always called under the
//! room's append lock with the next gapless id, and `save_ticket` under the
//! ticket's lock after a transition has been validated, so implementations
//! only need single-row atomicity.

pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;

use crate::domain::{Message, MessageId, RoomId, Ticket, TicketId, UserId};
use crate::error::ChatError;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
#[cfg(test)]
pub(crate) use memory::FailingStore;

/// Durable storage for messages, tickets and room membership.
#[async_trait]
pub trait ChatStore: Send + Sync + fmt::Debug {
    /// Appends one message. Called with strictly increasing ids per room.
    async fn append_message(&self, message: &Message) -> Result<(), ChatError>;

    /// Loads messages of a room with `message_id >= from`, in order.
    async fn load_messages(
        &self,
        room_id: RoomId,
        from: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError>;

    /// Loads a ticket by id.
    async fn load_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, ChatError>;

    /// Inserts or replaces a ticket.
    async fn save_ticket(&self, ticket: &Ticket) -> Result<(), ChatError>;

    /// Loads the users entitled to a room.
    async fn load_room_membership(&self, room_id: RoomId) -> Result<Vec<UserId>, ChatError>;

    /// Replaces the users entitled to a room.
    async fn save_room_membership(&self, room_id: RoomId, members: &[UserId]) -> Result<(), ChatError>;
}
