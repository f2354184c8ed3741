//! PostgreSQL implementation of [`ChatStore`].

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::ChatStore;
use super::models::{MessageRow, TicketRow};
use crate::config::GatewayConfig;
use crate::domain::{Message, MessageId, RoomId, Ticket, TicketId, UserId};
use crate::error::ChatError;

fn db_err(e: impl std::fmt::Display) -> ChatError {
    ChatError::Persistence(e.to_string())
}

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects using the database settings of `config` and applies the
    /// bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`ChatError::Persistence`] if the database is unreachable
    /// or a migration fails.
    pub async fn connect(config: &GatewayConfig) -> Result<Self, ChatError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(
                config.database_connect_timeout_secs,
            ))
            .connect(&config.database_url)
            .await
            .map_err(db_err)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(db_err)?;

        tracing::info!("postgres store ready");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl ChatStore for PostgresStore {
    async fn append_message(&self, message: &Message) -> Result<(), ChatError> {
        let message_id = i64::try_from(message.message_id).map_err(db_err)?;
        sqlx::query(
            "INSERT INTO chat_messages \
             (room_id, message_id, sender_session_id, sender_user_id, body, kind, sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(*message.room_id.as_uuid())
        .bind(message_id)
        .bind(message.sender_session_id.map(uuid::Uuid::from))
        .bind(message.sender_user_id.as_ref().map(UserId::as_str))
        .bind(&message.body)
        .bind(message.kind.as_str())
        .bind(message.sent_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn load_messages(
        &self,
        room_id: RoomId,
        from: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError> {
        let from = i64::try_from(from).map_err(db_err)?;
        let limit = i64::try_from(limit).map_err(db_err)?;
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT room_id, message_id, sender_session_id, sender_user_id, body, kind, sent_at \
             FROM chat_messages WHERE room_id = $1 AND message_id >= $2 \
             ORDER BY message_id ASC LIMIT $3",
        )
        .bind(*room_id.as_uuid())
        .bind(from)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn load_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>, ChatError> {
        let row = sqlx::query_as::<_, TicketRow>(
            "SELECT ticket_id, ticket_json, updated_at FROM support_tickets WHERE ticket_id = $1",
        )
        .bind(*ticket_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| serde_json::from_value::<Ticket>(r.ticket_json).map_err(db_err))
            .transpose()
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<(), ChatError> {
        let json = serde_json::to_value(ticket).map_err(db_err)?;
        sqlx::query(
            "INSERT INTO support_tickets \
             (ticket_id, room_id, requester_user_id, assigned_agent_id, status, priority, ticket_json, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (ticket_id) DO UPDATE SET \
               assigned_agent_id = EXCLUDED.assigned_agent_id, \
               status = EXCLUDED.status, \
               priority = EXCLUDED.priority, \
               ticket_json = EXCLUDED.ticket_json, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(*ticket.ticket_id.as_uuid())
        .bind(*ticket.room_id.as_uuid())
        .bind(ticket.requester_user_id.as_str())
        .bind(ticket.assigned_agent_id.as_ref().map(UserId::as_str))
        .bind(ticket.status.as_str())
        .bind(ticket.priority.as_str())
        .bind(json)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn load_room_membership(&self, room_id: RoomId) -> Result<Vec<UserId>, ChatError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM room_members WHERE room_id = $1 ORDER BY user_id",
        )
        .bind(*room_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(UserId::new).collect())
    }

    async fn save_room_membership(&self, room_id: RoomId, members: &[UserId]) -> Result<(), ChatError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM room_members WHERE room_id = $1")
            .bind(*room_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for user in members {
            sqlx::query("INSERT INTO room_members (room_id, user_id) VALUES ($1, $2)")
                .bind(*room_id.as_uuid())
                .bind(user.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
