//! Support-ticket lifecycle, assignment, and room binding.
//!
//! [`TicketEngine`] owns every ticket behind its own
//! [`tokio::sync::Mutex`]. A transition is validated and applied on a copy,
//! persisted, and only then committed, so a failed save leaves the ticket
//! untouched. Broadcasts go through the bound room while the ticket lock is
//! still held (ticket → room lock order).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};

use super::{
    Actor, AgentQueue, EventBus, Message, MessageKind, Priority, Role, RoomId, RoomKind,
    RoomManager, Sender, ServerEvent, SessionHandle, Ticket, TicketCommand, TicketId,
    TicketStatus, UserId,
};
use crate::error::ChatError;
use crate::persistence::ChatStore;

/// Who is driving a ticket operation.
#[derive(Debug, Clone, Copy)]
pub enum Caller<'a> {
    /// An authenticated user with their role.
    User {
        /// Acting user.
        user_id: &'a UserId,
        /// Role granted at connect time.
        role: Role,
    },
    /// The idle sweeper.
    Sweeper,
}

impl Caller<'_> {
    fn actor(self) -> Actor {
        match self {
            Self::User { user_id, .. } => Actor::user(user_id.clone()),
            Self::Sweeper => Actor::System,
        }
    }
}

/// Ticket counts per status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TicketCounts {
    /// Every ticket ever created.
    pub total: usize,
    /// Count per status in lifecycle order.
    pub by_status: Vec<(TicketStatus, usize)>,
}

/// Result of opening a support request.
#[derive(Debug, Clone)]
pub struct SupportRequest {
    /// The new ticket.
    pub ticket: Ticket,
    /// The requester's opening message, if a body was given.
    pub first_message: Option<Message>,
}

/// Central store and state machine for support tickets.
#[derive(Debug)]
pub struct TicketEngine {
    tickets: RwLock<HashMap<TicketId, Arc<Mutex<Ticket>>>>,
    by_room: RwLock<HashMap<RoomId, TicketId>>,
    rooms: Arc<RoomManager>,
    queue: Arc<AgentQueue>,
    event_bus: EventBus,
    store: Arc<dyn ChatStore>,
    reopen_window: Duration,
    idle_close_after: Duration,
}

impl TicketEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new(
        rooms: Arc<RoomManager>,
        queue: Arc<AgentQueue>,
        event_bus: EventBus,
        store: Arc<dyn ChatStore>,
        reopen_window: Duration,
        idle_close_after: Duration,
    ) -> Self {
        Self {
            tickets: RwLock::new(HashMap::new()),
            by_room: RwLock::new(HashMap::new()),
            rooms,
            queue,
            event_bus,
            store,
            reopen_window,
            idle_close_after,
        }
    }

    async fn cell(&self, ticket_id: TicketId) -> Result<Arc<Mutex<Ticket>>, ChatError> {
        self.tickets
            .read()
            .await
            .get(&ticket_id)
            .cloned()
            .ok_or(ChatError::TicketNotFound(ticket_id))
    }

    /// Opens a ticket with its own support room and joins the requester.
    ///
    /// A non-empty `body` is posted as the requester's first message.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Persistence`] if the ticket cannot be saved; the
    /// support room is released again.
    pub async fn create(
        &self,
        requester: &SessionHandle,
        body: String,
        priority: Priority,
    ) -> Result<SupportRequest, ChatError> {
        let ticket_id = TicketId::new();
        let requester_id = requester.user_id().clone();
        let room = self
            .rooms
            .create_room(
                RoomKind::Support,
                BTreeSet::from([requester_id.clone()]),
                &[requester.session_id()],
                Some(ticket_id),
            )
            .await?;

        let ticket = Ticket::new(ticket_id, room.room_id, requester_id, priority);
        if let Err(e) = self.store.save_ticket(&ticket).await {
            if let Err(release_err) = self.rooms.release(room.room_id).await {
                tracing::warn!(room_id = %room.room_id, error = %release_err, "orphan support room not released");
            }
            return Err(e);
        }

        let cell = Arc::new(Mutex::new(ticket.clone()));
        let guard = cell.lock().await;
        self.tickets.write().await.insert(ticket_id, Arc::clone(&cell));
        self.by_room.write().await.insert(room.room_id, ticket_id);

        let event = ServerEvent::TicketCreated {
            ticket: ticket.clone(),
        };
        self.announce(room.room_id, event).await;

        let first_message = if body.is_empty() {
            None
        } else {
            let sender = Sender::Session {
                session_id: requester.session_id(),
                user_id: requester.user_id().clone(),
            };
            Some(
                self.rooms
                    .post(room.room_id, sender, body, MessageKind::Text)
                    .await?,
            )
        };
        drop(guard);

        tracing::info!(%ticket_id, room_id = %room.room_id, priority = priority.as_str(), "ticket created");
        Ok(SupportRequest {
            ticket,
            first_message,
        })
    }

    /// Drives a ticket through one lifecycle step.
    ///
    /// # Errors
    ///
    /// - [`ChatError::TicketNotFound`] for an unknown ticket.
    /// - [`ChatError::PermissionDenied`] if the caller may not perform the
    ///   action.
    /// - The status errors of [`Ticket::apply`].
    /// - [`ChatError::Persistence`] if the new state or the assignee's room
    ///   membership cannot be saved; the ticket and room are left unchanged.
    pub async fn transition(
        &self,
        ticket_id: TicketId,
        command: TicketCommand,
        caller: Caller<'_>,
    ) -> Result<Ticket, ChatError> {
        let cell = self.cell(ticket_id).await?;
        let mut ticket = cell.lock().await;
        authorize(&ticket, &command, caller)?;

        let mut next = ticket.clone();
        let record = next.apply(command.clone(), caller.actor(), Utc::now(), self.reopen_window)?;
        let room_id = next.room_id;

        let entitled = match &command {
            TicketCommand::Assign { agent_id } => self
                .rooms
                .add_participant(room_id, agent_id.clone())
                .await?
                .then_some(agent_id),
            _ => None,
        };
        if let Err(e) = self.store.save_ticket(&next).await {
            if let Some(agent_id) = entitled {
                self.rooms.remove_participant(room_id, agent_id).await;
            }
            return Err(e);
        }
        *ticket = next;

        tracing::info!(
            %ticket_id,
            from = %record.from,
            to = %record.to,
            actor = ?record.actor,
            "ticket transition"
        );

        if let TicketCommand::Assign { agent_id } = &command {
            self.rooms.admit_user(room_id, agent_id).await;
        }

        let event = ServerEvent::TicketStatusChanged {
            ticket_id,
            room_id,
            old_status: record.from,
            new_status: record.to,
            actor: record.actor,
            assigned_agent_id: ticket.assigned_agent_id.clone(),
            at: record.at,
        };
        self.announce(room_id, event).await;

        let notice = match &command {
            TicketCommand::Assign { agent_id } => Some(format!("{agent_id} has been assigned to this ticket")),
            TicketCommand::Resolve { summary } => Some(format!("Ticket resolved: {summary}")),
            TicketCommand::Reopen => Some("Ticket reopened".to_string()),
            TicketCommand::StartWork | TicketCommand::Close => None,
        };
        if let Some(notice) = notice {
            self.system_message(room_id, notice).await;
        }

        if ticket.status == TicketStatus::Closed
            && let Err(e) = self.rooms.release(room_id).await
        {
            tracing::warn!(%ticket_id, %room_id, error = %e, "closed ticket room not released");
        }
        Ok(ticket.clone())
    }

    /// Changes a ticket's priority. Allowed in every status.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TicketNotFound`] for an unknown ticket,
    /// [`ChatError::PermissionDenied`] for callers that do not handle
    /// tickets, and [`ChatError::Persistence`] if the save fails.
    pub async fn set_priority(
        &self,
        ticket_id: TicketId,
        priority: Priority,
        caller: Caller<'_>,
    ) -> Result<Ticket, ChatError> {
        if let Caller::User { user_id, role } = caller
            && !role.handles_tickets()
        {
            return Err(ChatError::PermissionDenied(format!(
                "user {user_id} may not change ticket priority"
            )));
        }

        let cell = self.cell(ticket_id).await?;
        let mut ticket = cell.lock().await;
        let old_priority = ticket.priority;
        if old_priority == priority {
            return Ok(ticket.clone());
        }

        let mut next = ticket.clone();
        next.priority = priority;
        next.updated_at = Utc::now();
        self.store.save_ticket(&next).await?;
        *ticket = next;

        let event = ServerEvent::TicketPriorityChanged {
            ticket_id,
            room_id: ticket.room_id,
            old_priority,
            new_priority: priority,
            actor: caller.actor(),
        };
        self.announce(ticket.room_id, event).await;
        Ok(ticket.clone())
    }

    /// Records activity in a ticket's room so idle auto-close restarts.
    pub async fn touch_room(&self, room_id: RoomId) {
        let Some(ticket_id) = self.ticket_for_room(room_id).await else {
            return;
        };
        if let Ok(cell) = self.cell(ticket_id).await {
            cell.lock().await.last_activity_at = Utc::now();
        }
    }

    /// Returns the ticket bound to a room.
    pub async fn ticket_for_room(&self, room_id: RoomId) -> Option<TicketId> {
        self.by_room.read().await.get(&room_id).copied()
    }

    /// Returns a ticket, falling back to the store for tickets this process
    /// does not hold.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TicketNotFound`] if neither knows the ticket.
    pub async fn get(&self, ticket_id: TicketId) -> Result<Ticket, ChatError> {
        if let Ok(cell) = self.cell(ticket_id).await {
            return Ok(cell.lock().await.clone());
        }
        self.store
            .load_ticket(ticket_id)
            .await?
            .ok_or(ChatError::TicketNotFound(ticket_id))
    }

    /// Returns every ticket, optionally filtered by status, oldest first.
    pub async fn list(&self, status: Option<TicketStatus>) -> Vec<Ticket> {
        let cells: Vec<_> = self.tickets.read().await.values().cloned().collect();
        let mut tickets = Vec::with_capacity(cells.len());
        for cell in cells {
            let ticket = cell.lock().await;
            if status.is_none_or(|s| s == ticket.status) {
                tickets.push(ticket.clone());
            }
        }
        tickets.sort_by_key(|t| t.created_at);
        tickets
    }

    /// Returns the non-closed tickets, oldest first.
    pub async fn queue_snapshot(&self) -> Vec<Ticket> {
        let mut tickets = self.list(None).await;
        tickets.retain(|t| !t.status.is_terminal());
        tickets
    }

    /// Returns the non-closed tickets in which `user_id` is a party.
    pub async fn active_for_user(&self, user_id: &UserId) -> Vec<Ticket> {
        let mut tickets = self.queue_snapshot().await;
        tickets.retain(|t| t.is_party(user_id));
        tickets
    }

    /// Returns ticket counts per status.
    pub async fn counts(&self) -> TicketCounts {
        let tickets = self.list(None).await;
        TicketCounts {
            total: tickets.len(),
            by_status: TicketStatus::ALL
                .into_iter()
                .map(|s| (s, tickets.iter().filter(|t| t.status == s).count()))
                .collect(),
        }
    }

    /// Returns resolved tickets idle since before `now - idle_close_after`.
    pub async fn idle_resolved(&self, now: DateTime<Utc>) -> Vec<TicketId> {
        self.list(Some(TicketStatus::Resolved))
            .await
            .into_iter()
            .filter(|t| t.is_idle_resolved(now, self.idle_close_after))
            .map(|t| t.ticket_id)
            .collect()
    }

    /// Closes every idle resolved ticket. Returns how many were closed.
    pub async fn close_idle(&self, now: DateTime<Utc>) -> usize {
        let mut closed = 0;
        for ticket_id in self.idle_resolved(now).await {
            match self.transition(ticket_id, TicketCommand::Close, Caller::Sweeper).await {
                Ok(_) => closed += 1,
                // activity or a manual transition raced the sweep
                Err(e) => tracing::debug!(%ticket_id, error = %e, "idle close skipped"),
            }
        }
        closed
    }

    /// Subscribes an agent session to the queue and returns the snapshot it
    /// should receive.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::PermissionDenied`] for roles that do not handle
    /// tickets.
    pub async fn subscribe_queue(&self, session: &SessionHandle) -> Result<Vec<Ticket>, ChatError> {
        if !session.role().handles_tickets() {
            return Err(ChatError::PermissionDenied(format!(
                "user {} may not watch the ticket queue",
                session.user_id()
            )));
        }
        self.queue.subscribe(session.session_id()).await;
        Ok(self.queue_snapshot().await)
    }

    /// Removes a session from the queue.
    pub async fn unsubscribe_queue(&self, session_id: super::SessionId) -> bool {
        self.queue.unsubscribe(session_id).await
    }

    async fn announce(&self, room_id: RoomId, event: ServerEvent) {
        let members: BTreeSet<_> = match self.rooms.summary(room_id).await {
            Ok(summary) => summary.member_session_ids.into_iter().collect(),
            Err(_) => BTreeSet::new(),
        };
        if let Err(e) = self.rooms.broadcast(room_id, &event, None).await {
            tracing::debug!(%room_id, error = %e, "ticket event not delivered to room");
        }
        self.queue.notify(&event, &members).await;
        self.event_bus.publish(event);
    }

    async fn system_message(&self, room_id: RoomId, body: String) {
        if let Err(e) = self.rooms.post(room_id, Sender::System, body, MessageKind::System).await {
            tracing::warn!(%room_id, error = %e, "failed to post system message");
        }
    }
}

fn authorize(ticket: &Ticket, command: &TicketCommand, caller: Caller<'_>) -> Result<(), ChatError> {
    let Caller::User { user_id, role } = caller else {
        return Ok(());
    };
    let assigned = ticket.assigned_agent_id.as_ref() == Some(user_id);
    let allowed = match command {
        TicketCommand::Assign { agent_id } => {
            role.is_admin() || (role.handles_tickets() && agent_id == user_id)
        }
        TicketCommand::StartWork | TicketCommand::Resolve { .. } => assigned || role.is_admin(),
        TicketCommand::Close => ticket.is_party(user_id) || role.handles_tickets(),
        TicketCommand::Reopen => ticket.is_party(user_id) || role.is_admin(),
    };
    if allowed {
        Ok(())
    } else {
        Err(ChatError::PermissionDenied(format!(
            "user {user_id} may not {} ticket {}",
            command.action(),
            ticket.ticket_id
        )))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{MessageLog, SessionRegistry};
    use crate::persistence::{FailingStore, MemoryStore};
    use tokio::sync::mpsc;

    struct Fixture {
        sessions: Arc<SessionRegistry>,
        log: Arc<MessageLog>,
        rooms: Arc<RoomManager>,
        engine: TicketEngine,
        store: Arc<dyn ChatStore>,
    }

    fn fixture(reopen_window: Duration) -> Fixture {
        fixture_with_store(Arc::new(MemoryStore::new()), reopen_window)
    }

    fn failing_fixture() -> (Fixture, Arc<FailingStore>) {
        let store = Arc::new(FailingStore::default());
        let fx = fixture_with_store(Arc::clone(&store) as Arc<dyn ChatStore>, Duration::hours(24));
        (fx, store)
    }

    fn fixture_with_store(store: Arc<dyn ChatStore>, reopen_window: Duration) -> Fixture {
        let sessions = Arc::new(SessionRegistry::new(true));
        let log = Arc::new(MessageLog::new(Arc::clone(&store)));
        let rooms = Arc::new(RoomManager::new(
            Arc::clone(&sessions),
            Arc::clone(&log),
            Arc::clone(&store),
            std::time::Duration::ZERO,
            false,
        ));
        let queue = Arc::new(AgentQueue::new(Arc::clone(&sessions)));
        let engine = TicketEngine::new(
            Arc::clone(&rooms),
            queue,
            EventBus::new(16),
            Arc::clone(&store),
            reopen_window,
            Duration::hours(72),
        );
        Fixture {
            sessions,
            log,
            rooms,
            engine,
            store,
        }
    }

    async fn connect(
        fx: &Fixture,
        user: &str,
        role: Role,
    ) -> (Arc<SessionHandle>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let Ok(handle) = fx
            .sessions
            .register(UserId::from(user), user.to_string(), role, tx)
            .await
        else {
            panic!("register failed");
        };
        (handle, rx)
    }

    fn as_caller(handle: &SessionHandle) -> Caller<'_> {
        Caller::User {
            user_id: handle.user_id(),
            role: handle.role(),
        }
    }

    async fn open_ticket(fx: &Fixture, requester: &SessionHandle) -> Ticket {
        let Ok(request) = fx
            .engine
            .create(requester, "my order is late".to_string(), Priority::High)
            .await
        else {
            panic!("create failed");
        };
        request.ticket
    }

    #[tokio::test]
    async fn create_binds_one_support_room() {
        let fx = fixture(Duration::hours(24));
        let (alice, _rx) = connect(&fx, "alice", Role::Customer).await;
        let ticket = open_ticket(&fx, &alice).await;

        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(fx.engine.ticket_for_room(ticket.room_id).await, Some(ticket.ticket_id));
        let Ok(room) = fx.rooms.summary(ticket.room_id).await else {
            panic!("room missing");
        };
        assert_eq!(room.ticket_id, Some(ticket.ticket_id));
        assert_eq!(alice.active_room_ids(), vec![ticket.room_id]);
        assert_eq!(fx.log.len(ticket.room_id).await.ok(), Some(1));
        assert!(fx.store.load_ticket(ticket.ticket_id).await.ok().flatten().is_some());
    }

    #[tokio::test]
    async fn customer_cannot_assign_or_resolve() {
        let fx = fixture(Duration::hours(24));
        let (alice, _rx) = connect(&fx, "alice", Role::Customer).await;
        let ticket = open_ticket(&fx, &alice).await;
        let result = fx
            .engine
            .transition(
                ticket.ticket_id,
                TicketCommand::Assign {
                    agent_id: UserId::from("alice"),
                },
                as_caller(&alice),
            )
            .await;
        assert!(matches!(result, Err(ChatError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn lifecycle_broadcasts_and_closes_room() {
        let fx = fixture(Duration::hours(24));
        let (alice, mut alice_rx) = connect(&fx, "alice", Role::Customer).await;
        let (bob, _bob_rx) = connect(&fx, "bob", Role::Agent).await;
        let ticket = open_ticket(&fx, &alice).await;
        let id = ticket.ticket_id;

        let steps = [
            TicketCommand::Assign {
                agent_id: UserId::from("bob"),
            },
            TicketCommand::StartWork,
            TicketCommand::Resolve {
                summary: "refunded".to_string(),
            },
        ];
        for step in steps {
            assert!(fx.engine.transition(id, step, as_caller(&bob)).await.is_ok());
        }
        let Ok(closed) = fx.engine.transition(id, TicketCommand::Close, as_caller(&alice)).await else {
            panic!("close failed");
        };
        assert_eq!(closed.status, TicketStatus::Closed);
        assert_eq!(closed.history.len(), 4);
        assert!(fx.rooms.summary(ticket.room_id).await.is_err());
        assert!(alice.active_room_ids().is_empty());

        let mut statuses = Vec::new();
        while let Ok(event) = alice_rx.try_recv() {
            if let ServerEvent::TicketStatusChanged { new_status, .. } = event {
                statuses.push(new_status);
            }
        }
        assert_eq!(
            statuses,
            vec![
                TicketStatus::Assigned,
                TicketStatus::InProgress,
                TicketStatus::Resolved,
                TicketStatus::Closed
            ]
        );

        let again = fx.engine.transition(id, TicketCommand::Reopen, as_caller(&alice)).await;
        assert!(matches!(again, Err(ChatError::InvalidTicketTransition { .. })));
        // the room is gone but its history is still in the store
        assert!(!fx.log.contains(ticket.room_id).await);
        let Ok(stored) = fx.store.load_messages(ticket.room_id, 0, 100).await else {
            panic!("load failed");
        };
        assert!(stored.len() >= 3);
    }

    #[tokio::test]
    async fn only_assigned_agent_resolves() {
        let fx = fixture(Duration::hours(24));
        let (alice, _a) = connect(&fx, "alice", Role::Customer).await;
        let (bob, _b) = connect(&fx, "bob", Role::Agent).await;
        let (carol, _c) = connect(&fx, "carol", Role::Agent).await;
        let ticket = open_ticket(&fx, &alice).await;
        let id = ticket.ticket_id;
        let assign = TicketCommand::Assign {
            agent_id: UserId::from("bob"),
        };
        assert!(fx.engine.transition(id, assign, as_caller(&bob)).await.is_ok());
        assert!(fx.engine.transition(id, TicketCommand::StartWork, as_caller(&bob)).await.is_ok());

        let resolve = TicketCommand::Resolve {
            summary: "done".to_string(),
        };
        let denied = fx.engine.transition(id, resolve, as_caller(&carol)).await;
        assert!(matches!(denied, Err(ChatError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn reopen_after_window_fails() {
        let fx = fixture(Duration::zero());
        let (alice, _a) = connect(&fx, "alice", Role::Customer).await;
        let (root, _r) = connect(&fx, "root", Role::Admin).await;
        let ticket = open_ticket(&fx, &alice).await;
        let id = ticket.ticket_id;
        let assign = TicketCommand::Assign {
            agent_id: UserId::from("bob"),
        };
        assert!(fx.engine.transition(id, assign, as_caller(&root)).await.is_ok());
        assert!(fx.engine.transition(id, TicketCommand::StartWork, as_caller(&root)).await.is_ok());
        let resolve = TicketCommand::Resolve {
            summary: "done".to_string(),
        };
        assert!(fx.engine.transition(id, resolve, as_caller(&root)).await.is_ok());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let reopen = fx.engine.transition(id, TicketCommand::Reopen, as_caller(&alice)).await;
        assert!(matches!(reopen, Err(ChatError::InvalidTicketTransition { .. })));
        let Ok(current) = fx.engine.get(id).await else {
            panic!("ticket missing");
        };
        assert_eq!(current.status, TicketStatus::Resolved);
    }

    #[tokio::test]
    async fn priority_change_is_orthogonal() {
        let fx = fixture(Duration::hours(24));
        let (alice, _a) = connect(&fx, "alice", Role::Customer).await;
        let (bob, _b) = connect(&fx, "bob", Role::Agent).await;
        let ticket = open_ticket(&fx, &alice).await;

        let denied = fx
            .engine
            .set_priority(ticket.ticket_id, Priority::Low, as_caller(&alice))
            .await;
        assert!(matches!(denied, Err(ChatError::PermissionDenied(_))));

        let Ok(updated) = fx
            .engine
            .set_priority(ticket.ticket_id, Priority::Low, as_caller(&bob))
            .await
        else {
            panic!("set_priority failed");
        };
        assert_eq!(updated.priority, Priority::Low);
        assert_eq!(updated.status, TicketStatus::Open);
        assert!(updated.history.is_empty());
    }

    #[tokio::test]
    async fn sweeper_closes_idle_resolved_tickets() {
        let fx = fixture(Duration::hours(24));
        let (alice, _a) = connect(&fx, "alice", Role::Customer).await;
        let (bob, _b) = connect(&fx, "bob", Role::Agent).await;
        let ticket = open_ticket(&fx, &alice).await;
        let id = ticket.ticket_id;
        let steps = [
            TicketCommand::Assign {
                agent_id: UserId::from("bob"),
            },
            TicketCommand::StartWork,
            TicketCommand::Resolve {
                summary: "done".to_string(),
            },
        ];
        for step in steps {
            assert!(fx.engine.transition(id, step, as_caller(&bob)).await.is_ok());
        }

        assert_eq!(fx.engine.close_idle(Utc::now()).await, 0);
        let later = Utc::now() + Duration::hours(73);
        assert_eq!(fx.engine.close_idle(later).await, 1);
        let Ok(closed) = fx.engine.get(id).await else {
            panic!("ticket missing");
        };
        assert_eq!(closed.status, TicketStatus::Closed);
        assert_eq!(closed.history.last().map(|r| r.actor.clone()), Some(Actor::System));
    }

    #[tokio::test]
    async fn queue_subscription_requires_agent_role() {
        let fx = fixture(Duration::hours(24));
        let (alice, _a) = connect(&fx, "alice", Role::Customer).await;
        let (bob, mut bob_rx) = connect(&fx, "bob", Role::Agent).await;
        assert!(fx.engine.subscribe_queue(&alice).await.is_err());
        let Ok(snapshot) = fx.engine.subscribe_queue(&bob).await else {
            panic!("subscribe failed");
        };
        assert!(snapshot.is_empty());

        let ticket = open_ticket(&fx, &alice).await;
        let Ok(ServerEvent::TicketCreated { ticket: seen }) = bob_rx.try_recv() else {
            panic!("agent did not see the new ticket");
        };
        assert_eq!(seen.ticket_id, ticket.ticket_id);
        assert_eq!(fx.engine.active_for_user(&UserId::from("alice")).await.len(), 1);
        assert_eq!(fx.engine.counts().await.total, 1);
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn status_changes(events: &[ServerEvent]) -> Vec<TicketStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::TicketStatusChanged { new_status, .. } => Some(*new_status),
                _ => None,
            })
            .collect()
    }

    fn assign_bob() -> TicketCommand {
        TicketCommand::Assign {
            agent_id: UserId::from("bob"),
        }
    }

    #[tokio::test]
    async fn failed_create_leaves_no_support_room() {
        let (fx, store) = failing_fixture();
        let (alice, mut alice_rx) = connect(&fx, "alice", Role::Customer).await;
        store.set_fail_tickets(true);

        let result = fx
            .engine
            .create(&alice, "help".to_string(), Priority::Normal)
            .await;
        assert!(matches!(result, Err(ChatError::Persistence(_))));
        assert!(fx.rooms.is_empty().await);
        assert!(alice.active_room_ids().is_empty());
        assert!(fx.engine.list(None).await.is_empty());

        let events = drain(&mut alice_rx);
        assert!(!events.iter().any(|e| matches!(e, ServerEvent::TicketCreated { .. })));
        assert!(!events.iter().any(|e| matches!(e, ServerEvent::Message { .. })));
    }

    #[tokio::test]
    async fn assign_with_unsaved_membership_changes_nothing() {
        let (fx, store) = failing_fixture();
        let (alice, mut alice_rx) = connect(&fx, "alice", Role::Customer).await;
        let (bob, _b) = connect(&fx, "bob", Role::Agent).await;
        let ticket = open_ticket(&fx, &alice).await;
        drain(&mut alice_rx);

        store.set_fail_memberships(true);
        let result = fx.engine.transition(ticket.ticket_id, assign_bob(), as_caller(&bob)).await;
        assert!(matches!(result, Err(ChatError::Persistence(_))));

        let Ok(current) = fx.engine.get(ticket.ticket_id).await else {
            panic!("ticket missing");
        };
        assert_eq!(current.status, TicketStatus::Open);
        assert_eq!(current.assigned_agent_id, None);
        assert!(bob.active_room_ids().is_empty());
        assert!(status_changes(&drain(&mut alice_rx)).is_empty());

        store.set_fail_memberships(false);
        assert!(fx.engine.transition(ticket.ticket_id, assign_bob(), as_caller(&bob)).await.is_ok());
        assert_eq!(status_changes(&drain(&mut alice_rx)), vec![TicketStatus::Assigned]);
    }

    #[tokio::test]
    async fn assign_with_unsaved_ticket_withdraws_room_access() {
        let (fx, store) = failing_fixture();
        let (alice, mut alice_rx) = connect(&fx, "alice", Role::Customer).await;
        let (bob, _b) = connect(&fx, "bob", Role::Agent).await;
        let ticket = open_ticket(&fx, &alice).await;
        drain(&mut alice_rx);

        store.set_fail_tickets(true);
        let result = fx.engine.transition(ticket.ticket_id, assign_bob(), as_caller(&bob)).await;
        assert!(matches!(result, Err(ChatError::Persistence(_))));

        let Ok(current) = fx.engine.get(ticket.ticket_id).await else {
            panic!("ticket missing");
        };
        assert_eq!(current.status, TicketStatus::Open);
        assert!(current.history.is_empty());
        assert!(status_changes(&drain(&mut alice_rx)).is_empty());

        let join = fx.rooms.join(ticket.room_id, bob.session_id()).await;
        assert!(matches!(join, Err(ChatError::PermissionDenied(_))));
        let members = fx.store.load_room_membership(ticket.room_id).await.unwrap_or_default();
        assert_eq!(members, vec![UserId::from("alice")]);
    }

    #[tokio::test]
    async fn unsaved_priority_keeps_old_value() {
        let (fx, store) = failing_fixture();
        let (alice, mut alice_rx) = connect(&fx, "alice", Role::Customer).await;
        let (bob, _b) = connect(&fx, "bob", Role::Agent).await;
        let ticket = open_ticket(&fx, &alice).await;
        drain(&mut alice_rx);

        store.set_fail_tickets(true);
        let result = fx
            .engine
            .set_priority(ticket.ticket_id, Priority::Low, as_caller(&bob))
            .await;
        assert!(matches!(result, Err(ChatError::Persistence(_))));

        let Ok(current) = fx.engine.get(ticket.ticket_id).await else {
            panic!("ticket missing");
        };
        assert_eq!(current.priority, Priority::High);
        assert!(
            !drain(&mut alice_rx)
                .iter()
                .any(|e| matches!(e, ServerEvent::TicketPriorityChanged { .. }))
        );
    }

    #[tokio::test]
    async fn assignee_sees_own_assignment_without_queue() {
        let fx = fixture(Duration::hours(24));
        let (alice, _a) = connect(&fx, "alice", Role::Customer).await;
        let (root, _r) = connect(&fx, "root", Role::Admin).await;
        let (bob, mut bob_rx) = connect(&fx, "bob", Role::Agent).await;
        let ticket = open_ticket(&fx, &alice).await;

        assert!(fx.engine.transition(ticket.ticket_id, assign_bob(), as_caller(&root)).await.is_ok());
        assert_eq!(bob.active_room_ids(), vec![ticket.room_id]);

        let events = drain(&mut bob_rx);
        let opened = events
            .iter()
            .position(|e| matches!(e, ServerEvent::RoomOpened { .. }));
        let assigned = events.iter().position(|e| {
            matches!(
                e,
                ServerEvent::TicketStatusChanged {
                    new_status: TicketStatus::Assigned,
                    ..
                }
            )
        });
        let (Some(opened), Some(assigned)) = (opened, assigned) else {
            panic!("agent missed its assignment: {events:?}");
        };
        assert!(opened < assigned);
    }
}
