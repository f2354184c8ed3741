//! Chat gateway: connection lifecycle and inbound event dispatch.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::auth::Authorizer;
use crate::config::GatewayConfig;
use crate::domain::{
    AgentQueue, Caller, EventBus, Message, MessageId, MessageKind, MessageLog, Presence, Role,
    RoomId, RoomKind, RoomManager, Sender, ServerEvent, SessionHandle, SessionId, SessionRegistry,
    TicketCommand, TicketEngine, TicketId, TicketStatus, UserId,
};
use crate::error::ChatError;
use crate::persistence::ChatStore;
use crate::ws::messages::ClientEvent;

/// Facade over the chat core.
///
/// Stateless coordinator: the session registry, room manager, message log
/// and ticket engine own all state. Every inbound event follows the same
/// pattern: resolve the session → validate → mutate → broadcast.
#[derive(Debug)]
pub struct ChatGateway {
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomManager>,
    log: Arc<MessageLog>,
    tickets: Arc<TicketEngine>,
    store: Arc<dyn ChatStore>,
    authorizer: Arc<dyn Authorizer>,
    event_bus: EventBus,
    max_message_len: usize,
    replay_max_limit: usize,
}

impl ChatGateway {
    /// Wires the chat core together from configuration and collaborators.
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        store: Arc<dyn ChatStore>,
        authorizer: Arc<dyn Authorizer>,
        event_bus: EventBus,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(config.allow_multi_session));
        let log = Arc::new(MessageLog::new(Arc::clone(&store)));
        let rooms = Arc::new(RoomManager::new(
            Arc::clone(&sessions),
            Arc::clone(&log),
            Arc::clone(&store),
            config.empty_room_grace(),
            config.idempotent_join,
        ));
        let queue = Arc::new(AgentQueue::new(Arc::clone(&sessions)));
        let tickets = Arc::new(TicketEngine::new(
            Arc::clone(&rooms),
            queue,
            event_bus.clone(),
            Arc::clone(&store),
            config.ticket_reopen_window(),
            config.ticket_idle_close(),
        ));

        Self {
            sessions,
            rooms,
            log,
            tickets,
            store,
            authorizer,
            event_bus,
            max_message_len: config.max_message_len,
            replay_max_limit: config.replay_max_limit.max(1),
        }
    }

    /// Returns the session registry.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Returns the room manager.
    #[must_use]
    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// Returns the message log.
    #[must_use]
    pub fn log(&self) -> &Arc<MessageLog> {
        &self.log
    }

    /// Returns the ticket engine.
    #[must_use]
    pub fn tickets(&self) -> &Arc<TicketEngine> {
        &self.tickets
    }

    /// Returns the ticket event bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Upper bound for one replay page.
    #[must_use]
    pub const fn replay_max_limit(&self) -> usize {
        self.replay_max_limit
    }

    /// Authenticates and registers a new session.
    ///
    /// The session automatically rejoins the rooms of every active ticket
    /// its user is a party to, then receives `connected`.
    ///
    /// # Errors
    ///
    /// - [`ChatError::InvalidPayload`] for an empty user id.
    /// - [`ChatError::Unauthenticated`] if the authorizer rejects the token.
    /// - [`ChatError::DuplicateConnection`] under the single-session policy.
    pub async fn connect(
        &self,
        user_id: UserId,
        display_name: Option<String>,
        auth_token: &str,
        outbox: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<Arc<SessionHandle>, ChatError> {
        if user_id.as_str().trim().is_empty() {
            return Err(ChatError::InvalidPayload("user_id must not be empty".to_string()));
        }
        let role = self.authorizer.authenticate(&user_id, auth_token).await?;
        let display_name = display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| user_id.to_string());
        let handle = self
            .sessions
            .register(user_id, display_name, role, outbox)
            .await?;
        let session_id = handle.session_id();

        let mut rejoined_room_ids = Vec::new();
        for ticket in self.tickets.active_for_user(handle.user_id()).await {
            match self.rooms.join(ticket.room_id, session_id).await {
                Ok(_) => rejoined_room_ids.push(ticket.room_id),
                Err(e) => {
                    tracing::debug!(%session_id, room_id = %ticket.room_id, error = %e, "auto-rejoin skipped");
                }
            }
        }

        handle.deliver(ServerEvent::Connected {
            session_id,
            user_id: handle.user_id().clone(),
            rejoined_room_ids: rejoined_room_ids.clone(),
        });
        for room_id in rejoined_room_ids {
            if let Ok(room) = self.rooms.summary(room_id).await {
                handle.deliver(ServerEvent::RoomOpened { room });
            }
        }

        tracing::info!(%session_id, user_id = %handle.user_id(), role = ?handle.role(), "session connected");
        Ok(handle)
    }

    /// Tears down a session: waits for in-flight dispatch, announces the
    /// user offline in each room, and leaves every room.
    pub async fn disconnect(&self, session_id: SessionId) {
        self.tickets.unsubscribe_queue(session_id).await;
        let Some(removed) = self.sessions.remove(session_id).await else {
            return;
        };
        let handle = removed.handle;

        for room_id in removed.room_ids {
            let presence = ServerEvent::PresenceChanged {
                user_id: handle.user_id().clone(),
                session_id,
                presence: Presence::Offline,
                room_id,
            };
            if let Err(e) = self.rooms.broadcast(room_id, &presence, Some(session_id)).await {
                tracing::debug!(%room_id, %session_id, error = %e, "offline presence not broadcast");
            }

            if let Some(ticket_id) = self.tickets.ticket_for_room(room_id).await
                && let Ok(ticket) = self.tickets.get(ticket_id).await
                && &ticket.requester_user_id == handle.user_id()
                && !ticket.status.is_terminal()
            {
                let notice = format!("{} disconnected", handle.display_name());
                if let Err(e) = self
                    .rooms
                    .post(room_id, Sender::System, notice, MessageKind::System)
                    .await
                {
                    tracing::debug!(%room_id, error = %e, "disconnect notice not posted");
                }
            }

            if let Err(e) = self.rooms.depart(room_id, &handle).await {
                tracing::debug!(%room_id, %session_id, error = %e, "leave on disconnect failed");
            }
        }
        tracing::info!(%session_id, user_id = %handle.user_id(), "session disconnected");
    }

    /// Dispatches one inbound event from a connected session.
    ///
    /// Replies addressed to the caller are queued on its outbox; the caller
    /// delivers the returned error as an `error` event.
    ///
    /// # Errors
    ///
    /// Any [`ChatError`]; validation errors are raised before any state is
    /// touched.
    pub async fn dispatch(&self, session_id: SessionId, event: ClientEvent) -> Result<(), ChatError> {
        let handle = self.sessions.require(session_id).await?;
        let _gate = handle.enter().await?;

        let (_, back_online) = self.sessions.touch(session_id).await?;
        if back_online {
            self.announce_presence(&handle, Presence::Online).await;
        }

        tracing::trace!(%session_id, event = event.event_type_str(), "dispatch");
        match event {
            ClientEvent::Connect { .. } => Err(ChatError::InvalidPayload(
                "session is already connected".to_string(),
            )),
            ClientEvent::JoinRoom { room_id } => {
                let room = self.rooms.join(room_id, session_id).await?;
                handle.deliver(ServerEvent::RoomOpened { room });
                Ok(())
            }
            ClientEvent::LeaveRoom { room_id } => self.rooms.depart(room_id, &handle).await,
            ClientEvent::CreateRoom { kind, members } => self.create_room(&handle, kind, members).await,
            ClientEvent::SendMessage { room_id, body, kind } => {
                self.send_message(&handle, room_id, body, kind.unwrap_or(MessageKind::Text))
                    .await
            }
            ClientEvent::RequestSupport { body, priority } => {
                self.validate_length(&body)?;
                self.tickets.create(&handle, body, priority).await?;
                Ok(())
            }
            ClientEvent::AssignTicket {
                ticket_id,
                agent_id,
            } => self.assign(&handle, ticket_id, agent_id).await,
            ClientEvent::StartWork { ticket_id } => {
                self.transition(&handle, ticket_id, TicketCommand::StartWork).await
            }
            ClientEvent::ResolveTicket { ticket_id, summary } => {
                self.validate_length(&summary)?;
                self.transition(&handle, ticket_id, TicketCommand::Resolve { summary })
                    .await
            }
            ClientEvent::CloseTicket { ticket_id } => {
                self.transition(&handle, ticket_id, TicketCommand::Close).await
            }
            ClientEvent::ReopenTicket { ticket_id } => {
                self.transition(&handle, ticket_id, TicketCommand::Reopen).await
            }
            ClientEvent::SetPriority {
                ticket_id,
                priority,
            } => {
                self.tickets
                    .set_priority(ticket_id, priority, caller(&handle))
                    .await?;
                Ok(())
            }
            ClientEvent::Replay {
                room_id,
                since,
                limit,
            } => self.replay(&handle, room_id, since, limit).await,
            ClientEvent::Typing { room_id, active } => {
                if !self.rooms.is_member(room_id, session_id).await {
                    return Err(ChatError::PermissionDenied(format!(
                        "not a member of room {room_id}"
                    )));
                }
                let event = ServerEvent::Typing {
                    room_id,
                    user_id: handle.user_id().clone(),
                    active,
                };
                self.rooms.broadcast(room_id, &event, Some(session_id)).await?;
                Ok(())
            }
            ClientEvent::SetPresence { presence } => {
                let (_, changed) = self.sessions.set_presence(session_id, presence).await?;
                if changed {
                    self.announce_presence(&handle, presence).await;
                }
                Ok(())
            }
            ClientEvent::Ping => {
                handle.deliver(ServerEvent::Pong);
                Ok(())
            }
            ClientEvent::SubscribeQueue => {
                let tickets = self.tickets.subscribe_queue(&handle).await?;
                handle.deliver(ServerEvent::QueueSnapshot { tickets });
                Ok(())
            }
            ClientEvent::UnsubscribeQueue => {
                self.tickets.unsubscribe_queue(session_id).await;
                Ok(())
            }
        }
    }

    /// Marks sessions idle since before `cutoff` as away. Returns how many
    /// changed.
    pub async fn mark_idle_away(&self, cutoff: DateTime<Utc>) -> usize {
        let mut marked = 0;
        for handle in self.sessions.idle_since(cutoff).await {
            let Ok(guard) = handle.enter().await else {
                continue;
            };
            if let Ok((_, true)) = self.sessions.set_presence(handle.session_id(), Presence::Away).await {
                self.announce_presence(&handle, Presence::Away).await;
                marked += 1;
            }
            drop(guard);
        }
        marked
    }

    async fn create_room(
        &self,
        handle: &SessionHandle,
        kind: RoomKind,
        members: Vec<UserId>,
    ) -> Result<(), ChatError> {
        let others: BTreeSet<UserId> = members
            .into_iter()
            .filter(|user| user != handle.user_id())
            .collect();
        match kind {
            RoomKind::Support => {
                return Err(ChatError::InvalidPayload(
                    "support rooms are opened with request_support".to_string(),
                ));
            }
            RoomKind::Direct if others.len() != 1 => {
                return Err(ChatError::InvalidPayload(
                    "a direct room needs exactly one other member".to_string(),
                ));
            }
            RoomKind::Direct | RoomKind::Group => {}
        }

        let mut initial = vec![handle.session_id()];
        for user in &others {
            initial.extend(
                self.sessions
                    .by_user_id(user)
                    .await
                    .iter()
                    .map(|s| s.session_id()),
            );
        }
        self.rooms.create_room(kind, others, &initial, None).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        handle: &SessionHandle,
        room_id: RoomId,
        body: String,
        kind: MessageKind,
    ) -> Result<(), ChatError> {
        if kind == MessageKind::System {
            return Err(ChatError::InvalidPayload(
                "clients cannot send system messages".to_string(),
            ));
        }
        if body.trim().is_empty() {
            return Err(ChatError::InvalidPayload("message body must not be empty".to_string()));
        }
        self.validate_length(&body)?;

        let sender = Sender::Session {
            session_id: handle.session_id(),
            user_id: handle.user_id().clone(),
        };
        self.rooms.post(room_id, sender, body, kind).await?;

        let Some(ticket_id) = self.tickets.ticket_for_room(room_id).await else {
            return Ok(());
        };
        self.tickets.touch_room(room_id).await;
        if let Ok(ticket) = self.tickets.get(ticket_id).await
            && ticket.status == TicketStatus::Assigned
            && ticket.assigned_agent_id.as_ref() == Some(handle.user_id())
        {
            // first message of the assigned agent starts the work
            if let Err(e) = self
                .tickets
                .transition(ticket_id, TicketCommand::StartWork, caller(handle))
                .await
            {
                tracing::debug!(%ticket_id, error = %e, "auto start_work skipped");
            }
        }
        Ok(())
    }

    async fn assign(
        &self,
        handle: &SessionHandle,
        ticket_id: TicketId,
        agent_id: UserId,
    ) -> Result<(), ChatError> {
        let assignee_role = match self.authorizer.role_of(&agent_id).await {
            Some(role) => Some(role),
            None => self
                .sessions
                .by_user_id(&agent_id)
                .await
                .first()
                .map(|s| s.role()),
        };
        if !assignee_role.is_some_and(Role::handles_tickets) {
            return Err(ChatError::PermissionDenied(format!(
                "user {agent_id} cannot be assigned tickets"
            )));
        }

        self.tickets
            .transition(ticket_id, TicketCommand::Assign { agent_id }, caller(handle))
            .await?;
        Ok(())
    }

    async fn transition(
        &self,
        handle: &SessionHandle,
        ticket_id: TicketId,
        command: TicketCommand,
    ) -> Result<(), ChatError> {
        self.tickets
            .transition(ticket_id, command, caller(handle))
            .await?;
        Ok(())
    }

    async fn replay(
        &self,
        handle: &SessionHandle,
        room_id: RoomId,
        since: MessageId,
        limit: Option<usize>,
    ) -> Result<(), ChatError> {
        let entitled = handle.role().is_admin()
            || self.rooms.is_member(room_id, handle.session_id()).await
            || match self.tickets.ticket_for_room(room_id).await {
                Some(ticket_id) => self
                    .tickets
                    .get(ticket_id)
                    .await
                    .is_ok_and(|t| t.is_party(handle.user_id())),
                None => false,
            };
        if !entitled {
            return Err(ChatError::PermissionDenied(format!(
                "no access to history of room {room_id}"
            )));
        }

        let (messages, next_message_id) = self.history(room_id, since, limit).await?;
        handle.deliver(ServerEvent::History {
            room_id,
            messages,
            next_message_id,
        });
        Ok(())
    }

    /// Reads one page of a room's history with ids `>= since`.
    ///
    /// Rooms known to this process are read from the live log; older rooms
    /// fall back to the store. Returns the page and the id to pass as
    /// `since` for the next page.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RoomNotFound`] if neither the log nor the store
    /// knows the room, and [`ChatError::Persistence`] on store failures.
    pub async fn history(
        &self,
        room_id: RoomId,
        since: MessageId,
        limit: Option<usize>,
    ) -> Result<(Vec<Message>, MessageId), ChatError> {
        let limit = limit.unwrap_or(self.replay_max_limit).min(self.replay_max_limit);
        match self.log.replay(room_id, since, Some(limit)).await {
            Ok(mut replay) => {
                let messages: Vec<_> = replay.by_ref().collect();
                Ok((messages, replay.position()))
            }
            Err(ChatError::RoomNotFound(_)) => {
                let messages = self.store.load_messages(room_id, since, limit).await?;
                if messages.is_empty() && since == 0 {
                    return Err(ChatError::RoomNotFound(room_id));
                }
                let next = messages
                    .last()
                    .map_or(since, |m| m.message_id.saturating_add(1));
                Ok((messages, next))
            }
            Err(e) => Err(e),
        }
    }

    fn validate_length(&self, body: &str) -> Result<(), ChatError> {
        let len = body.chars().count();
        if len > self.max_message_len {
            return Err(ChatError::InvalidPayload(format!(
                "body is {len} characters, limit is {}",
                self.max_message_len
            )));
        }
        Ok(())
    }

    async fn announce_presence(&self, handle: &SessionHandle, presence: Presence) {
        let session_id = handle.session_id();
        for room_id in handle.active_room_ids() {
            let event = ServerEvent::PresenceChanged {
                user_id: handle.user_id().clone(),
                session_id,
                presence,
                room_id,
            };
            if let Err(e) = self.rooms.broadcast(room_id, &event, Some(session_id)).await {
                tracing::debug!(%room_id, %session_id, presence = ?presence, error = %e, "presence not broadcast");
            }
        }
    }
}

fn caller(handle: &SessionHandle) -> Caller<'_> {
    Caller::User {
        user_id: handle.user_id(),
        role: handle.role(),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthorizer;
    use crate::persistence::{FailingStore, MemoryStore};

    fn gateway(config: &GatewayConfig) -> ChatGateway {
        let auth = StaticAuthorizer::open()
            .with_user("alice", "a", Role::Customer)
            .with_user("bob", "b", Role::Agent)
            .with_user("carol", "c", Role::Customer)
            .with_user("root", "r", Role::Admin);
        ChatGateway::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(auth),
            EventBus::new(64),
        )
    }

    async fn connect(
        gw: &ChatGateway,
        user: &str,
        token: &str,
    ) -> (Arc<SessionHandle>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let Ok(handle) = gw.connect(UserId::from(user), None, token, tx).await else {
            panic!("connect failed");
        };
        (handle, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn latest_ticket(events: &[ServerEvent]) -> Option<(TicketId, RoomId)> {
        events.iter().rev().find_map(|e| match e {
            ServerEvent::TicketCreated { ticket } => Some((ticket.ticket_id, ticket.room_id)),
            _ => None,
        })
    }

    #[tokio::test]
    async fn bad_token_is_rejected() {
        let gw = gateway(&GatewayConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = gw.connect(UserId::from("alice"), None, "nope", tx).await;
        assert!(matches!(result, Err(ChatError::Unauthenticated)));
    }

    #[tokio::test]
    async fn dispatch_for_unknown_session_is_unauthenticated() {
        let gw = gateway(&GatewayConfig::default());
        let result = gw.dispatch(SessionId::new(), ClientEvent::Ping).await;
        assert_eq!(result, Err(ChatError::Unauthenticated));
    }

    #[tokio::test]
    async fn validation_rejects_before_mutation() {
        let config = GatewayConfig {
            max_message_len: 5,
            ..GatewayConfig::default()
        };
        let gw = gateway(&config);
        let (alice, mut rx) = connect(&gw, "alice", "a").await;
        let sid = alice.session_id();
        let create = ClientEvent::CreateRoom {
            kind: RoomKind::Group,
            members: Vec::new(),
        };
        assert!(gw.dispatch(sid, create).await.is_ok());
        let Some(room_id) = drain(&mut rx).iter().find_map(|e| match e {
            ServerEvent::RoomOpened { room } => Some(room.room_id),
            _ => None,
        }) else {
            panic!("no room opened");
        };

        for (body, kind) in [
            ("   ", None),
            ("far too long", None),
            ("hi", Some(MessageKind::System)),
        ] {
            let event = ClientEvent::SendMessage {
                room_id,
                body: body.to_string(),
                kind,
            };
            assert!(matches!(gw.dispatch(sid, event).await, Err(ChatError::InvalidPayload(_))));
        }
        assert_eq!(gw.log().len(room_id).await.ok(), Some(0));
    }

    #[tokio::test]
    async fn direct_room_needs_exactly_one_peer() {
        let gw = gateway(&GatewayConfig::default());
        let (alice, _a) = connect(&gw, "alice", "a").await;
        let (_carol, mut carol_rx) = connect(&gw, "carol", "c").await;
        let none = ClientEvent::CreateRoom {
            kind: RoomKind::Direct,
            members: vec![UserId::from("alice")],
        };
        assert!(matches!(
            gw.dispatch(alice.session_id(), none).await,
            Err(ChatError::InvalidPayload(_))
        ));

        drain(&mut carol_rx);
        let ok = ClientEvent::CreateRoom {
            kind: RoomKind::Direct,
            members: vec![UserId::from("carol")],
        };
        assert!(gw.dispatch(alice.session_id(), ok).await.is_ok());
        assert!(
            drain(&mut carol_rx)
                .iter()
                .any(|e| matches!(e, ServerEvent::RoomOpened { .. }))
        );
    }

    #[tokio::test]
    async fn support_scenario_end_to_end() {
        let config = GatewayConfig {
            ticket_reopen_window_secs: 0,
            ..GatewayConfig::default()
        };
        let gw = gateway(&config);
        let (alice, mut alice_rx) = connect(&gw, "alice", "a").await;
        let (bob, mut bob_rx) = connect(&gw, "bob", "b").await;

        let request = ClientEvent::RequestSupport {
            body: "my order is late".to_string(),
            priority: crate::domain::Priority::High,
        };
        assert!(gw.dispatch(alice.session_id(), request).await.is_ok());
        let Some((ticket_id, room_id)) = latest_ticket(&drain(&mut alice_rx)) else {
            panic!("no ticket created");
        };

        let assign = ClientEvent::AssignTicket {
            ticket_id,
            agent_id: UserId::from("bob"),
        };
        assert!(gw.dispatch(bob.session_id(), assign).await.is_ok());
        assert_eq!(bob.active_room_ids(), vec![room_id]);
        // not subscribed to the queue, still told about the assignment
        assert!(drain(&mut bob_rx).iter().any(|e| matches!(
            e,
            ServerEvent::TicketStatusChanged {
                new_status: TicketStatus::Assigned,
                ..
            }
        )));

        let reply = ClientEvent::SendMessage {
            room_id,
            body: "looking into it".to_string(),
            kind: None,
        };
        assert!(gw.dispatch(bob.session_id(), reply).await.is_ok());
        let Ok(ticket) = gw.tickets().get(ticket_id).await else {
            panic!("ticket missing");
        };
        assert_eq!(ticket.status, TicketStatus::InProgress);

        let resolve = ClientEvent::ResolveTicket {
            ticket_id,
            summary: "refund issued".to_string(),
        };
        assert!(gw.dispatch(bob.session_id(), resolve).await.is_ok());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let reopen = ClientEvent::ReopenTicket { ticket_id };
        assert!(matches!(
            gw.dispatch(alice.session_id(), reopen).await,
            Err(ChatError::InvalidTicketTransition { .. })
        ));

        let statuses: Vec<_> = drain(&mut alice_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::TicketStatusChanged { new_status, .. } => Some(new_status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![TicketStatus::Assigned, TicketStatus::InProgress, TicketStatus::Resolved]
        );
    }

    #[tokio::test]
    async fn reconnect_rejoins_ticket_room_and_replays() {
        let gw = gateway(&GatewayConfig::default());
        let (alice, mut alice_rx) = connect(&gw, "alice", "a").await;
        let request = ClientEvent::RequestSupport {
            body: "first".to_string(),
            priority: crate::domain::Priority::Normal,
        };
        assert!(gw.dispatch(alice.session_id(), request).await.is_ok());
        let Some((_, room_id)) = latest_ticket(&drain(&mut alice_rx)) else {
            panic!("no ticket created");
        };

        gw.disconnect(alice.session_id()).await;
        assert!(gw.sessions().is_empty().await);
        assert!(gw.rooms().summary(room_id).await.is_ok());

        let (again, mut again_rx) = connect(&gw, "alice", "a").await;
        assert_eq!(again.active_room_ids(), vec![room_id]);
        let events = drain(&mut again_rx);
        assert!(matches!(
            events.first(),
            Some(ServerEvent::Connected { rejoined_room_ids, .. }) if rejoined_room_ids == &vec![room_id]
        ));

        let replay = ClientEvent::Replay {
            room_id,
            since: 1,
            limit: None,
        };
        assert!(gw.dispatch(again.session_id(), replay).await.is_ok());
        let Some(ServerEvent::History {
            messages,
            next_message_id,
            ..
        }) = drain(&mut again_rx).pop()
        else {
            panic!("no history");
        };
        // message 0 is the opening request, 1 is the disconnect notice
        assert_eq!(messages.len(), 1);
        assert_eq!(messages.first().map(|m| m.kind), Some(MessageKind::System));
        assert_eq!(next_message_id, 2);
    }

    #[tokio::test]
    async fn disconnect_announces_offline_and_keeps_membership_consistent() {
        let gw = gateway(&GatewayConfig::default());
        let (alice, mut alice_rx) = connect(&gw, "alice", "a").await;
        let (carol, mut carol_rx) = connect(&gw, "carol", "c").await;
        let create = ClientEvent::CreateRoom {
            kind: RoomKind::Group,
            members: vec![UserId::from("carol")],
        };
        assert!(gw.dispatch(alice.session_id(), create).await.is_ok());
        let Some(room_id) = drain(&mut alice_rx).iter().find_map(|e| match e {
            ServerEvent::RoomOpened { room } => Some(room.room_id),
            _ => None,
        }) else {
            panic!("no room opened");
        };
        drain(&mut carol_rx);

        gw.disconnect(carol.session_id()).await;
        let events = drain(&mut alice_rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::PresenceChanged { presence: Presence::Offline, .. }
        )));
        assert!(events.iter().any(|e| matches!(e, ServerEvent::MemberLeft { .. })));
        let Ok(room) = gw.rooms().summary(room_id).await else {
            panic!("room missing");
        };
        assert_eq!(room.member_session_ids, vec![alice.session_id()]);
        assert_eq!(
            gw.dispatch(carol.session_id(), ClientEvent::Ping).await,
            Err(ChatError::Unauthenticated)
        );
    }

    #[tokio::test]
    async fn idle_sessions_go_away_and_come_back() {
        let gw = gateway(&GatewayConfig::default());
        let (alice, _a) = connect(&gw, "alice", "a").await;
        let future = Utc::now() + chrono::Duration::minutes(10);
        assert_eq!(gw.mark_idle_away(future).await, 1);
        assert_eq!(alice.presence(), Presence::Away);
        assert!(gw.dispatch(alice.session_id(), ClientEvent::Ping).await.is_ok());
        assert_eq!(alice.presence(), Presence::Online);
    }

    #[tokio::test]
    async fn unsaved_support_request_reports_error_and_leaves_no_room() {
        let store = Arc::new(FailingStore::default());
        let gw = ChatGateway::new(
            &GatewayConfig::default(),
            Arc::clone(&store) as Arc<dyn ChatStore>,
            Arc::new(StaticAuthorizer::open()),
            EventBus::new(8),
        );
        let (alice, mut alice_rx) = connect(&gw, "alice", "any").await;
        store.set_fail_tickets(true);

        let request = ClientEvent::RequestSupport {
            body: "help".to_string(),
            priority: crate::domain::Priority::Normal,
        };
        let result = gw.dispatch(alice.session_id(), request).await;
        assert!(matches!(result, Err(ChatError::Persistence(_))));
        assert!(gw.rooms().is_empty().await);
        assert!(alice.active_room_ids().is_empty());
        assert!(gw.tickets().list(None).await.is_empty());
        assert!(latest_ticket(&drain(&mut alice_rx)).is_none());
    }
}
