//! Agent queue subscriptions.
//!
//! Agents subscribe to receive every ticket event regardless of which
//! rooms they are in. [`AgentQueue`] tracks the subscribed sessions and
//! fans ticket events out to them.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{ServerEvent, SessionId, SessionRegistry};

/// Set of sessions subscribed to the ticket queue.
#[derive(Debug)]
pub struct AgentQueue {
    subscribers: RwLock<BTreeSet<SessionId>>,
    sessions: Arc<SessionRegistry>,
}

impl AgentQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            subscribers: RwLock::new(BTreeSet::new()),
            sessions,
        }
    }

    /// Adds a session. Returns `false` if it was already subscribed.
    pub async fn subscribe(&self, session_id: SessionId) -> bool {
        self.subscribers.write().await.insert(session_id)
    }

    /// Removes a session. Returns `false` if it was not subscribed.
    pub async fn unsubscribe(&self, session_id: SessionId) -> bool {
        self.subscribers.write().await.remove(&session_id)
    }

    /// Returns `true` if the session is subscribed.
    pub async fn is_subscribed(&self, session_id: SessionId) -> bool {
        self.subscribers.read().await.contains(&session_id)
    }

    /// Delivers an event to every live subscriber, skipping `except`.
    /// Sessions that have disconnected are pruned.
    pub async fn notify(&self, event: &ServerEvent, except: &BTreeSet<SessionId>) -> usize {
        let subscribers: Vec<SessionId> = self.subscribers.read().await.iter().copied().collect();
        let mut delivered = 0;
        let mut gone = Vec::new();
        for session_id in subscribers {
            if except.contains(&session_id) {
                continue;
            }
            match self.sessions.by_session_id(session_id).await {
                Some(handle) => {
                    if handle.deliver(event.clone()) {
                        delivered += 1;
                    }
                }
                None => gone.push(session_id),
            }
        }
        if !gone.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for session_id in gone {
                subscribers.remove(&session_id);
            }
        }
        delivered
    }

    /// Returns the number of subscribers.
    pub async fn count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{Role, UserId};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn subscribe_is_tracked_once() {
        let queue = AgentQueue::new(Arc::new(SessionRegistry::new(false)));
        let id = SessionId::new();
        assert!(queue.subscribe(id).await);
        assert!(!queue.subscribe(id).await);
        assert!(queue.is_subscribed(id).await);
        assert!(queue.unsubscribe(id).await);
        assert!(!queue.unsubscribe(id).await);
        assert_eq!(queue.count().await, 0);
    }

    #[tokio::test]
    async fn notify_skips_excluded_and_prunes_gone() {
        let sessions = Arc::new(SessionRegistry::new(false));
        let queue = AgentQueue::new(Arc::clone(&sessions));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let Ok(agent) = sessions
            .register(UserId::from("bob"), "Bob".to_string(), Role::Agent, tx)
            .await
        else {
            panic!("register failed");
        };
        let stale = SessionId::new();
        queue.subscribe(agent.session_id()).await;
        queue.subscribe(stale).await;

        assert_eq!(queue.notify(&ServerEvent::Pong, &BTreeSet::new()).await, 1);
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Pong)));
        assert!(!queue.is_subscribed(stale).await);

        let except = BTreeSet::from([agent.session_id()]);
        assert_eq!(queue.notify(&ServerEvent::Pong, &except).await, 0);
    }
}
