//! Process-wide ticket feed.
//!
//! Room members and queue subscribers get ticket events through their
//! outboxes. The feed carries the same events to consumers that hold no
//! session at all (the audit logger in `main`, dashboards).

use tokio::sync::broadcast;

use super::ServerEvent;

/// Fan-out of ticket events to session-less consumers.
///
/// Only events that concern a ticket are accepted. A consumer that falls
/// more than `capacity` events behind loses the oldest ones and sees
/// `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    feed: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    /// Creates a feed buffering up to `capacity` events per consumer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self { feed }
    }

    /// Pushes a ticket event to every consumer and returns how many got it.
    ///
    /// Events without a ticket are dropped; so is everything while nobody
    /// listens.
    pub fn publish(&self, event: ServerEvent) -> usize {
        let Some(ticket_id) = event.ticket_id() else {
            tracing::debug!(event = event.event_type_str(), "non-ticket event kept off the feed");
            return 0;
        };
        let reached = self.feed.send(event).unwrap_or(0);
        tracing::trace!(%ticket_id, reached, "ticket event on feed");
        reached
    }

    /// Attaches a new consumer. It sees events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.feed.subscribe()
    }

    /// Number of attached consumers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.feed.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{Priority, RoomId, Ticket, TicketId, UserId};

    fn created(ticket_id: TicketId) -> ServerEvent {
        ServerEvent::TicketCreated {
            ticket: Ticket::new(ticket_id, RoomId::new(), UserId::from("alice"), Priority::Normal),
        }
    }

    #[test]
    fn nobody_listening_reaches_nobody() {
        let bus = EventBus::new(8);
        assert_eq!(bus.publish(created(TicketId::new())), 0);
    }

    #[test]
    fn room_chatter_stays_off_the_feed() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(ServerEvent::Pong), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn every_consumer_sees_ticket_events() {
        let bus = EventBus::new(8);
        let mut dashboard = bus.subscribe();
        let mut audit = bus.subscribe();

        let id = TicketId::new();
        assert_eq!(bus.publish(created(id)), 2);

        for rx in [&mut dashboard, &mut audit] {
            let Ok(event) = rx.recv().await else {
                panic!("feed closed");
            };
            assert_eq!(event.ticket_id(), Some(id));
        }
    }

    #[tokio::test]
    async fn slow_consumer_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(created(TicketId::new()));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
    }

    #[test]
    fn dropped_consumers_are_not_counted() {
        let bus = EventBus::new(8);
        let rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);
        drop(rx);
        assert_eq!(bus.receiver_count(), 0);
    }
}
