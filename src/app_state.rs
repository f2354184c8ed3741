//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::EventBus;
use crate::service::ChatGateway;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Chat gateway owning sessions, rooms, logs and tickets.
    pub gateway: Arc<ChatGateway>,
    /// Ticket event bus for dashboard consumers.
    pub event_bus: EventBus,
}

impl AppState {
    /// Builds the state around a gateway, sharing its event bus.
    #[must_use]
    pub fn new(gateway: Arc<ChatGateway>) -> Self {
        let event_bus = gateway.event_bus().clone();
        Self { gateway, event_bus }
    }
}
