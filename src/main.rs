//! chatdesk-gateway server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use chatdesk_gateway::api;
use chatdesk_gateway::app_state::AppState;
use chatdesk_gateway::auth::StaticAuthorizer;
use chatdesk_gateway::config::GatewayConfig;
use chatdesk_gateway::domain::EventBus;
use chatdesk_gateway::persistence::{ChatStore, MemoryStore, PostgresStore};
use chatdesk_gateway::service::{ChatGateway, Sweeper};
use chatdesk_gateway::ws::handler::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env().context("invalid LISTEN_ADDR")?;
    tracing::info!(addr = %config.listen_addr, "starting chatdesk-gateway");

    let store: Arc<dyn ChatStore> = if config.persistence_enabled {
        Arc::new(
            PostgresStore::connect(&config)
                .await
                .context("failed to open postgres store")?,
        )
    } else {
        tracing::warn!("persistence disabled, history is kept in memory only");
        Arc::new(MemoryStore::new())
    };

    let authorizer = StaticAuthorizer::parse(&config.auth_users).context("invalid AUTH_USERS")?;
    if authorizer.is_open() {
        tracing::warn!("AUTH_USERS is empty, every connect is accepted as a customer");
    }

    let event_bus = EventBus::new(config.event_bus_capacity);
    let gateway = Arc::new(ChatGateway::new(
        &config,
        store,
        Arc::new(authorizer),
        event_bus.clone(),
    ));

    let _sweeper = Sweeper::new(
        Arc::clone(&gateway),
        config.sweep_interval(),
        config.session_away_after(),
    )
    .spawn();

    // Ticket feed audit trail
    let mut feed = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(event) => tracing::info!(
                    event = event.event_type_str(),
                    ticket_id = ?event.ticket_id(),
                    "ticket event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "ticket feed logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(gateway));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
