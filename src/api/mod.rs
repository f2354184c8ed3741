//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` sits at the
//! root. With the `swagger-ui` feature the OpenAPI document is served at
//! `/api-docs/openapi.json` and browsable under `/swagger-ui`.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document covering every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "chatdesk-gateway",
        description = "Chat rooms and support tickets over WebSocket, with read-only REST views."
    ),
    paths(
        handlers::system::health_handler,
        handlers::tickets::list_tickets,
        handlers::tickets::ticket_stats,
        handlers::tickets::get_ticket,
        handlers::tickets::ticket_history,
        handlers::rooms::room_messages,
    ),
    tags(
        (name = "System", description = "Service health"),
        (name = "Tickets", description = "Support ticket views and history export"),
        (name = "Rooms", description = "Room message history"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}
