//! Ticket read endpoints: list, stats, details, history export.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{
    PaginationParams, TicketFilter, TicketHistoryResponse, TicketListResponse, TicketStatsResponse,
};
use crate::app_state::AppState;
use crate::domain::{Ticket, TicketId};
use crate::error::{ChatError, ErrorResponse};

/// `GET /tickets`: List tickets with pagination and optional status filter.
///
/// # Errors
///
/// Never fails today; the signature matches the other handlers.
#[utoipa::path(
    get,
    path = "/api/v1/tickets",
    tag = "Tickets",
    summary = "List tickets",
    description = "Returns a paginated list of tickets, oldest first, optionally filtered by status.",
    params(PaginationParams, TicketFilter),
    responses(
        (status = 200, description = "Paginated ticket list", body = TicketListResponse),
    )
)]
pub async fn list_tickets(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<TicketFilter>,
) -> Result<impl IntoResponse, ChatError> {
    let tickets = state.gateway.tickets().list(filter.status).await;
    let (data, pagination) = params.paginate(tickets);
    Ok(Json(TicketListResponse { data, pagination }))
}

/// `GET /tickets/stats`: Ticket counts per status.
#[utoipa::path(
    get,
    path = "/api/v1/tickets/stats",
    tag = "Tickets",
    summary = "Ticket statistics",
    description = "Returns the total number of tickets and the count in each status.",
    responses(
        (status = 200, description = "Ticket counts", body = TicketStatsResponse),
    )
)]
pub async fn ticket_stats(State(state): State<AppState>) -> impl IntoResponse {
    let counts = state.gateway.tickets().counts().await;
    Json(TicketStatsResponse::from(counts))
}

/// `GET /tickets/{id}`: Ticket details with transition history.
///
/// # Errors
///
/// Returns [`ChatError::TicketNotFound`] if the ticket does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/tickets/{id}",
    tag = "Tickets",
    summary = "Get ticket",
    description = "Returns a single ticket including its full transition history.",
    params(
        ("id" = uuid::Uuid, Path, description = "Ticket UUID"),
    ),
    responses(
        (status = 200, description = "Ticket details", body = Ticket),
        (status = 404, description = "Ticket not found", body = ErrorResponse),
    )
)]
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    let ticket = state.gateway.tickets().get(TicketId::from_uuid(id)).await?;
    Ok(Json(ticket))
}

/// `GET /tickets/{id}/history`: Ticket plus every message of its room.
///
/// Works after the ticket is closed; the room's log stays readable.
///
/// # Errors
///
/// Returns [`ChatError::TicketNotFound`] if the ticket does not exist and
/// [`ChatError::Persistence`] if stored history cannot be read.
#[utoipa::path(
    get,
    path = "/api/v1/tickets/{id}/history",
    tag = "Tickets",
    summary = "Export ticket history",
    description = "Returns the ticket and the complete message log of its support room, in order.",
    params(
        ("id" = uuid::Uuid, Path, description = "Ticket UUID"),
    ),
    responses(
        (status = 200, description = "Ticket history", body = TicketHistoryResponse),
        (status = 404, description = "Ticket not found", body = ErrorResponse),
    )
)]
pub async fn ticket_history(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    let gateway = &state.gateway;
    let ticket = gateway.tickets().get(TicketId::from_uuid(id)).await?;

    let mut messages = Vec::new();
    let mut since = 0;
    loop {
        let (page, next) = match gateway.history(ticket.room_id, since, None).await {
            Ok(page) => page,
            Err(ChatError::RoomNotFound(_)) => break,
            Err(e) => return Err(e),
        };
        if page.is_empty() {
            break;
        }
        messages.extend(page);
        since = next;
    }

    Ok(Json(TicketHistoryResponse { ticket, messages }))
}

/// Ticket routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tickets", get(list_tickets))
        .route("/tickets/stats", get(ticket_stats))
        .route("/tickets/{id}", get(get_ticket))
        .route("/tickets/{id}/history", get(ticket_history))
}
