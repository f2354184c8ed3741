//! Gateway error types with WebSocket code and HTTP status mapping.
//!
//! [`ChatError`] is the single error type of the chat core. Every variant is
//! scoped to the one operation that produced it: it is reported to the
//! originating session (as an `error` event) or HTTP caller, and never
//! aborts work belonging to other sessions.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{RoomId, TicketAction, TicketId, TicketStatus};

/// Structured JSON error response body.
///
/// All REST error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": "room_not_found",
///     "message": "room not found: 2b1c...",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with a stable code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable snake_case error code (see [`ChatError::code`]).
    pub code: &'static str,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Errors produced by the chat core.
///
/// # Categories
///
/// | Category        | Variants                                              | HTTP |
/// |-----------------|-------------------------------------------------------|------|
/// | Session         | `Unauthenticated`, `DuplicateConnection`              | 401 / 409 |
/// | Validation      | `InvalidPayload`                                      | 400 |
/// | Lookup          | `RoomNotFound`, `TicketNotFound`                      | 404 |
/// | Membership      | `AlreadyMember`, `PermissionDenied`                   | 409 / 403 |
/// | Ticket workflow | `TicketNot*`, `InvalidTicketTransition`               | 409 |
/// | Storage         | `Persistence`                                         | 500 |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// The caller has no live session, or the auth token was rejected.
    #[error("unauthenticated")]
    Unauthenticated,

    /// The user already has a live session and multi-session is disabled.
    #[error("user {0} already has a live session")]
    DuplicateConnection(String),

    /// Room with the given ID does not exist (or was released).
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// The session is already a member of the room.
    #[error("session is already a member of room {0}")]
    AlreadyMember(RoomId),

    /// Ticket with the given ID does not exist.
    #[error("ticket not found: {0}")]
    TicketNotFound(TicketId),

    /// `assign` requires the ticket to be `open`.
    #[error("ticket {ticket_id} is not open (status: {status})")]
    TicketNotOpen {
        /// Offending ticket.
        ticket_id: TicketId,
        /// Status at the time of the attempt.
        status: TicketStatus,
    },

    /// `start_work` requires the ticket to be `assigned`.
    #[error("ticket {ticket_id} is not assigned (status: {status})")]
    TicketNotAssigned {
        /// Offending ticket.
        ticket_id: TicketId,
        /// Status at the time of the attempt.
        status: TicketStatus,
    },

    /// `resolve` requires the ticket to be `in_progress`.
    #[error("ticket {ticket_id} is not in progress (status: {status})")]
    TicketNotInProgress {
        /// Offending ticket.
        ticket_id: TicketId,
        /// Status at the time of the attempt.
        status: TicketStatus,
    },

    /// The requested action is not an edge of the ticket lifecycle graph.
    #[error("cannot {action} ticket {ticket_id} from status {status}")]
    InvalidTicketTransition {
        /// Offending ticket.
        ticket_id: TicketId,
        /// Status at the time of the attempt.
        status: TicketStatus,
        /// Attempted action.
        action: TicketAction,
    },

    /// Malformed or out-of-range inbound payload. No state was touched.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The actor lacks the capability required for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The storage collaborator failed.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ChatError {
    /// Returns the stable error code carried by the outbound `error` event.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::DuplicateConnection(_) => "duplicate_connection",
            Self::RoomNotFound(_) => "room_not_found",
            Self::AlreadyMember(_) => "already_member",
            Self::TicketNotFound(_) => "ticket_not_found",
            Self::TicketNotOpen { .. } => "ticket_not_open",
            Self::TicketNotAssigned { .. } => "ticket_not_assigned",
            Self::TicketNotInProgress { .. } => "ticket_not_in_progress",
            Self::InvalidTicketTransition { .. } => "invalid_ticket_transition",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Persistence(_) => "persistence_error",
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::RoomNotFound(_) | Self::TicketNotFound(_) => StatusCode::NOT_FOUND,
            Self::DuplicateConnection(_)
            | Self::AlreadyMember(_)
            | Self::TicketNotOpen { .. }
            | Self::TicketNotAssigned { .. }
            | Self::TicketNotInProgress { .. }
            | Self::InvalidTicketTransition { .. } => StatusCode::CONFLICT,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
