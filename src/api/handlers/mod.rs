//! REST endpoint handlers organized by resource.

pub mod rooms;
pub mod system;
pub mod tickets;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(tickets::routes())
        .merge(rooms::routes())
}
