//! # chatdesk-gateway
//!
//! Real-time chat rooms and customer-support tickets over WebSocket.
//!
//! Clients connect over `/ws`, authenticate, and then exchange typed JSON
//! events: joining and leaving rooms, posting messages, replaying history
//! after a reconnect, and driving support tickets through their lifecycle
//! (`open → assigned → in_progress → resolved → closed`, with reopen).
//! A small REST surface exposes ticket listings, stats and history export
//! for operator dashboards.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── WS Connection (ws/)        REST Handlers (api/)
//!     │
//!     ├── ChatGateway + Sweeper (service/)
//!     │
//!     ├── SessionRegistry ── RoomManager ── MessageLog (domain/)
//!     ├── TicketEngine ── AgentQueue ── EventBus (domain/)
//!     │
//!     ├── Authorizer (auth)
//!     └── ChatStore: memory | PostgreSQL (persistence/)
//! ```
//!
//! Every room has its own lock; a message is appended to the room's log and
//! fanned out to members while that lock is held, so all members observe
//! the same order as the log.

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod ws;
