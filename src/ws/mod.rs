//! WebSocket layer: connection handling and the JSON wire format.
//!
//! The endpoint at `/ws` carries every chat and ticket interaction. A
//! connection starts with a `connect` frame and then exchanges tagged JSON
//! events with the gateway.

pub mod connection;
pub mod handler;
pub mod messages;
