//! Service layer: orchestration over the chat core.
//!
//! [`ChatGateway`] resolves sessions, validates inbound events and drives
//! the domain components; [`Sweeper`] runs periodic housekeeping.

pub mod gateway;
pub mod sweeper;

pub use gateway::ChatGateway;
pub use sweeper::{SweepReport, Sweeper};
