//! Domain layer: chat and support-ticket core.
//!
//! Leaves first: identifiers and value types, then the session registry,
//! the per-room message log, the room manager, and the ticket engine. The
//! gateway in [`crate::service`] drives these components; they never call
//! back into it.

pub mod agent_queue;
pub mod chat_event;
pub mod event_bus;
pub mod ids;
pub mod message;
pub mod message_log;
pub mod room;
pub mod room_manager;
pub mod session;
pub mod session_registry;
pub mod ticket;
pub mod ticket_engine;

pub use agent_queue::AgentQueue;
pub use chat_event::ServerEvent;
pub use event_bus::EventBus;
pub use ids::{RoomId, SessionId, TicketId, UserId};
pub use message::{Message, MessageId, MessageKind, Sender};
pub use message_log::{MessageLog, Replay};
pub use room::{Room, RoomKind, RoomSummary};
pub use room_manager::RoomManager;
pub use session::{Presence, Role, Session, SessionHandle};
pub use session_registry::{RemovedSession, SessionRegistry};
pub use ticket::{
    Actor, Priority, Ticket, TicketAction, TicketCommand, TicketStatus, TransitionRecord,
};
pub use ticket_engine::{Caller, SupportRequest, TicketCounts, TicketEngine};
