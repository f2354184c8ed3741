//! Data Transfer Objects for REST request/response serialization.

pub mod common_dto;
pub mod room_dto;
pub mod ticket_dto;

pub use common_dto::*;
pub use room_dto::*;
pub use ticket_dto::*;
