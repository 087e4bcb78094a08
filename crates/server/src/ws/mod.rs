//! WebSocket transport for tool calls.
//!
//! Each text frame carries one tool-call envelope; each response goes
//! back as one text frame on the same connection.

mod handler;
pub mod manager;

pub use handler::ws_handler;
pub use manager::WsManager;
