//! ComfyUI tool server library.
//!
//! Exposes the tool-dispatch protocol, the dispatcher, configuration,
//! and the WebSocket/HTTP, stdio and MCP transports so integration tests
//! and the binary entrypoint can both access them.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod mcp;
pub mod protocol;
pub mod router;
pub mod routes;
pub mod state;
pub mod stdio;
pub mod ws;
