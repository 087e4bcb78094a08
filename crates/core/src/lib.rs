//! Domain layer for the ComfyUI tool server.
//!
//! Holds the in-memory job graph, template storage, and the parameter
//! resolver that overlays caller-supplied values onto template input
//! slots. Nothing in this crate talks to the network.

pub mod error;
pub mod graph;
pub mod params;
pub mod resolver;
pub mod template;
