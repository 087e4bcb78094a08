//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper, the [`backend::ComfyBackend`] seam,
//! history parsing, the model availability cache, and the job runner
//! that submits a workflow and polls it to completion.

pub mod api;
pub mod backend;
pub mod client;
pub mod history;
pub mod models;
pub mod runner;
