//! JARVIS Client Library Crate
//!
//! The async side of the assistant client: configuration, the tokio runtime
//! that drives a [`jarvis_core::session::Session`] over a WebSocket, audio
//! monitor implementations, and terminal rendering. The `jarvis` binary is a
//! thin wrapper around this library.

pub mod config;
pub mod monitor;
pub mod render;
pub mod runtime;
