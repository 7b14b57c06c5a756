//! JARVIS Relay Library Crate
//!
//! A local assistant backend speaking the JARVIS WebSocket protocol. It
//! greets each client, broadcasts every event to all connected clients,
//! answers `text_input` through a pluggable [`responder::Responder`], and
//! simulates voice loudness while it speaks. The `relay` binary is a thin
//! wrapper around this library.

pub mod config;
pub mod responder;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use server::Relay;
