//! WebSocket Handling
//!
//! - `session`: one client's connection, from greeting to disconnect.
//! - `turn`: the assistant's reply cycle for a single text prompt.
//! - `ticker`: simulated voice loudness while the assistant speaks.

pub mod session;
pub mod ticker;
pub mod turn;

pub use session::ws_handler;
