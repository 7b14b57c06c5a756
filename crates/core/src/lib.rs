//! JARVIS Core
//!
//! Runtime-agnostic session logic for the JARVIS assistant client: the wire
//! protocol, conversation model, avatar intensity rules, reconnection policy,
//! and the [`session::Session`] state machine that ties them together.

pub mod backoff;
pub mod conversation;
pub mod mode;
pub mod monitor;
pub mod protocol;
pub mod session;

use protocol::OutboundEvent;
use std::time::Duration;

/// Side effects the session asks its runtime to carry out.
///
/// The [`session::Session`] never touches sockets, timers or devices itself;
/// every transition returns the commands needed to make the outside world
/// match its new state, and the runtime executes them in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a connection to the backend.
    Connect,
    /// Write one event to the open connection.
    Send(OutboundEvent),
    /// Close the connection cleanly, or abandon an in-flight connect.
    Close,
    /// Arm the reconnect timer, replacing any timer already pending.
    ScheduleReconnect(Duration),
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Arm the timer after which the microphone preference is sent.
    ScheduleMicSync(Duration),
    /// Disarm the microphone sync timer.
    CancelMicSync,
    /// Start the local audio monitor and report the outcome back.
    StartMonitor,
    /// Stop the local audio monitor.
    StopMonitor,
}
