//! Shared Application State
//!
//! This module defines the `AppState` struct shared by every WebSocket
//! connection, the turn runner and the audio ticker.

use crate::{config::Config, responder::Responder};
use jarvis_core::protocol::InboundEvent;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error};

/// Frames buffered per client before a slow client starts losing them.
const BROADCAST_CAPACITY: usize = 256;

/// The shared relay state, created once at startup and passed to all handlers.
pub struct AppState {
    events: broadcast::Sender<String>,
    mic_enabled: AtomicBool,
    speaking: AtomicBool,
    /// Held for the duration of one assistant turn so turns never interleave.
    pub turn: Mutex<()>,
    pub responder: Arc<dyn Responder>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, responder: Arc<dyn Responder>) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            events,
            mic_enabled: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            turn: Mutex::new(()),
            responder,
            config: Arc::new(config),
        }
    }

    /// Sends `event` to every connected client.
    pub fn broadcast(&self, event: InboundEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, kind = event.kind(), "Failed to serialize event.");
                return;
            }
        };
        // An error only means nobody is connected right now.
        if self.events.send(json).is_err() {
            debug!(kind = event.kind(), "No clients connected; event dropped.");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Records the microphone preference. Returns `true` if it changed.
    pub fn set_mic_enabled(&self, enabled: bool) -> bool {
        self.mic_enabled.swap(enabled, Ordering::SeqCst) != enabled
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled.load(Ordering::SeqCst)
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}
