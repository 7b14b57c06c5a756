//! Audio Level Monitor Contract
//!
//! The session consumes microphone loudness through this trait so the device
//! layer can be swapped out, for example for a silent stub in headless runs.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A failure to acquire or run the microphone.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("No input device available")]
    NoDevice,
    #[error("Microphone access denied: {0}")]
    Denied(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
}

/// Produces normalized loudness samples from a microphone.
///
/// Implementations must stop delivering samples once [`AudioMonitor::stop`]
/// returns, and both methods must tolerate being called repeatedly.
#[async_trait]
pub trait AudioMonitor: Send {
    /// Begins capture. Each loudness sample in `[0, 1]` is pushed into
    /// `samples` at the device's frame cadence.
    async fn start(&mut self, samples: mpsc::UnboundedSender<f32>) -> Result<(), MonitorError>;

    /// Ends capture and releases the device.
    fn stop(&mut self);
}
