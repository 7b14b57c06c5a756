//! Broadcasts simulated voice loudness while a reply is being spoken.

use crate::state::AppState;
use jarvis_core::{mode::AssistantMode, protocol::InboundEvent};
use std::{ops::Range, sync::Arc};
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Range of the simulated `audio_level` values.
pub const VOICE_LEVELS: Range<f32> = 0.3..0.8;

/// Emits one `audio_level` per configured tick for as long as the relay is
/// speaking. Runs until the task is aborted.
pub async fn run_audio_ticker(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(state.config.audio_tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(tick_ms = state.config.audio_tick.as_millis() as u64, "Audio ticker started.");

    loop {
        interval.tick().await;
        if !state.is_speaking() {
            continue;
        }
        state.broadcast(InboundEvent::AudioLevel {
            mode: Some(AssistantMode::Speaking),
            level: rand::random_range(VOICE_LEVELS),
        });
    }
}
