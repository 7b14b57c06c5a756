//! Assistant Mode and Avatar Intensity
//!
//! The mode is the backend's conversational phase. Intensity is the avatar's
//! animation amplitude, derived from the mode and from whichever audio source
//! is authoritative for that mode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Intensity while idle and after a turn completes.
pub const IDLE_INTENSITY: f32 = 0.5;
/// Intensity while the backend listens for speech.
pub const LISTENING_INTENSITY: f32 = 0.3;
/// Intensity when a `speaking` mode change carries no explicit value.
pub const SPEAKING_INTENSITY: f32 = 0.8;
/// Intensity for any mode without a dedicated default.
pub const NEUTRAL_INTENSITY: f32 = 0.5;

/// Lower bound for intensity driven by the local microphone.
pub const MIC_FLOOR: f32 = 0.1;
/// Gain applied to local microphone loudness.
pub const MIC_SCALE: f32 = 1.5;
/// Minimum change in mic-driven intensity worth publishing.
pub const MIC_CHANGE_THRESHOLD: f32 = 0.01;

/// Lower bound for intensity driven by the backend's `audio_level` events.
pub const VOICE_FLOOR: f32 = 0.3;
/// Gain applied to the backend's voice loudness.
pub const VOICE_SCALE: f32 = 1.2;

/// The assistant's current conversational phase.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssistantMode {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl AssistantMode {
    /// Intensity the avatar takes on when entering this mode.
    ///
    /// `requested` is the optional value carried by the mode change; only
    /// `speaking` honors it.
    pub fn entry_intensity(self, requested: Option<f32>) -> Intensity {
        match self {
            Self::Idle => Intensity::new(IDLE_INTENSITY),
            Self::Listening => Intensity::new(LISTENING_INTENSITY),
            Self::Speaking => Intensity::new(requested.unwrap_or(SPEAKING_INTENSITY)),
            Self::Thinking => Intensity::new(NEUTRAL_INTENSITY),
        }
    }

    /// Whether local microphone loudness drives the avatar in this mode.
    pub fn follows_microphone(self) -> bool {
        matches!(self, Self::Idle | Self::Listening)
    }
}

impl fmt::Display for AssistantMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Thinking => write!(f, "thinking"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Avatar animation amplitude, always within `[0, 1]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, PartialOrd)]
#[serde(transparent)]
pub struct Intensity(f32);

impl Intensity {
    /// Builds an intensity, clamping into `[0, 1]`. NaN becomes 0.
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Intensity for a local microphone sample: `max(0.1, level * 1.5)`.
    pub fn from_microphone(level: f32) -> Self {
        Self::new((level * MIC_SCALE).max(MIC_FLOOR))
    }

    /// Intensity for a backend voice sample: `max(0.3, level * 1.2)`.
    pub fn from_voice(level: f32) -> Self {
        Self::new((level * VOICE_SCALE).max(VOICE_FLOOR))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for Intensity {
    fn default() -> Self {
        Self(IDLE_INTENSITY)
    }
}
