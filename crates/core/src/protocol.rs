//! Wire Protocol
//!
//! Defines the JSON messages exchanged with the assistant backend. Every frame
//! is a text frame holding one object with a `type` discriminator.

use crate::mode::AssistantMode;
use serde::{Deserialize, Serialize};

/// A decode failure for an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not JSON, or had no string `type` field.
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The `type` was recognized but the payload did not match its shape.
    #[error("Invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Messages sent from the backend to the client.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A transcribed or typed user utterance echoed by the backend.
    UserText { text: String },
    /// An incremental chunk of the assistant's reply.
    AssistantStream { text: String },
    /// The complete assistant reply, ending the current turn.
    AssistantFinal { text: String },
    /// The backend entered a new conversational phase.
    ModeChange {
        mode: AssistantMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intensity: Option<f32>,
    },
    /// Loudness of the assistant's own voice output.
    AudioLevel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<AssistantMode>,
        level: f32,
    },
    /// Any `type` this client does not understand.
    #[serde(skip)]
    Unknown { kind: String },
}

/// Messages sent from the client to the backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    EnableMic,
    DisableMic,
    TextInput { text: String },
}

const KNOWN_INBOUND: &[&str] = &[
    "user_text",
    "assistant_stream",
    "assistant_final",
    "mode_change",
    "audio_level",
];

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

impl InboundEvent {
    /// Decodes one inbound text frame.
    ///
    /// Frames with an unrecognized `type` decode to [`InboundEvent::Unknown`]
    /// rather than failing, so callers can log and skip them.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        let envelope: Envelope =
            serde_json::from_value(value.clone()).map_err(ProtocolError::Malformed)?;

        if !KNOWN_INBOUND.contains(&envelope.kind.as_str()) {
            return Ok(Self::Unknown {
                kind: envelope.kind,
            });
        }

        serde_json::from_value(value).map_err(|source| ProtocolError::InvalidPayload {
            kind: envelope.kind,
            source,
        })
    }

    /// The wire name of this event's `type`.
    pub fn kind(&self) -> &str {
        match self {
            Self::UserText { .. } => "user_text",
            Self::AssistantStream { .. } => "assistant_stream",
            Self::AssistantFinal { .. } => "assistant_final",
            Self::ModeChange { .. } => "mode_change",
            Self::AudioLevel { .. } => "audio_level",
            Self::Unknown { kind } => kind,
        }
    }
}

impl OutboundEvent {
    /// Serializes the event into the JSON text carried by one frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
