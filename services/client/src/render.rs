//! Terminal Presentation
//!
//! Text renditions of the avatar and the conversation panel. Everything here
//! is a pure function of a [`SessionSnapshot`] (plus elapsed time for the
//! avatar pulse), so the binary can redraw from whatever the session last
//! published.

use chrono::Local;
use jarvis_core::{
    conversation::{Conversation, ConversationMessage, Role},
    mode::{AssistantMode, Intensity},
    session::{ConnectionState, SessionSnapshot},
};
use std::time::Duration;

/// Width of the avatar's amplitude bar in the status line.
pub const AVATAR_WIDTH: usize = 12;

const STREAM_PREVIEW_CHARS: usize = 48;

/// Draws the avatar as a mode glyph followed by an amplitude bar.
///
/// The bar breathes around `intensity` at a rate that depends on the mode:
/// slow when idle, fast while speaking.
pub fn avatar(mode: AssistantMode, intensity: Intensity, width: usize, elapsed: Duration) -> String {
    let (glyph, rate) = match mode {
        AssistantMode::Idle => ('◌', 0.5),
        AssistantMode::Listening => ('◉', 1.0),
        AssistantMode::Thinking => ('◎', 2.0),
        AssistantMode::Speaking => ('●', 4.0),
    };
    let phase = elapsed.as_secs_f32() * rate * std::f32::consts::TAU;
    let amplitude = (intensity.value() * (0.85 + 0.15 * phase.sin())).clamp(0.0, 1.0);
    let filled = ((amplitude * width as f32).round() as usize).min(width);

    let mut out = String::with_capacity(width * 3 + 4);
    out.push(glyph);
    out.push(' ');
    out.extend(std::iter::repeat_n('█', filled));
    out.extend(std::iter::repeat_n('░', width - filled));
    out
}

pub fn format_message(message: &ConversationMessage) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "jarvis",
    };
    format!(
        "[{}] {speaker}: {}",
        message.timestamp.with_timezone(&Local).format("%H:%M:%S"),
        message.text
    )
}

fn connection_label(snapshot: &SessionSnapshot) -> String {
    match snapshot.connection {
        ConnectionState::Open => "online".to_string(),
        ConnectionState::Connecting => "connecting".to_string(),
        ConnectionState::Closing => "closing".to_string(),
        ConnectionState::Disconnected if snapshot.exhausted => {
            format!("offline after {} attempts, /reconnect to retry", snapshot.attempts)
        }
        ConnectionState::Disconnected if snapshot.attempts > 0 => {
            format!("disconnected, retry {}", snapshot.attempts)
        }
        ConnectionState::Disconnected => "disconnected".to_string(),
    }
}

/// One line summarising connection, mode, avatar and the reply in progress.
pub fn status_line(snapshot: &SessionSnapshot, elapsed: Duration) -> String {
    let mut line = format!(
        "[{}] {} {:<9} mic:{}",
        connection_label(snapshot),
        avatar(snapshot.mode, snapshot.intensity, AVATAR_WIDTH, elapsed),
        snapshot.mode.to_string(),
        if snapshot.mic_enabled { "on" } else { "off" },
    );

    let conversation = &snapshot.conversation;
    if !conversation.streaming().is_empty() {
        line.push_str(" | jarvis: ");
        line.push_str(&tail(conversation.streaming(), STREAM_PREVIEW_CHARS));
    } else if conversation.is_awaiting_response() {
        line.push_str(" | jarvis is thinking...");
    } else if !snapshot.input.is_empty() {
        line.push_str(" | unsent, /send to retry: ");
        line.push_str(&tail(&snapshot.input, STREAM_PREVIEW_CHARS));
    }
    line
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().skip(count - max_chars + 1).collect();
    format!("…{kept}")
}

/// Tracks which finalized messages have already been printed so each one is
/// written to the terminal exactly once.
#[derive(Debug, Default)]
pub struct Console {
    printed: usize,
    first_id: Option<String>,
}

impl Console {
    /// Lines for messages that appeared since the last call. A cleared or
    /// replaced history starts the count over.
    pub fn update(&mut self, conversation: &Conversation) -> Vec<String> {
        let messages = conversation.messages();
        let first_id = messages.first().map(|m| m.id.clone());
        if messages.len() < self.printed || first_id != self.first_id {
            self.printed = 0;
        }
        self.first_id = first_id;

        let lines = messages[self.printed..].iter().map(format_message).collect();
        self.printed = messages.len();
        lines
    }
}
