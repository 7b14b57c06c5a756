//! Conversation History
//!
//! Holds the finalized turns of the current session, the assistant reply that
//! is still streaming in, and whether a user turn is waiting for a reply.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Window within which an identical user utterance is treated as an echo.
pub const DUPLICATE_WINDOW_MS: i64 = 2000;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One finalized conversation turn.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    /// Derived from role, text and timestamp.
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: Role, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let text = text.into();
        let mut hasher = DefaultHasher::new();
        role.hash(&mut hasher);
        text.hash(&mut hasher);
        timestamp.timestamp_millis().hash(&mut hasher);
        Self {
            id: format!("{role}-{}-{:016x}", timestamp.timestamp_millis(), hasher.finish()),
            role,
            text,
            timestamp,
        }
    }
}

/// The session's conversation state.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
    streaming: String,
    awaiting_response: bool,
}

impl Conversation {
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// The assistant reply accumulated so far in the current turn.
    pub fn streaming(&self) -> &str {
        &self.streaming
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    /// Records a user turn reported by the backend.
    ///
    /// Returns `false` without appending when the most recent user message
    /// has the same text and is no older than [`DUPLICATE_WINDOW_MS`]; this
    /// absorbs the backend echoing a turn the client already appended
    /// locally. The awaiting flag is set either way.
    pub fn receive_user_text(&mut self, text: &str, now: DateTime<Utc>) -> bool {
        self.awaiting_response = true;
        if self.is_recent_duplicate(text, now) {
            return false;
        }
        self.messages
            .push(ConversationMessage::new(Role::User, text, now));
        true
    }

    /// Records a user turn typed locally.
    pub fn push_user(&mut self, text: &str, now: DateTime<Utc>) {
        self.messages
            .push(ConversationMessage::new(Role::User, text, now));
        self.awaiting_response = true;
    }

    /// Appends a streamed chunk of the assistant reply.
    pub fn append_stream(&mut self, chunk: &str) {
        self.streaming.push_str(chunk);
        self.awaiting_response = false;
    }

    /// Closes the assistant turn.
    ///
    /// The final text wins when present; otherwise whatever was streamed is
    /// kept. Nothing is appended if both are blank.
    pub fn finalize(&mut self, text: &str, now: DateTime<Utc>) -> Option<&ConversationMessage> {
        let streamed = std::mem::take(&mut self.streaming);
        self.awaiting_response = false;

        let body = if text.trim().is_empty() { streamed } else { text.to_string() };
        if body.trim().is_empty() {
            return None;
        }
        self.messages
            .push(ConversationMessage::new(Role::Assistant, body, now));
        self.messages.last()
    }

    /// Drops all history and any partial reply.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.streaming.clear();
        self.awaiting_response = false;
    }

    fn is_recent_duplicate(&self, text: &str, now: DateTime<Utc>) -> bool {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .is_some_and(|prev| {
                prev.text == text
                    && now.signed_duration_since(prev.timestamp)
                        <= Duration::milliseconds(DUPLICATE_WINDOW_MS)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn test_duplicate_user_text_within_window_is_dropped() {
        let mut conv = Conversation::default();
        assert!(conv.receive_user_text("what time is it", at(0)));
        assert!(!conv.receive_user_text("what time is it", at(1500)));
        assert_eq!(conv.messages().len(), 1);
        assert!(conv.is_awaiting_response());
    }

    #[test]
    fn test_duplicate_user_text_outside_window_is_kept() {
        let mut conv = Conversation::default();
        conv.receive_user_text("hello", at(0));
        assert!(conv.receive_user_text("hello", at(2001)));
        assert_eq!(conv.messages().len(), 2);
    }

    #[test]
    fn test_different_user_text_is_kept() {
        let mut conv = Conversation::default();
        conv.receive_user_text("hello", at(0));
        assert!(conv.receive_user_text("hello there", at(100)));
        assert_eq!(conv.messages().len(), 2);
    }

    #[test]
    fn test_backend_echo_of_local_turn_is_absorbed() {
        let mut conv = Conversation::default();
        conv.push_user("open notepad", at(0));
        assert!(!conv.receive_user_text("open notepad", at(300)));
        assert_eq!(conv.messages().len(), 1);
    }

    #[test]
    fn test_duplicate_check_skips_assistant_turns() {
        let mut conv = Conversation::default();
        conv.receive_user_text("ping", at(0));
        conv.finalize("pong", at(100));
        assert!(!conv.receive_user_text("ping", at(200)));
        assert_eq!(conv.messages().len(), 2);
    }

    #[test]
    fn test_stream_then_finalize() {
        let mut conv = Conversation::default();
        conv.push_user("greet me", at(0));
        conv.append_stream("Hel");
        assert!(!conv.is_awaiting_response());
        conv.append_stream("lo");
        assert_eq!(conv.streaming(), "Hello");

        let msg = conv.finalize("Hello", at(50)).cloned().unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.text, "Hello");
        assert_eq!(conv.streaming(), "");
        assert_eq!(conv.messages().len(), 2);
    }

    #[test]
    fn test_finalize_falls_back_to_stream_buffer() {
        let mut conv = Conversation::default();
        conv.append_stream("partial answer");
        let msg = conv.finalize("  ", at(0)).cloned().unwrap();
        assert_eq!(msg.text, "partial answer");
    }

    #[test]
    fn test_finalize_with_nothing_appends_nothing() {
        let mut conv = Conversation::default();
        assert!(conv.finalize("", at(0)).is_none());
        assert!(conv.messages().is_empty());
    }

    #[test]
    fn test_clear_empties_history_and_buffer() {
        let mut conv = Conversation::default();
        conv.push_user("a", at(0));
        conv.finalize("b", at(1));
        conv.append_stream("half");
        conv.clear();
        assert!(conv.messages().is_empty());
        assert_eq!(conv.streaming(), "");
        assert!(!conv.is_awaiting_response());
    }

    #[test]
    fn test_message_identity_depends_on_role_text_and_time() {
        let a = ConversationMessage::new(Role::User, "x", at(0));
        let b = ConversationMessage::new(Role::User, "x", at(0));
        let c = ConversationMessage::new(Role::Assistant, "x", at(0));
        let d = ConversationMessage::new(Role::User, "x", at(1));
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_ne!(a.id, d.id);
        assert!(a.id.starts_with("user-"));
    }
}
