//! Session State Machine
//!
//! [`Session`] is the single owner of everything the client knows about its
//! backend connection and the conversation flowing over it. Each method
//! handles exactly one event (a frame, a timer, a user action, a device
//! report), mutates the state in one step, and returns the [`Command`]s the
//! runtime must execute.

use crate::{
    Command,
    backoff::{ReconnectCause, ReconnectPolicy},
    conversation::Conversation,
    mode::{AssistantMode, Intensity, MIC_CHANGE_THRESHOLD},
    monitor::MonitorError,
    protocol::{InboundEvent, OutboundEvent},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default pause between a connection opening and the microphone sync.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Why an outbound action was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Not connected to the assistant backend")]
    NotConnected,
    #[error("Nothing to send")]
    EmptyInput,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorState {
    Stopped,
    Starting,
    Running,
}

/// A read-only view of the session for presentation code.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub attempts: u32,
    /// Reconnection gave up after the attempt cap.
    pub exhausted: bool,
    pub mode: AssistantMode,
    pub intensity: Intensity,
    pub conversation: Conversation,
    pub mic_enabled: bool,
    pub monitoring: bool,
    pub input: String,
}

/// Session settings fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    pub policy: ReconnectPolicy,
    pub settle_delay: Duration,
    /// The user's microphone preference at startup.
    pub mic_enabled: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            mic_enabled: false,
        }
    }
}

pub struct Session {
    connection: ConnectionState,
    attempts: u32,
    reconnect_pending: bool,
    exhausted: bool,
    disposed: bool,
    mode: AssistantMode,
    intensity: Intensity,
    conversation: Conversation,
    mic_enabled: bool,
    monitor: MonitorState,
    toggle_pending: bool,
    input: String,
    policy: ReconnectPolicy,
    settle_delay: Duration,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            attempts: 0,
            reconnect_pending: false,
            exhausted: false,
            disposed: false,
            mode: AssistantMode::Idle,
            intensity: Intensity::default(),
            conversation: Conversation::default(),
            mic_enabled: options.mic_enabled,
            monitor: MonitorState::Stopped,
            toggle_pending: false,
            input: String::new(),
            policy: options.policy,
            settle_delay: options.settle_delay,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn mode(&self) -> AssistantMode {
        self.mode
    }

    pub fn intensity(&self) -> Intensity {
        self.intensity
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor == MonitorState::Running
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection,
            attempts: self.attempts,
            exhausted: self.exhausted,
            mode: self.mode,
            intensity: self.intensity,
            conversation: self.conversation.clone(),
            mic_enabled: self.mic_enabled,
            monitoring: self.is_monitoring(),
            input: self.input.clone(),
        }
    }

    // --- Connection lifecycle ---

    /// Starts a connection attempt unless one is open or in flight.
    pub fn connect(&mut self) -> Vec<Command> {
        if self.disposed {
            debug!("Session disposed; ignoring connect.");
            return Vec::new();
        }
        if self.connection != ConnectionState::Disconnected {
            debug!(state = ?self.connection, "Connection already active; ignoring connect.");
            return Vec::new();
        }

        let mut commands = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            commands.push(Command::CancelReconnect);
        }
        self.connection = ConnectionState::Connecting;
        info!(attempt = self.attempts, "Connecting to assistant backend...");
        commands.push(Command::Connect);
        commands
    }

    /// A user-initiated retry that also lifts an exhausted state.
    pub fn reconnect(&mut self) -> Vec<Command> {
        if self.connection == ConnectionState::Disconnected {
            self.attempts = 0;
            self.exhausted = false;
        }
        self.connect()
    }

    /// The reconnect timer expired.
    pub fn reconnect_due(&mut self) -> Vec<Command> {
        self.reconnect_pending = false;
        self.connect()
    }

    pub fn connection_opened(&mut self) -> Vec<Command> {
        if self.disposed {
            return vec![Command::Close];
        }
        info!("Connected to assistant backend.");
        self.connection = ConnectionState::Open;
        self.attempts = 0;
        self.exhausted = false;
        vec![Command::ScheduleMicSync(self.settle_delay)]
    }

    /// The settle delay after opening has passed; ask the backend to listen
    /// if the user left the microphone on.
    ///
    /// Nothing is sent when the preference is off: the backend answers
    /// `disable_mic` with an idle broadcast to every client.
    pub fn mic_sync_due(&mut self) -> Vec<Command> {
        if !self.mic_enabled {
            return Vec::new();
        }
        self.send(OutboundEvent::EnableMic).into_iter().collect()
    }

    pub fn connect_failed(&mut self, reason: &str) -> Vec<Command> {
        warn!(%reason, "Failed to connect to assistant backend.");
        self.connection = ConnectionState::Disconnected;
        if self.disposed {
            return Vec::new();
        }
        self.schedule_reconnect(ReconnectCause::ConnectFailure)
    }

    /// The connection ended. `clean` means a normal closing handshake.
    pub fn connection_closed(&mut self, clean: bool) -> Vec<Command> {
        let previous = self.connection;
        self.connection = ConnectionState::Disconnected;
        let mut commands = vec![Command::CancelMicSync];

        if self.disposed || previous == ConnectionState::Closing {
            debug!("Connection closed during teardown.");
            return commands;
        }
        if clean {
            info!("Connection closed cleanly; not reconnecting.");
            return commands;
        }
        warn!("Connection dropped.");
        commands.extend(self.schedule_reconnect(ReconnectCause::UncleanClose));
        commands
    }

    fn schedule_reconnect(&mut self, cause: ReconnectCause) -> Vec<Command> {
        match self.policy.next_delay(cause, self.attempts) {
            Some(delay) => {
                self.attempts += 1;
                self.reconnect_pending = true;
                info!(
                    attempt = self.attempts,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    ?cause,
                    "Scheduling reconnect."
                );
                vec![Command::ScheduleReconnect(delay)]
            }
            None => {
                self.exhausted = true;
                error!(
                    attempts = self.attempts,
                    "Giving up on the assistant backend after too many reconnect attempts."
                );
                Vec::new()
            }
        }
    }

    /// Disposes of the session. Safe to call any number of times.
    pub fn shutdown(&mut self) -> Vec<Command> {
        if self.disposed {
            return Vec::new();
        }
        self.disposed = true;
        info!("Shutting down session.");

        let mut commands = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            commands.push(Command::CancelReconnect);
        }
        commands.push(Command::CancelMicSync);
        match self.connection {
            ConnectionState::Open => {
                self.connection = ConnectionState::Closing;
                commands.push(Command::Close);
            }
            ConnectionState::Connecting => {
                self.connection = ConnectionState::Disconnected;
                commands.push(Command::Close);
            }
            ConnectionState::Closing | ConnectionState::Disconnected => {}
        }
        commands.extend(self.stop_monitor());
        self.toggle_pending = false;
        commands
    }

    // --- Inbound dispatch ---

    /// Decodes and dispatches one text frame. Malformed frames are dropped.
    pub fn handle_frame(&mut self, text: &str, now: DateTime<Utc>) -> Vec<Command> {
        match InboundEvent::decode(text) {
            Ok(event) => self.handle_event(event, now),
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame.");
                Vec::new()
            }
        }
    }

    pub fn handle_event(&mut self, event: InboundEvent, now: DateTime<Utc>) -> Vec<Command> {
        match event {
            InboundEvent::UserText { text } => {
                if !self.conversation.receive_user_text(&text, now) {
                    debug!("Skipping duplicate user_text.");
                }
                Vec::new()
            }
            InboundEvent::AssistantStream { text } => {
                self.conversation.append_stream(&text);
                Vec::new()
            }
            InboundEvent::AssistantFinal { text } => {
                self.conversation.finalize(&text, now);
                self.mode = AssistantMode::Idle;
                self.intensity = AssistantMode::Idle.entry_intensity(None);
                Vec::new()
            }
            InboundEvent::ModeChange { mode, intensity } => {
                debug!(%mode, ?intensity, "Mode change.");
                self.mode = mode;
                self.intensity = mode.entry_intensity(intensity);
                match mode {
                    AssistantMode::Idle | AssistantMode::Listening if self.mic_enabled => {
                        self.start_monitor()
                    }
                    AssistantMode::Idle | AssistantMode::Listening => Vec::new(),
                    AssistantMode::Speaking | AssistantMode::Thinking => self.stop_monitor(),
                }
            }
            InboundEvent::AudioLevel { level, .. } => {
                if self.mode == AssistantMode::Speaking {
                    self.intensity = Intensity::from_voice(level);
                }
                Vec::new()
            }
            InboundEvent::Unknown { kind } => {
                warn!(%kind, "Ignoring unrecognized event type.");
                Vec::new()
            }
        }
    }

    // --- Outbound actions ---

    /// Wraps `event` for sending, or refuses with a warning when not open.
    pub fn send(&self, event: OutboundEvent) -> Result<Command, SessionError> {
        if self.connection != ConnectionState::Open {
            warn!(?event, "Cannot send: not connected.");
            return Err(SessionError::NotConnected);
        }
        Ok(Command::Send(event))
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Sends the current input field as a user turn and clears it.
    pub fn submit_input(&mut self, now: DateTime<Utc>) -> Result<Vec<Command>, SessionError> {
        let input = std::mem::take(&mut self.input);
        match self.send_text(&input, now) {
            Ok(commands) => Ok(commands),
            Err(e) => {
                self.input = input;
                Err(e)
            }
        }
    }

    /// Sends `text` as a user turn.
    pub fn send_text(&mut self, text: &str, now: DateTime<Utc>) -> Result<Vec<Command>, SessionError> {
        let text = text.trim();
        if self.connection != ConnectionState::Open {
            warn!("Cannot send text: not connected.");
            return Err(SessionError::NotConnected);
        }
        if text.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        self.conversation.push_user(text, now);
        let command = self.send(OutboundEvent::TextInput {
            text: text.to_string(),
        })?;
        Ok(vec![command])
    }

    /// Flips the user's microphone preference.
    ///
    /// Turning it on only requests the monitor; the preference changes once
    /// [`Session::monitor_started`] confirms the device is live.
    pub fn toggle_mic(&mut self) -> Vec<Command> {
        if self.toggle_pending || self.disposed {
            return Vec::new();
        }
        if self.mic_enabled {
            info!("Microphone disabled by user.");
            self.mic_enabled = false;
            let mut commands = self.stop_monitor();
            commands.extend(self.send(OutboundEvent::DisableMic));
            return commands;
        }

        self.toggle_pending = true;
        if self.monitor == MonitorState::Running {
            return self.monitor_started();
        }
        self.monitor = MonitorState::Starting;
        vec![Command::StartMonitor]
    }

    pub fn clear_conversation(&mut self) {
        self.conversation.clear();
    }

    // --- Local audio monitor ---

    pub fn monitor_started(&mut self) -> Vec<Command> {
        if self.disposed {
            self.monitor = MonitorState::Running;
            return self.stop_monitor();
        }
        self.monitor = MonitorState::Running;
        if !self.toggle_pending {
            return Vec::new();
        }
        self.toggle_pending = false;
        self.mic_enabled = true;
        info!("Microphone enabled by user.");
        self.send(OutboundEvent::EnableMic).into_iter().collect()
    }

    pub fn monitor_failed(&mut self, err: &MonitorError) -> Vec<Command> {
        self.monitor = MonitorState::Stopped;
        if std::mem::take(&mut self.toggle_pending) {
            warn!(error = %err, "Could not start microphone; leaving it disabled.");
        } else {
            warn!(error = %err, "Could not resume microphone monitoring.");
        }
        Vec::new()
    }

    /// Feeds one loudness sample from the local microphone.
    ///
    /// Returns `true` when the intensity changed.
    pub fn audio_sample(&mut self, level: f32) -> bool {
        if self.monitor != MonitorState::Running || !self.mode.follows_microphone() {
            return false;
        }
        let next = Intensity::from_microphone(level);
        if (next.value() - self.intensity.value()).abs() <= MIC_CHANGE_THRESHOLD {
            return false;
        }
        self.intensity = next;
        true
    }

    fn start_monitor(&mut self) -> Vec<Command> {
        if self.monitor != MonitorState::Stopped {
            return Vec::new();
        }
        self.monitor = MonitorState::Starting;
        vec![Command::StartMonitor]
    }

    fn stop_monitor(&mut self) -> Vec<Command> {
        if self.monitor == MonitorState::Stopped {
            return Vec::new();
        }
        self.monitor = MonitorState::Stopped;
        vec![Command::StopMonitor]
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::MAX_RECONNECT_ATTEMPTS;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn open_session() -> Session {
        let mut session = Session::default();
        session.connect();
        session.connection_opened();
        session
    }

    fn mode_change(mode: AssistantMode, intensity: Option<f32>) -> InboundEvent {
        InboundEvent::ModeChange { mode, intensity }
    }

    fn enable_mic(session: &mut Session) {
        assert_eq!(session.toggle_mic(), vec![Command::StartMonitor]);
        session.monitor_started();
        assert!(session.mic_enabled());
    }

    #[test]
    fn test_connect_is_refused_while_connecting_or_open() {
        let mut session = Session::default();
        assert_eq!(session.connect(), vec![Command::Connect]);
        assert_eq!(session.connection(), ConnectionState::Connecting);
        assert!(session.connect().is_empty());

        session.connection_opened();
        assert!(session.connect().is_empty());
        assert_eq!(session.connection(), ConnectionState::Open);
    }

    #[test]
    fn test_open_resets_attempts_and_schedules_mic_sync() {
        let mut session = Session::default();
        session.connect();
        session.connect_failed("refused");
        session.reconnect_due();
        assert_eq!(session.attempts(), 1);

        let commands = session.connection_opened();
        assert_eq!(commands, vec![Command::ScheduleMicSync(DEFAULT_SETTLE_DELAY)]);
        assert_eq!(session.attempts(), 0);
    }

    #[test]
    fn test_mic_sync_sends_nothing_when_mic_is_off() {
        let mut session = open_session();
        assert!(session.mic_sync_due().is_empty());
    }

    #[test]
    fn test_mic_sync_requests_listening_when_mic_is_on() {
        let mut session = Session::new(SessionOptions {
            mic_enabled: true,
            ..SessionOptions::default()
        });
        session.connect();
        session.connection_opened();
        assert_eq!(
            session.mic_sync_due(),
            vec![Command::Send(OutboundEvent::EnableMic)]
        );

        // The preference is read when the timer fires, not when it was set.
        session.toggle_mic();
        assert!(!session.mic_enabled());
        assert!(session.mic_sync_due().is_empty());
    }

    #[test]
    fn test_mic_sync_after_drop_sends_nothing() {
        let mut session = Session::new(SessionOptions {
            mic_enabled: true,
            ..SessionOptions::default()
        });
        session.connect();
        session.connection_opened();
        session.connection_closed(false);
        assert!(session.mic_sync_due().is_empty());
    }

    #[test]
    fn test_clean_close_does_not_reconnect() {
        let mut session = open_session();
        let commands = session.connection_closed(true);
        assert_eq!(commands, vec![Command::CancelMicSync]);
        assert_eq!(session.connection(), ConnectionState::Disconnected);
        assert_eq!(session.attempts(), 0);
    }

    #[test]
    fn test_unclean_close_delays_follow_schedule() {
        let mut session = open_session();
        for n in 1..=MAX_RECONNECT_ATTEMPTS {
            let commands = session.connection_closed(false);
            let expected = (10_000.0 * 1.5f64.powi(n as i32 - 1)).min(120_000.0) as u64;
            assert_eq!(
                commands,
                vec![
                    Command::CancelMicSync,
                    Command::ScheduleReconnect(Duration::from_millis(expected))
                ],
                "attempt {n}"
            );
            assert_eq!(session.attempts(), n);
            assert_eq!(session.reconnect_due(), vec![Command::Connect]);
            // The server accepts the socket but drops it before opening.
            session.connection = ConnectionState::Open;
        }
    }

    #[test]
    fn test_reconnect_attempts_are_capped() {
        let mut session = Session::default();
        session.connect();
        let mut scheduled = 0;
        for _ in 0..50 {
            let commands = session.connect_failed("refused");
            if commands.is_empty() {
                break;
            }
            scheduled += 1;
            session.reconnect_due();
        }
        assert_eq!(scheduled, MAX_RECONNECT_ATTEMPTS);
        assert!(session.is_exhausted());
        assert_eq!(session.attempts(), MAX_RECONNECT_ATTEMPTS);
        assert_eq!(session.connection(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_manual_reconnect_lifts_exhaustion() {
        let policy = ReconnectPolicy::default().with_max_attempts(1);
        let mut session = Session::new(SessionOptions {
            policy,
            ..SessionOptions::default()
        });
        session.connect();
        session.connect_failed("refused");
        session.reconnect_due();
        assert!(session.connect_failed("refused").is_empty());
        assert!(session.is_exhausted());

        assert_eq!(session.reconnect(), vec![Command::Connect]);
        assert!(!session.is_exhausted());
        assert_eq!(session.attempts(), 0);
    }

    #[test]
    fn test_connect_cancels_pending_reconnect() {
        let mut session = Session::default();
        session.connect();
        session.connect_failed("refused");
        assert_eq!(
            session.reconnect(),
            vec![Command::CancelReconnect, Command::Connect]
        );
    }

    #[test]
    fn test_legacy_policy_uses_faster_connect_failure_schedule() {
        let mut session = Session::new(SessionOptions {
            policy: ReconnectPolicy::legacy(),
            ..SessionOptions::default()
        });
        session.connect();
        assert_eq!(
            session.connect_failed("refused"),
            vec![Command::ScheduleReconnect(Duration::from_millis(5_000))]
        );
    }

    #[test]
    fn test_mode_change_sets_default_intensity() {
        let mut session = open_session();
        let cases = [
            (AssistantMode::Idle, None, 0.5),
            (AssistantMode::Listening, None, 0.3),
            (AssistantMode::Speaking, None, 0.8),
            (AssistantMode::Speaking, Some(0.6), 0.6),
            (AssistantMode::Thinking, None, 0.5),
            (AssistantMode::Listening, Some(0.9), 0.3),
        ];
        for (mode, payload, expected) in cases {
            session.handle_event(mode_change(mode, payload), at(0));
            assert_eq!(session.mode(), mode);
            assert_abs_diff_eq!(session.intensity().value(), expected);
        }
    }

    #[test]
    fn test_listening_starts_monitor_only_when_mic_enabled() {
        let mut session = open_session();
        let commands = session.handle_event(mode_change(AssistantMode::Listening, None), at(0));
        assert!(commands.is_empty());

        let mut session = Session::new(SessionOptions {
            mic_enabled: true,
            ..SessionOptions::default()
        });
        session.connect();
        session.connection_opened();
        let commands = session.handle_event(mode_change(AssistantMode::Listening, None), at(0));
        assert_eq!(commands, vec![Command::StartMonitor]);

        // Already starting: no second request.
        let commands = session.handle_event(mode_change(AssistantMode::Idle, None), at(0));
        assert!(commands.is_empty());
    }

    #[test]
    fn test_speaking_and_thinking_stop_monitor() {
        let mut session = open_session();
        enable_mic(&mut session);

        let commands = session.handle_event(mode_change(AssistantMode::Speaking, None), at(0));
        assert_eq!(commands, vec![Command::StopMonitor]);
        assert!(!session.is_monitoring());

        session.handle_event(mode_change(AssistantMode::Listening, None), at(0));
        session.monitor_started();
        let commands = session.handle_event(mode_change(AssistantMode::Thinking, None), at(0));
        assert_eq!(commands, vec![Command::StopMonitor]);
    }

    #[test]
    fn test_audio_level_is_gated_on_speaking() {
        let mut session = open_session();
        enable_mic(&mut session);
        session.handle_event(mode_change(AssistantMode::Listening, None), at(0));
        assert_abs_diff_eq!(session.intensity().value(), 0.3);

        session.handle_frame(
            r#"{"type":"audio_level","mode":"speaking","level":0.9}"#,
            at(10),
        );
        assert_abs_diff_eq!(session.intensity().value(), 0.3);

        session.handle_event(mode_change(AssistantMode::Speaking, None), at(20));
        session.handle_event(
            InboundEvent::AudioLevel {
                mode: Some(AssistantMode::Speaking),
                level: 0.5,
            },
            at(30),
        );
        assert_abs_diff_eq!(session.intensity().value(), 0.6, epsilon = 1e-6);

        session.handle_event(
            InboundEvent::AudioLevel {
                mode: None,
                level: 0.05,
            },
            at(40),
        );
        assert_abs_diff_eq!(session.intensity().value(), 0.3);
    }

    #[test]
    fn test_stream_then_final_scenario() {
        let mut session = open_session();
        session.handle_event(mode_change(AssistantMode::Speaking, None), at(0));
        session.handle_frame(r#"{"type":"assistant_stream","text":"Hel"}"#, at(1));
        session.handle_frame(r#"{"type":"assistant_stream","text":"lo"}"#, at(2));
        assert_eq!(session.conversation().streaming(), "Hello");

        session.handle_frame(r#"{"type":"assistant_final","text":"Hello"}"#, at(3));
        let messages = session.conversation().messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "Hello");
        assert_eq!(session.conversation().streaming(), "");
        assert_eq!(session.mode(), AssistantMode::Idle);
        assert_abs_diff_eq!(session.intensity().value(), 0.5);
    }

    #[test]
    fn test_user_text_marks_awaiting_and_stream_clears_it() {
        let mut session = open_session();
        session.handle_frame(r#"{"type":"user_text","text":"hi"}"#, at(0));
        assert!(session.conversation().is_awaiting_response());
        session.handle_frame(r#"{"type":"assistant_stream","text":"H"}"#, at(1));
        assert!(!session.conversation().is_awaiting_response());
    }

    #[test]
    fn test_malformed_and_unknown_frames_are_dropped() {
        let mut session = open_session();
        let before = session.snapshot();
        assert!(session.handle_frame("{{{", at(0)).is_empty());
        assert!(session.handle_frame(r#"{"type":"weather","temp":21}"#, at(0)).is_empty());
        assert!(session.handle_frame(r#"{"type":"mode_change"}"#, at(0)).is_empty());
        assert_eq!(session.snapshot(), before);
        assert_eq!(session.connection(), ConnectionState::Open);
    }

    #[test]
    fn test_send_text_requires_open_connection() {
        let mut session = Session::default();
        assert_eq!(
            session.send_text("hello", at(0)),
            Err(SessionError::NotConnected)
        );
        assert!(session.conversation().messages().is_empty());
        assert_eq!(
            session.send(OutboundEvent::EnableMic),
            Err(SessionError::NotConnected)
        );
    }

    #[test]
    fn test_send_text_trims_and_records_turn() {
        let mut session = open_session();
        assert_eq!(session.send_text("   ", at(0)), Err(SessionError::EmptyInput));

        let commands = session.send_text("  what's the weather  ", at(0)).unwrap();
        assert_eq!(
            commands,
            vec![Command::Send(OutboundEvent::TextInput {
                text: "what's the weather".to_string()
            })]
        );
        let messages = session.conversation().messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "what's the weather");
        assert!(session.conversation().is_awaiting_response());
    }

    #[test]
    fn test_submit_input_clears_field_only_on_success() {
        let mut session = Session::default();
        session.set_input("hello");
        assert!(session.submit_input(at(0)).is_err());
        assert_eq!(session.input(), "hello");

        session.connect();
        session.connection_opened();
        assert!(session.submit_input(at(0)).is_ok());
        assert_eq!(session.input(), "");
    }

    #[test]
    fn test_toggle_mic_on_waits_for_monitor() {
        let mut session = open_session();
        assert_eq!(session.toggle_mic(), vec![Command::StartMonitor]);
        assert!(!session.mic_enabled());
        assert!(session.toggle_mic().is_empty());

        assert_eq!(
            session.monitor_started(),
            vec![Command::Send(OutboundEvent::EnableMic)]
        );
        assert!(session.mic_enabled());
        assert!(session.is_monitoring());
    }

    #[test]
    fn test_toggle_mic_failure_leaves_it_disabled() {
        let mut session = open_session();
        session.toggle_mic();
        let commands = session.monitor_failed(&MonitorError::Denied("blocked".into()));
        assert!(commands.is_empty());
        assert!(!session.mic_enabled());
        assert!(!session.is_monitoring());

        // A later toggle is accepted again.
        assert_eq!(session.toggle_mic(), vec![Command::StartMonitor]);
    }

    #[test]
    fn test_toggle_mic_off() {
        let mut session = open_session();
        enable_mic(&mut session);
        assert_eq!(
            session.toggle_mic(),
            vec![
                Command::StopMonitor,
                Command::Send(OutboundEvent::DisableMic)
            ]
        );
        assert!(!session.mic_enabled());
    }

    #[test]
    fn test_toggle_mic_while_disconnected_changes_preference_only() {
        let mut session = Session::default();
        session.toggle_mic();
        assert!(session.monitor_started().is_empty());
        assert!(session.mic_enabled());
    }

    #[test]
    fn test_microphone_samples_drive_intensity_with_threshold() {
        let mut session = open_session();
        enable_mic(&mut session);
        session.handle_event(mode_change(AssistantMode::Listening, None), at(0));

        assert!(session.audio_sample(0.4));
        assert_abs_diff_eq!(session.intensity().value(), 0.6, epsilon = 1e-6);
        assert!(!session.audio_sample(0.405));
        assert_abs_diff_eq!(session.intensity().value(), 0.6, epsilon = 1e-6);
        assert!(session.audio_sample(0.0));
        assert_abs_diff_eq!(session.intensity().value(), 0.1);
    }

    #[test]
    fn test_microphone_samples_ignored_when_not_following() {
        let mut session = open_session();
        assert!(!session.audio_sample(0.8));

        enable_mic(&mut session);
        session.handle_event(mode_change(AssistantMode::Speaking, None), at(0));
        assert!(!session.audio_sample(0.8));
        assert_abs_diff_eq!(session.intensity().value(), 0.8);
    }

    #[test]
    fn test_clear_conversation() {
        let mut session = open_session();
        session.send_text("one", at(0)).unwrap();
        session.handle_frame(r#"{"type":"assistant_final","text":"two"}"#, at(1));
        session.handle_frame(r#"{"type":"assistant_stream","text":"thr"}"#, at(2));
        session.clear_conversation();
        assert!(session.conversation().messages().is_empty());
        assert_eq!(session.conversation().streaming(), "");
    }

    #[test]
    fn test_shutdown_is_idempotent_and_suppresses_reconnect() {
        let mut session = open_session();
        enable_mic(&mut session);

        let commands = session.shutdown();
        assert_eq!(
            commands,
            vec![Command::CancelMicSync, Command::Close, Command::StopMonitor]
        );
        assert!(session.shutdown().is_empty());

        let commands = session.connection_closed(false);
        assert_eq!(commands, vec![Command::CancelMicSync]);
        assert!(session.connect().is_empty());
        assert!(session.toggle_mic().is_empty());
    }

    #[test]
    fn test_shutdown_cancels_pending_reconnect() {
        let mut session = Session::default();
        session.connect();
        session.connect_failed("refused");
        assert_eq!(
            session.shutdown(),
            vec![Command::CancelReconnect, Command::CancelMicSync]
        );
    }

    #[test]
    fn test_shutdown_while_connecting_abandons_attempt() {
        let mut session = Session::default();
        session.connect();
        assert_eq!(
            session.shutdown(),
            vec![Command::CancelMicSync, Command::Close]
        );
        assert_eq!(session.connection_opened(), vec![Command::Close]);
    }
}
