//! Session Runtime
//!
//! Drives a [`Session`] against a real WebSocket. A single task owns the
//! session, the socket halves, both timers and the audio monitor; it waits
//! on whichever of them fires next, feeds the event to the session, and
//! executes the [`Command`]s that come back. Front-ends talk to the task
//! through a cloneable [`SessionHandle`] and observe it through a `watch`
//! channel of [`SessionSnapshot`]s.

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use jarvis_core::{
    Command,
    monitor::AudioMonitor,
    protocol::OutboundEvent,
    session::{Session, SessionError, SessionOptions, SessionSnapshot},
};
use std::{collections::VecDeque, future::Future, pin::Pin, time::Duration};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::Sleep,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{Instrument, debug, info, info_span, warn};

/// How long a single connection attempt may take before it counts as failed.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<Socket>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("The session task has stopped")]
    Closed,
}

enum Action {
    SetInput(String),
    Submit(oneshot::Sender<Result<(), SessionError>>),
    SendText {
        text: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    ToggleMic,
    ClearConversation,
    Reconnect,
    Shutdown(oneshot::Sender<()>),
}

/// A cheap, cloneable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    actions: mpsc::UnboundedSender<Action>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// The most recently published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that is notified each time the session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Action::SendText {
            text: text.into(),
            reply,
        })?;
        Ok(rx.await.map_err(|_| ClientError::Closed)??)
    }

    pub fn set_input(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(Action::SetInput(text.into()))
    }

    /// Sends the current input field. On failure the field keeps its text.
    pub async fn submit(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Action::Submit(reply))?;
        Ok(rx.await.map_err(|_| ClientError::Closed)??)
    }

    pub fn toggle_mic(&self) -> Result<(), ClientError> {
        self.dispatch(Action::ToggleMic)
    }

    pub fn clear_conversation(&self) -> Result<(), ClientError> {
        self.dispatch(Action::ClearConversation)
    }

    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.dispatch(Action::Reconnect)
    }

    /// Tears the session down and waits until it has released its
    /// resources. Returns immediately if the task is already gone.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.dispatch(Action::Shutdown(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    fn dispatch(&self, action: Action) -> Result<(), ClientError> {
        self.actions.send(action).map_err(|_| ClientError::Closed)
    }
}

/// Starts a session task connecting to `url`.
///
/// The task connects immediately and runs until [`SessionHandle::shutdown`]
/// is called or every handle has been dropped.
pub fn spawn_session(
    url: impl Into<String>,
    options: SessionOptions,
    monitor: Box<dyn AudioMonitor>,
) -> (SessionHandle, JoinHandle<()>) {
    let url = url.into();
    let session = Session::new(options);
    let (snapshots_tx, snapshots_rx) = watch::channel(session.snapshot());
    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let (samples_tx, samples_rx) = mpsc::unbounded_channel();

    let span = info_span!("session", %url);
    let runtime = Runtime {
        session,
        url,
        monitor,
        actions: actions_rx,
        snapshots: snapshots_tx,
        samples_tx,
        samples_rx,
        connecting: None,
        sink: None,
        stream: None,
        peer_close: None,
        reconnect_timer: None,
        mic_sync_timer: None,
        shutdown_replies: Vec::new(),
    };
    let task = tokio::spawn(runtime.run().instrument(span));

    (
        SessionHandle {
            actions: actions_tx,
            snapshots: snapshots_rx,
        },
        task,
    )
}

enum Event {
    Action(Option<Action>),
    Connected(Result<Socket>),
    Frame(Option<Result<Message, tungstenite::Error>>),
    ReconnectDue,
    MicSyncDue,
    Sample(f32),
}

struct Runtime {
    session: Session,
    url: String,
    monitor: Box<dyn AudioMonitor>,
    actions: mpsc::UnboundedReceiver<Action>,
    snapshots: watch::Sender<SessionSnapshot>,
    samples_tx: mpsc::UnboundedSender<f32>,
    samples_rx: mpsc::UnboundedReceiver<f32>,
    connecting: Option<ConnectFuture>,
    sink: Option<SplitSink<Socket, Message>>,
    stream: Option<SplitStream<Socket>>,
    /// Set once the server has started the closing handshake.
    peer_close: Option<bool>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    mic_sync_timer: Option<Pin<Box<Sleep>>>,
    shutdown_replies: Vec<oneshot::Sender<()>>,
}

impl Runtime {
    async fn run(mut self) {
        let commands = self.session.connect();
        self.execute(commands).await;
        self.publish();

        while !self.session.is_disposed() {
            let event = self.next_event().await;
            if self.handle(event).await {
                self.publish();
            }
        }

        for reply in self.shutdown_replies.drain(..) {
            let _ = reply.send(());
        }
        info!("Session task finished.");
    }

    async fn next_event(&mut self) -> Event {
        tokio::select! {
            action = self.actions.recv() => Event::Action(action),
            result = poll_optional(self.connecting.as_mut()) => Event::Connected(result),
            frame = next_frame(self.stream.as_mut()) => Event::Frame(frame),
            _ = poll_optional(self.reconnect_timer.as_mut()) => Event::ReconnectDue,
            _ = poll_optional(self.mic_sync_timer.as_mut()) => Event::MicSyncDue,
            Some(level) = self.samples_rx.recv() => Event::Sample(level),
        }
    }

    /// Handles one event. Returns `false` when the state is known to be
    /// unchanged and there is nothing to publish.
    async fn handle(&mut self, event: Event) -> bool {
        let commands = match event {
            Event::Action(Some(action)) => self.handle_action(action),
            // Every handle is gone; nobody is left to drive the session.
            Event::Action(None) => self.session.shutdown(),
            Event::Connected(result) => {
                self.connecting = None;
                match result {
                    Ok(socket) => {
                        let (sink, stream) = socket.split();
                        self.sink = Some(sink);
                        self.stream = Some(stream);
                        self.peer_close = None;
                        self.session.connection_opened()
                    }
                    Err(e) => self.session.connect_failed(&format!("{e:#}")),
                }
            }
            Event::Frame(Some(Ok(message))) => match message {
                Message::Text(text) => self.session.handle_frame(text.as_str(), Utc::now()),
                Message::Close(frame) => {
                    let clean = frame.is_some_and(|f| f.code == CloseCode::Normal);
                    debug!(clean, "Server started closing handshake.");
                    self.peer_close = Some(clean);
                    Vec::new()
                }
                _ => Vec::new(),
            },
            Event::Frame(Some(Err(e))) => {
                let clean = self.peer_close.unwrap_or(false);
                if !clean {
                    warn!(error = %e, "WebSocket error.");
                }
                self.drop_socket();
                self.session.connection_closed(clean)
            }
            Event::Frame(None) => {
                let clean = self.peer_close.unwrap_or(false);
                self.drop_socket();
                self.session.connection_closed(clean)
            }
            Event::ReconnectDue => {
                self.reconnect_timer = None;
                self.session.reconnect_due()
            }
            Event::MicSyncDue => {
                self.mic_sync_timer = None;
                self.session.mic_sync_due()
            }
            // Samples arrive every display frame; most are below the change
            // threshold and would only cost a snapshot clone.
            Event::Sample(level) => return self.session.audio_sample(level),
        };
        self.execute(commands).await;
        true
    }

    fn handle_action(&mut self, action: Action) -> Vec<Command> {
        match action {
            Action::SetInput(text) => {
                self.session.set_input(text);
                Vec::new()
            }
            Action::Submit(reply) => reply_with(reply, self.session.submit_input(Utc::now())),
            Action::SendText { text, reply } => {
                reply_with(reply, self.session.send_text(&text, Utc::now()))
            }
            Action::ToggleMic => self.session.toggle_mic(),
            Action::ClearConversation => {
                self.session.clear_conversation();
                Vec::new()
            }
            Action::Reconnect => self.session.reconnect(),
            Action::Shutdown(reply) => {
                self.shutdown_replies.push(reply);
                self.session.shutdown()
            }
        }
    }

    async fn execute(&mut self, commands: Vec<Command>) {
        let mut queue = VecDeque::from(commands);
        while let Some(command) = queue.pop_front() {
            debug!(?command, "Executing command.");
            match command {
                Command::Connect => {
                    self.connecting = Some(Box::pin(open_socket(self.url.clone())));
                }
                Command::Send(event) => {
                    if let Err(e) = self.write(&event).await {
                        warn!(error = %e, "Failed to send event; treating connection as dropped.");
                        self.drop_socket();
                        queue.extend(self.session.connection_closed(false));
                    }
                }
                Command::Close => {
                    self.connecting = None;
                    if let Some(mut sink) = self.sink.take() {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client shutdown".into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                            debug!(error = %e, "Close frame was not delivered.");
                        }
                        self.drop_socket();
                        queue.extend(self.session.connection_closed(true));
                    }
                }
                Command::ScheduleReconnect(delay) => {
                    self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Command::CancelReconnect => self.reconnect_timer = None,
                Command::ScheduleMicSync(delay) => {
                    self.mic_sync_timer = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Command::CancelMicSync => self.mic_sync_timer = None,
                Command::StartMonitor => match self.monitor.start(self.samples_tx.clone()).await {
                    Ok(()) => queue.extend(self.session.monitor_started()),
                    Err(e) => queue.extend(self.session.monitor_failed(&e)),
                },
                Command::StopMonitor => {
                    self.monitor.stop();
                    while self.samples_rx.try_recv().is_ok() {}
                }
            }
        }
    }

    /// Writes one event. Does nothing when no socket is attached, which
    /// happens when an earlier write in the same batch already failed.
    async fn write(&mut self, event: &OutboundEvent) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            debug!(?event, "No socket attached; dropping event.");
            return Ok(());
        };
        let json = event.encode().context("Failed to encode outbound event")?;
        sink.send(Message::Text(json.into()))
            .await
            .context("Failed to write to WebSocket")?;
        Ok(())
    }

    fn drop_socket(&mut self) {
        self.sink = None;
        self.stream = None;
        self.peer_close = None;
    }

    fn publish(&self) {
        let snapshot = self.session.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

fn reply_with(
    reply: oneshot::Sender<Result<(), SessionError>>,
    result: Result<Vec<Command>, SessionError>,
) -> Vec<Command> {
    match result {
        Ok(commands) => {
            let _ = reply.send(Ok(()));
            commands
        }
        Err(e) => {
            let _ = reply.send(Err(e));
            Vec::new()
        }
    }
}

async fn open_socket(url: String) -> Result<Socket> {
    let (socket, response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
        .await
        .context("Timed out connecting to assistant backend")?
        .context("WebSocket handshake failed")?;
    debug!(status = %response.status(), "WebSocket handshake complete.");
    Ok(socket)
}

/// Awaits `future` if present, otherwise never resolves.
async fn poll_optional<F>(future: Option<&mut F>) -> F::Output
where
    F: Future + Unpin,
{
    match future {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    stream: Option<&mut SplitStream<Socket>>,
) -> Option<Result<Message, tungstenite::Error>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
