//! Runs one assistant turn: from a user's text to the return to `idle`.

use crate::state::AppState;
use anyhow::Result;
use futures::StreamExt;
use jarvis_core::{
    mode::{AssistantMode, SPEAKING_INTENSITY},
    protocol::InboundEvent,
};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Sent as the final answer when the responder fails mid-turn.
pub const APOLOGY: &str = "Sorry, I encountered an error processing your request.";

fn mode_change(mode: AssistantMode, intensity: Option<f32>) -> InboundEvent {
    InboundEvent::ModeChange { mode, intensity }
}

/// Handles a single user utterance.
///
/// Turns are serialized through [`AppState::turn`], so a second prompt waits
/// until the first has returned to `idle`. The broadcast sequence is:
/// 1.  `user_text` echoing the prompt.
/// 2.  `mode_change{thinking}`, then the configured thinking pause.
/// 3.  `mode_change{speaking, 0.8}` and the responder's chunks as
///     `assistant_stream`.
/// 4.  One `assistant_final` with the full reply.
/// 5.  After the idle delay, `mode_change{idle}`.
#[instrument(name = "turn", skip_all, fields(turn_id = %Uuid::new_v4()))]
pub async fn run_turn(state: Arc<AppState>, text: String) {
    let _turn = state.turn.lock().await;
    info!(chars = text.chars().count(), "Processing text input.");

    state.broadcast(InboundEvent::UserText { text: text.clone() });
    state.broadcast(mode_change(AssistantMode::Thinking, None));
    tokio::time::sleep(state.config.thinking_delay).await;

    state.broadcast(mode_change(AssistantMode::Speaking, Some(SPEAKING_INTENSITY)));
    state.set_speaking(true);

    let reply = stream_reply(&state, &text).await;
    state.set_speaking(false);

    match reply {
        Ok(reply) => {
            state.broadcast(InboundEvent::AssistantFinal { text: reply });
            tokio::time::sleep(state.config.idle_delay).await;
        }
        Err(e) => {
            error!(error = ?e, "Responder failed.");
            state.broadcast(InboundEvent::AssistantFinal {
                text: APOLOGY.to_string(),
            });
        }
    }
    state.broadcast(mode_change(AssistantMode::Idle, None));
    info!("Turn complete.");
}

/// Streams the responder's chunks to every client and returns the whole reply.
async fn stream_reply(state: &AppState, text: &str) -> Result<String> {
    let mut chunks = state.responder.respond(text).await?;
    let mut reply = String::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        reply.push_str(&chunk);
        state.broadcast(InboundEvent::AssistantStream { text: chunk });
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        responder::{EchoResponder, MockResponder, Responder},
    };
    use futures::stream;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn quick_config() -> Config {
        Config {
            thinking_delay: Duration::ZERO,
            idle_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            ..Config::default()
        }
    }

    fn drain(rx: &mut broadcast::Receiver<String>) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(InboundEvent::decode(&frame).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn test_turn_broadcasts_full_sequence() {
        let responder: Arc<dyn Responder> = Arc::new(EchoResponder::new(Duration::ZERO));
        let state = Arc::new(AppState::new(quick_config(), responder));
        let mut rx = state.subscribe();

        run_turn(state.clone(), "hello there".to_string()).await;

        let events = drain(&mut rx);
        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "user_text",
                "mode_change",
                "mode_change",
                "assistant_stream",
                "assistant_stream",
                "assistant_stream",
                "assistant_stream",
                "assistant_final",
                "mode_change",
            ]
        );
        assert_eq!(events[1], mode_change(AssistantMode::Thinking, None));
        assert_eq!(events[2], mode_change(AssistantMode::Speaking, Some(0.8)));
        assert_eq!(
            events[7],
            InboundEvent::AssistantFinal {
                text: "You said: hello there".to_string()
            }
        );
        assert_eq!(events[8], mode_change(AssistantMode::Idle, None));
        assert!(!state.is_speaking());
    }

    #[tokio::test]
    async fn test_responder_failure_sends_apology() {
        let mut responder = MockResponder::new();
        responder
            .expect_respond()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("model offline")));
        let state = Arc::new(AppState::new(quick_config(), Arc::new(responder)));
        let mut rx = state.subscribe();

        run_turn(state.clone(), "hi".to_string()).await;

        let events = drain(&mut rx);
        assert_eq!(
            events[events.len() - 2],
            InboundEvent::AssistantFinal {
                text: APOLOGY.to_string()
            }
        );
        assert_eq!(events[events.len() - 1], mode_change(AssistantMode::Idle, None));
    }

    #[tokio::test]
    async fn test_stream_error_mid_reply_sends_apology() {
        let mut responder = MockResponder::new();
        responder.expect_respond().returning(|_| {
            Ok(stream::iter(vec![
                Ok("Partial ".to_string()),
                Err(anyhow::anyhow!("connection reset")),
            ])
            .boxed())
        });
        let state = Arc::new(AppState::new(quick_config(), Arc::new(responder)));
        let mut rx = state.subscribe();

        run_turn(state.clone(), "hi".to_string()).await;

        let events = drain(&mut rx);
        assert!(events.contains(&InboundEvent::AssistantStream {
            text: "Partial ".to_string()
        }));
        assert!(events.contains(&InboundEvent::AssistantFinal {
            text: APOLOGY.to_string()
        }));
        assert!(!state.is_speaking());
    }
}
