//! Assistant Responders
//!
//! The relay's "brain" is anything that turns a user prompt into a stream of
//! reply chunks. [`EchoResponder`] is the built-in one: it repeats the prompt
//! back a word at a time, which is enough to exercise streaming clients.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;

/// A stream of reply chunks. An `Err` item aborts the reply.
pub type ReplyStream = BoxStream<'static, anyhow::Result<String>>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Responder: Send + Sync {
    /// Starts answering `prompt`.
    async fn respond(&self, prompt: &str) -> anyhow::Result<ReplyStream>;
}

pub struct EchoResponder {
    chunk_delay: Duration,
}

impl EchoResponder {
    pub fn new(chunk_delay: Duration) -> Self {
        Self { chunk_delay }
    }
}

/// Splits `text` into words, each keeping the whitespace that follows it,
/// so the chunks concatenate back to `text`.
pub fn word_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_space = false;
    for c in text.chars() {
        if !c.is_whitespace() && in_space {
            chunks.push(std::mem::take(&mut current));
        }
        in_space = c.is_whitespace();
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl Responder for EchoResponder {
    async fn respond(&self, prompt: &str) -> anyhow::Result<ReplyStream> {
        let delay = self.chunk_delay;
        let chunks = word_chunks(&format!("You said: {prompt}"));
        Ok(stream::iter(chunks)
            .then(move |chunk| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(chunk)
            })
            .boxed())
    }
}
