//! Streaming chat-completion contract
//!
//! The pipeline only depends on [`CompletionClient`]: given a message list and
//! an optional response format, it yields text deltas in order. Concrete
//! clients live in submodules:
//! - **replay**: scripted responses for offline runs and tests
//! - **claude** (feature `claude`): Claude agent query streams

pub mod replay;

#[cfg(feature = "claude")]
pub mod claude;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use workbench_sdk::async_trait;

pub use replay::{ReplayClient, ReplayRule};

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Structural constraint on the final JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Strict JSON schema
    JsonSchema {
        name: String,
        schema: serde_json::Value,
        #[serde(default = "default_strict")]
        strict: bool,
    },
    /// Any JSON object
    JsonObject,
}

fn default_strict() -> bool {
    true
}

/// One streaming completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub response_format: Option<ResponseFormat>,
    /// Cooperative cancellation; clients stop yielding once cancelled
    pub cancel: Option<CancellationToken>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            response_format: None,
            cancel: None,
        }
    }

    pub fn with_response_format(mut self, format: Option<ResponseFormat>) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Content of the first system message, if any
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Content of the last user message, if any
    pub fn user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// One streamed increment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionChunk {
    pub content: Option<String>,
}

impl CompletionChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            content: Some(delta.into()),
        }
    }
}

/// Errors raised by completion clients
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompletionError {
    #[error("completion transport failed: {0}")]
    Transport(String),

    #[error("completion cancelled")]
    Cancelled,
}

pub type CompletionStream = BoxStream<'static, Result<CompletionChunk, CompletionError>>;

/// Streaming chat-completion client
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Start a completion and return its delta stream
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, CompletionError>;
}

/// Drain a completion stream, calling `on_delta` for every non-empty delta.
///
/// Returns the accumulated text. Honours the request's cancellation token even
/// when the client itself does not.
pub async fn collect_text<F>(
    client: &dyn CompletionClient,
    request: CompletionRequest,
    mut on_delta: F,
) -> Result<String, CompletionError>
where
    F: FnMut(&str, &str),
{
    let cancel = request.cancel.clone().unwrap_or_else(CancellationToken::new);
    if cancel.is_cancelled() {
        return Err(CompletionError::Cancelled);
    }

    let mut stream = client.stream(request).await?;
    let mut text = String::new();
    let mut chunk_count = 0usize;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(CompletionError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let Some(delta) = chunk?.content else { continue };
        if delta.is_empty() {
            continue;
        }
        chunk_count += 1;
        text.push_str(&delta);
        on_delta(&delta, &text);
    }

    tracing::debug!(chunks = chunk_count, chars = text.len(), "completion stream finished");
    Ok(text)
}
