//! Completion client backed by Claude agent query streams

use claude_agent_sdk::{query, ClaudeAgentOptions, ContentBlock, Message, SystemPrompt};
use futures::StreamExt;
use workbench_sdk::async_trait;

use super::{
    CompletionChunk, CompletionClient, CompletionError, CompletionRequest, CompletionStream,
    ResponseFormat, Role,
};

/// Streams assistant text blocks from a tool-less Claude agent session
#[derive(Debug, Clone, Default)]
pub struct ClaudeCompletionClient;

impl ClaudeCompletionClient {
    pub fn new() -> Self {
        Self
    }

    /// Tool-less agent whose system prompt is exactly the request's
    fn options(request: &CompletionRequest) -> ClaudeAgentOptions {
        ClaudeAgentOptions {
            system_prompt: request
                .system_prompt()
                .map(|prompt| SystemPrompt::String(prompt.to_string())),
            allowed_tools: Vec::new(),
            ..Default::default()
        }
    }

    /// The agent API takes one prompt; user turns are joined and the
    /// response format is stated in words.
    fn prompt_text(request: &CompletionRequest) -> String {
        let mut prompt = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        match &request.response_format {
            Some(ResponseFormat::JsonSchema { schema, .. }) => {
                prompt.push_str(&format!(
                    "\n\nRespond with a single JSON document (no code fences) matching this JSON schema:\n{}",
                    schema
                ));
            }
            Some(ResponseFormat::JsonObject) => {
                prompt.push_str("\n\nRespond with a single JSON object and nothing else.");
            }
            None => {}
        }
        prompt
    }
}

#[async_trait]
impl CompletionClient for ClaudeCompletionClient {
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, CompletionError> {
        let options = Self::options(&request);
        let prompt = Self::prompt_text(&request);
        let messages = query(&prompt, Some(options))
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let deltas = async_stream::stream! {
            let mut messages = Box::pin(messages);
            while let Some(message) = messages.next().await {
                match message {
                    Ok(Message::Assistant { message, .. }) => {
                        for block in &message.content {
                            if let ContentBlock::Text { text } = block {
                                yield Ok(CompletionChunk::text(text.clone()));
                            }
                        }
                    }
                    Ok(Message::Result { .. }) => break,
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(CompletionError::Transport(e.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(deltas))
    }
}
