//! Scripted completion client
//!
//! Replies are picked by the first rule whose substring filters match the
//! request's system and user prompts. Rule sets can be loaded from YAML so the
//! CLI can replay a recorded session without network access.

use futures::stream;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use workbench_sdk::async_trait;

use super::{CompletionChunk, CompletionClient, CompletionError, CompletionRequest, CompletionStream};

/// One scripted reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayRule {
    /// Only match requests whose system prompt contains this text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_contains: Option<String>,
    /// Only match requests whose user prompt contains this text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_contains: Option<String>,
    /// Full reply text
    #[serde(default)]
    pub response: String,
    /// Split the reply into deltas of this many characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    /// Fail the stream with this transport error after the reply is sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
}

impl ReplayRule {
    /// Rule matching every request
    pub fn reply(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Default::default()
        }
    }

    pub fn when_system(mut self, text: impl Into<String>) -> Self {
        self.system_contains = Some(text.into());
        self
    }

    pub fn when_user(mut self, text: impl Into<String>) -> Self {
        self.user_contains = Some(text.into());
        self
    }

    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    pub fn failing(mut self, error: impl Into<String>) -> Self {
        self.fail = Some(error.into());
        self
    }

    fn matches(&self, request: &CompletionRequest) -> bool {
        let contains = |filter: &Option<String>, text: Option<&str>| match filter {
            Some(needle) => text.map_or(false, |t| t.contains(needle.as_str())),
            None => true,
        };
        contains(&self.system_contains, request.system_prompt())
            && contains(&self.user_contains, request.user_prompt())
    }

    fn chunks(&self) -> Vec<String> {
        let Some(size) = self.chunk_size else {
            return vec![self.response.clone()];
        };
        let chars: Vec<char> = self.response.chars().collect();
        chars
            .chunks(size)
            .map(|chunk| chunk.iter().collect())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ReplayFile {
    rules: Vec<ReplayRule>,
}

/// Completion client answering from a fixed rule list
#[derive(Debug, Default)]
pub struct ReplayClient {
    rules: Vec<ReplayRule>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ReplayClient {
    pub fn new(rules: Vec<ReplayRule>) -> Self {
        Self {
            rules,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Load rules from a YAML file with a top-level `rules:` list
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file: {}", path.display()))?;
        let file: ReplayFile = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse replay file: {}", path.display()))?;
        Ok(Self::new(file.rules))
    }

    /// Number of `stream` calls received so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in arrival order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl CompletionClient for ReplayClient {
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let rule = self.rules.iter().find(|rule| rule.matches(&request)).cloned();
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }

        let rule = rule.ok_or_else(|| {
            CompletionError::Transport("no replay rule matches the request".to_string())
        })?;

        let mut items: Vec<Result<CompletionChunk, CompletionError>> = rule
            .chunks()
            .into_iter()
            .map(|chunk| Ok(CompletionChunk::text(chunk)))
            .collect();
        if let Some(error) = rule.fail {
            items.push(Err(CompletionError::Transport(error)));
        }

        Ok(Box::pin(stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_rule_matching_by_prompt_text() {
        let rule = ReplayRule::reply("ok")
            .when_system("data analyst")
            .when_user("Hypothesis: churn");

        assert!(rule.matches(&CompletionRequest::new(
            "You are an expert data analyst.",
            "Hypothesis: churn is higher for young users"
        )));
        assert!(!rule.matches(&CompletionRequest::new(
            "You are an expert data analyst.",
            "Hypothesis: tenure"
        )));
    }

    #[test]
    fn test_chunking_preserves_text() {
        let rule = ReplayRule::reply("héllo wörld").chunked(4);
        let chunks = rule.chunks();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), "héllo wörld");
    }

    #[tokio::test]
    async fn test_failing_rule_ends_with_error() {
        let client = ReplayClient::new(vec![ReplayRule::reply("partial").failing("reset")]);
        let mut stream = client
            .stream(CompletionRequest::new("s", "u"))
            .await
            .unwrap();

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unmatched_request_is_transport_error() {
        let client = ReplayClient::new(vec![ReplayRule::reply("x").when_system("nope")]);
        let result = client.stream(CompletionRequest::new("s", "u")).await;

        assert!(matches!(result, Err(CompletionError::Transport(_))));
        assert_eq!(client.call_count(), 1);
        assert_eq!(client.requests().len(), 1);
    }

    #[test]
    fn test_yaml_rules() {
        let yaml = r######"
rules:
  - system_contains: "expert data analyst"
    response: "##### Churn is higher"
    chunk_size: 5
  - response: "fallback"
"######;
        let file: ReplayFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.rules.len(), 2);
        assert_eq!(file.rules[0].chunk_size, Some(5));
        assert!(file.rules[1].system_contains.is_none());
        assert_eq!(file.rules[0].response, "##### Churn is higher");
    }
}
