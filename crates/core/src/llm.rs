//! Contracts for the two opaque LLM operations the engine depends on.
//!
//! The engine never talks to a model directly: prompt assembly produces a
//! message list, a [`CompletionClient`] turns it into text, and a
//! [`Summarizer`] compresses text to a bounded length. Both may fail with
//! transient (retryable) or permanent errors, see
//! [`CompletionError::is_retryable`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CompletionError;
use crate::message::Message;

/// A completion request built from an optimized prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "openai/gpt-4o")
    pub model: String,

    /// Prompt messages, system first, current user message last
    pub messages: Vec<Message>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text
    pub content: String,

    /// Token usage statistics, when the backend reports them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

/// `complete(prompt, model) -> text`.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Client name, for logs.
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, CompletionError>;
}

/// `summarize(text, maxTokens) -> text`.
///
/// Implementations should aim for `max_tokens`; callers still bound the
/// output themselves and must not rely on the implementation honouring it.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        text: &str,
        max_tokens: usize,
    ) -> std::result::Result<String, CompletionError>;
}

/// Summarize through a completion client with a fixed instruction prompt.
pub struct CompletionSummarizer<C: CompletionClient> {
    client: C,
    model: String,
}

impl<C: CompletionClient> CompletionSummarizer<C> {
    pub fn new(client: C, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn build_prompt(text: &str, max_tokens: usize) -> String {
        format!(
            "Summarize the following conversation excerpt in at most {max_tokens} tokens. \
             Keep decisions, resource names, identifiers, open questions and errors.\n\n{text}"
        )
    }
}

#[async_trait]
impl<C: CompletionClient> Summarizer for CompletionSummarizer<C> {
    async fn summarize(
        &self,
        text: &str,
        max_tokens: usize,
    ) -> std::result::Result<String, CompletionError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system("You are a precise summarizer."),
                Message::user(Self::build_prompt(text, max_tokens)),
            ],
            max_tokens: Some(u32::try_from(max_tokens).unwrap_or(u32::MAX)),
        };
        let response = self.client.complete(request).await?;
        Ok(response.content)
    }
}
