//! Optimization option value objects.
//!
//! One set of options exists per agent type; `tokenwise-config` looks them
//! up by agent type name. All structs deserialize from TOML with defaults
//! for any missing field, and all of them validate before use: an invalid
//! budget is a configuration error, never a silent zero-budget run.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How conversation history is reduced when it exceeds its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PruningStrategy {
    /// Drop the oldest droppable messages first.
    #[default]
    OldestFirst,
    /// Drop the messages least relevant to the current user message first.
    LowestRelevance,
    /// Collapse the oldest block into one synthetic summary message.
    Summarize,
    /// Discard everything before the most recent topic switch.
    TopicBoundary,
}

impl std::fmt::Display for PruningStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OldestFirst => write!(f, "oldest_first"),
            Self::LowestRelevance => write!(f, "lowest_relevance"),
            Self::Summarize => write!(f, "summarize"),
            Self::TopicBoundary => write!(f, "topic_boundary"),
        }
    }
}

/// Options for conversation history optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryOptimizationOptions {
    /// Token budget for the whole history.
    pub max_tokens: usize,
    /// Strategy used when the history is over budget.
    pub pruning_strategy: PruningStrategy,
    /// The most recent messages that are never dropped.
    pub min_messages_to_keep: usize,
    /// Upper bound for a synthetic summary message.
    pub summary_max_tokens: usize,
    /// Model name passed to the token counter. Empty means generic.
    pub model_name: String,
}

impl Default for HistoryOptimizationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            pruning_strategy: PruningStrategy::OldestFirst,
            min_messages_to_keep: 4,
            summary_max_tokens: 500,
            model_name: String::new(),
        }
    }
}

impl HistoryOptimizationOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::config("history max_tokens must be greater than 0"));
        }
        if self.summary_max_tokens == 0 {
            return Err(Error::config(
                "history summary_max_tokens must be greater than 0",
            ));
        }
        if self.pruning_strategy == PruningStrategy::Summarize
            && self.summary_max_tokens >= self.max_tokens
        {
            return Err(Error::config(format!(
                "summary_max_tokens ({}) must be smaller than max_tokens ({})",
                self.summary_max_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// Options for ranking and truncating retrieved context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagOptimizationOptions {
    /// Token budget for all selected results together.
    pub max_rag_tokens: usize,
    /// Results scoring below this are discarded.
    pub min_relevance_score: f64,
    /// Upper bound on the number of selected results.
    pub max_results: usize,
    /// Truncate a result that does not fit instead of skipping it.
    pub trim_large_results: bool,
}

impl Default for RagOptimizationOptions {
    fn default() -> Self {
        Self {
            max_rag_tokens: 2000,
            min_relevance_score: 0.3,
            max_results: 5,
            trim_large_results: true,
        }
    }
}

impl RagOptimizationOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_rag_tokens == 0 {
            return Err(Error::config("max_rag_tokens must be greater than 0"));
        }
        if self.max_results == 0 {
            return Err(Error::config("max_results must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.min_relevance_score) {
            return Err(Error::config(format!(
                "min_relevance_score must be within [0, 1], got {}",
                self.min_relevance_score
            )));
        }
        Ok(())
    }
}

/// Trim priority per prompt component, 0–100. Lower is trimmed first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentPriorities {
    pub system_prompt: u8,
    /// Informational only: the user message is never trimmed.
    pub user_message: u8,
    pub rag_context: u8,
    pub conversation_history: u8,
}

impl Default for ComponentPriorities {
    fn default() -> Self {
        Self {
            system_prompt: 90,
            user_message: 100,
            rag_context: 60,
            conversation_history: 40,
        }
    }
}

/// Options for assembling a prompt into a model's context window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOptimizationOptions {
    pub model_name: String,
    /// Input + output token limit of the model.
    pub max_context_window: usize,
    /// Tokens kept free for the completion.
    pub reserved_completion_tokens: usize,
    pub priorities: ComponentPriorities,
    /// RAG results never trimmed below this count.
    pub min_rag_context_items: usize,
    /// History never trimmed below this many recent messages.
    pub min_conversation_history_messages: usize,
    /// Percentage of the context window held back as slack for estimation error.
    pub safety_buffer_percentage: f64,
    /// Allow summarization of history and, as a last resort, the system prompt.
    pub use_summarization: bool,
    /// Strategy used for the history tier when summarization is off.
    pub history_pruning_strategy: PruningStrategy,
    /// Upper bound for summaries produced while trimming.
    pub summary_max_tokens: usize,
}

impl Default for PromptOptimizationOptions {
    fn default() -> Self {
        Self {
            model_name: "openai/gpt-4o".into(),
            max_context_window: 8192,
            reserved_completion_tokens: 1024,
            priorities: ComponentPriorities::default(),
            min_rag_context_items: 1,
            min_conversation_history_messages: 2,
            safety_buffer_percentage: 5.0,
            use_summarization: true,
            history_pruning_strategy: PruningStrategy::OldestFirst,
            summary_max_tokens: 500,
        }
    }
}

impl PromptOptimizationOptions {
    /// Tokens held back as safety buffer (rounded down).
    pub fn safety_buffer_tokens(&self) -> usize {
        (self.max_context_window as f64 * self.safety_buffer_percentage / 100.0).floor() as usize
    }

    /// `max_context_window − reserved_completion_tokens − safety buffer`.
    pub fn available_budget(&self) -> usize {
        self.max_context_window
            .saturating_sub(self.reserved_completion_tokens)
            .saturating_sub(self.safety_buffer_tokens())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_context_window == 0 {
            return Err(Error::config("max_context_window must be greater than 0"));
        }
        if self.reserved_completion_tokens >= self.max_context_window {
            return Err(Error::config(format!(
                "reserved_completion_tokens ({}) must be smaller than max_context_window ({})",
                self.reserved_completion_tokens, self.max_context_window
            )));
        }
        if !(0.0..100.0).contains(&self.safety_buffer_percentage) {
            return Err(Error::config(format!(
                "safety_buffer_percentage must be within [0, 100), got {}",
                self.safety_buffer_percentage
            )));
        }
        let p = &self.priorities;
        if [
            p.system_prompt,
            p.user_message,
            p.rag_context,
            p.conversation_history,
        ]
        .iter()
        .any(|v| *v > 100)
        {
            return Err(Error::config("component priorities must be within 0–100"));
        }
        if self.summary_max_tokens == 0 {
            return Err(Error::config("summary_max_tokens must be greater than 0"));
        }
        if self.available_budget() == 0 {
            return Err(Error::config(
                "no prompt budget left after reserved completion tokens and safety buffer",
            ));
        }
        Ok(())
    }
}
