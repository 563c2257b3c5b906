//! Error types for the tokenwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Collaborator failures
//! (completion, summarization, tools) carry their own enums so callers can
//! tell transient failures from permanent ones.

use thiserror::Error;

/// The top-level error type for all tokenwise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Collaborator errors ---
    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Budget errors ---
    #[error("Prompt needs {required} tokens but only {available} are available")]
    BudgetExceeded { required: usize, available: usize },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the opaque completion and summarization calls.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected by content policy: {0}")]
    ContentPolicy(String),

    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl CompletionError {
    /// Whether a retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Unavailable(_) => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            Self::ContentPolicy(_) | Self::Cancelled => false,
        }
    }
}

/// Failures of a single tool invocation.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool rate limited: {tool_name}")]
    RateLimited { tool_name: String },

    #[error("Tool temporarily unavailable: {tool_name} — {reason}")]
    Unavailable { tool_name: String, reason: String },

    #[error("Tool invocation cancelled: {0}")]
    Cancelled(String),
}

impl ToolError {
    /// Transient errors are retried by the orchestrator; everything else
    /// is recorded as a failure immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Unavailable { .. }
        )
    }

    /// Short machine-readable kind, used in chain error records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable { .. } => "unavailable",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_error_displays_correctly() {
        let err = Error::Completion(CompletionError::Api {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn budget_error_mentions_both_sides() {
        let err = Error::BudgetExceeded {
            required: 9000,
            available: 6000,
        };
        let msg = err.to_string();
        assert!(msg.contains("9000"));
        assert!(msg.contains("6000"));
    }

    #[test]
    fn transient_tool_errors_are_retryable() {
        assert!(
            ToolError::Timeout {
                tool_name: "scan".into(),
                timeout_secs: 5
            }
            .is_retryable()
        );
        assert!(
            ToolError::RateLimited {
                tool_name: "scan".into()
            }
            .is_retryable()
        );
        assert!(!ToolError::NotFound("scan".into()).is_retryable());
        assert!(!ToolError::InvalidArguments("missing id".into()).is_retryable());
        assert!(!ToolError::Cancelled("turn aborted".into()).is_retryable());
    }

    #[test]
    fn content_policy_is_not_retryable() {
        assert!(!CompletionError::ContentPolicy("blocked".into()).is_retryable());
        assert!(CompletionError::Timeout { timeout_secs: 30 }.is_retryable());
        assert!(
            CompletionError::Api {
                status_code: 503,
                message: "down".into()
            }
            .is_retryable()
        );
        assert!(
            !CompletionError::Api {
                status_code: 400,
                message: "bad".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn tool_error_kinds() {
        assert_eq!(ToolError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(ToolError::Cancelled("x".into()).kind(), "cancelled");
    }
}
