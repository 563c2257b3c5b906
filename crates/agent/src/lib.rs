//! Token-aware conversation handling.
//!
//! A turn flows through the pieces of this crate in order:
//!
//! 1. **Health**: [`ConversationHistoryOptimizer`] compares the stored
//!    history against the profile's history budget
//! 2. **History**: prune or summarize when the threshold is crossed
//! 3. **Retrieval**: [`RagContextOptimizer`] filters and selects results
//! 4. **Prompt**: [`PromptOptimizer`] fits everything into the context window
//! 5. **Completion**, then the tool chain (`tokenwise-workflow`)
//! 6. **Suggestions**: [`ProactiveSuggestionGenerator`]
//! 7. **Cost**: recorded in `tokenwise-telemetry`
//!
//! [`TurnPipeline`] wires these together per conversation.

pub mod context;
pub mod suggestions;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{
    ConversationHealthMetrics, ConversationHistoryOptimizer, HeuristicTokenCounter,
    OptimizedConversationHistory, OptimizedPrompt, OptimizedRagContext, PromptInput,
    PromptOptimizer, RagContextOptimizer, RankedSearchResult, RelevanceScorer, RetrievedDocument,
    TokenCounter, TokenEstimate,
};
pub use suggestions::{
    ProactiveSuggestion, ProactiveSuggestionGenerator, SuggestionContext, SuggestionPriority,
};
pub use turn::{ConversationState, TurnOutcome, TurnPipeline, TurnRequest};
