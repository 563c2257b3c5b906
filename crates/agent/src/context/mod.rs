//! Token-budgeted context assembly.
//!
//! | Module | Does |
//! |--------|------|
//! | [`token`] | token estimation and budget-bounded truncation |
//! | [`relevance`] | lexical relevance scoring |
//! | [`rag`] | ranking and selecting retrieved documents |
//! | [`history`] | conversation health, pruning and summarization |
//! | [`prompt`] | fitting all components into the context window |

pub mod history;
pub mod prompt;
pub mod rag;
pub mod relevance;
pub mod token;

pub use history::{
    BoundedSummary, ConversationHealthMetrics, ConversationHistoryOptimizer,
    OptimizedConversationHistory, TopicSwitch,
};
pub use prompt::{OptimizedPrompt, PromptInput, PromptOptimizer, TokenEstimate};
pub use rag::{
    OptimizedRagContext, RAG_SECTION_HEADING, RagContextOptimizer, RankedSearchResult,
    RetrievedDocument, render_rag, render_rag_item, rendered_rag_tokens,
};
pub use relevance::RelevanceScorer;
pub use token::{
    HeuristicTokenCounter, MESSAGE_OVERHEAD_TOKENS, TokenCounter, estimate_message_tokens,
    estimate_messages_tokens, truncate_to_tokens,
};
