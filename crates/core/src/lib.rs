//! # tokenwise core
//!
//! Domain types, traits, and error definitions shared by every tokenwise
//! crate. Nothing in here performs I/O; the collaborators the engine talks
//! to (LLM completion, summarization, tool execution) are expressed as
//! traits so that the optimizers and the orchestrator can be driven by
//! mocks in tests and by real clients in production.
//!
//! ## Layout
//!
//! - [`message`]: conversation messages and conversations
//! - [`options`]: optimization option value objects (one set per agent type)
//! - [`llm`]: opaque completion and summarization contracts
//! - [`tool`]: the uniform "invoke tool by name" contract and a registry
//! - [`event`]: broadcast bus for optimization and orchestration events
//! - [`error`]: the error taxonomy

pub mod error;
pub mod event;
pub mod llm;
pub mod message;
pub mod options;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{CompletionError, Error, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use llm::{CompletionClient, CompletionRequest, CompletionResponse, Summarizer, Usage};
pub use message::{Conversation, ConversationId, Message, Role};
pub use options::{
    ComponentPriorities, HistoryOptimizationOptions, PromptOptimizationOptions, PruningStrategy,
    RagOptimizationOptions,
};
pub use tool::{Tool, ToolInvoker, ToolRegistry};
