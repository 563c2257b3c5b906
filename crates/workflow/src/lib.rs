//! Tool chain engine: runs an ordered list of tool invocations, threading a
//! shared context map between them.
//!
//! Which tools to call is decided upstream. This crate only sees tool names
//! and JSON arguments and depends on [`tokenwise_core::ToolInvoker`] for the
//! actual calls.

pub mod chain;
pub mod orchestrator;
pub mod template;

pub use chain::{ChainError, ChainStatus, StepStatus, ToolChainResult, ToolStep, ToolStepSpec};
pub use orchestrator::{FailurePolicy, OrchestratorSettings, ToolChainOrchestrator};
