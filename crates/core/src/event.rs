//! Domain events published while optimizing prompts and running tool chains.
//!
//! Subscribers (dashboards, audit sinks, tests) receive every event and
//! filter for what they care about. Publishing never blocks and never fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// Conversation history was pruned or summarized.
    HistoryOptimized {
        conversation_id: String,
        strategy: String,
        tokens_before: usize,
        tokens_after: usize,
        timestamp: DateTime<Utc>,
    },

    /// A prompt was assembled for a turn.
    PromptOptimized {
        conversation_id: String,
        strategy: String,
        tokens_saved: usize,
        over_budget: bool,
        timestamp: DateTime<Utc>,
    },

    /// A tool step reached a terminal status.
    ToolStepFinished {
        chain_id: String,
        step_index: usize,
        tool_name: String,
        status: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool chain reached a terminal status.
    ToolChainFinished {
        chain_id: String,
        conversation_id: String,
        status: String,
        success_rate: f64,
        timestamp: DateTime<Utc>,
    },

    /// A full turn finished and its metrics were recorded.
    TurnCompleted {
        conversation_id: String,
        agent_type: String,
        prompt_tokens: usize,
        completion_tokens: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
