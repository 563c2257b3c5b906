//! The per-turn pipeline.
//!
//! One turn runs: health check, history optimization, RAG selection, prompt
//! assembly, completion, tool chain, suggestions, cost recording. Turns on
//! the same conversation are serialized by a per-conversation lock; turns on
//! different conversations run concurrently.
//!
//! History optimization only shapes what is sent. The stored conversation
//! keeps every message and only ever grows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokenwise_config::AppConfig;
use tokenwise_core::{
    CompletionClient, CompletionRequest, Conversation, ConversationId, DomainEvent, Error,
    EventBus, Message, Result, Summarizer, ToolInvoker,
};
use tokenwise_telemetry::{AgentCostMetrics, CostTracker, TurnUsage};
use tokenwise_workflow::{
    OrchestratorSettings, StepStatus, ToolChainOrchestrator, ToolChainResult, ToolStepSpec,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::history::{ConversationHealthMetrics, ConversationHistoryOptimizer};
use crate::context::prompt::{OptimizedPrompt, PromptInput, PromptOptimizer};
use crate::context::rag::{RagContextOptimizer, RankedSearchResult};
use crate::context::relevance::RelevanceScorer;
use crate::context::token::{HeuristicTokenCounter, TokenCounter};
use crate::suggestions::{ProactiveSuggestion, ProactiveSuggestionGenerator, SuggestionContext};

/// Everything kept per conversation between turns.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub conversation: Conversation,
    pub last_chain: Option<ToolChainResult>,
}

impl ConversationState {
    fn new(conversation_id: &str) -> Self {
        Self {
            conversation: Conversation::with_id(ConversationId::from(conversation_id)),
            last_chain: None,
        }
    }
}

/// Input for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    /// Selects the optimization profile.
    pub agent_type: String,
    pub task_id: String,
    pub system_prompt: String,
    pub user_message: String,
    /// Retrieval results for this turn, unfiltered.
    pub rag_results: Vec<RankedSearchResult>,
    /// Tool steps decided upstream. Empty means no chain runs.
    pub tool_steps: Vec<ToolStepSpec>,
}

impl TurnRequest {
    pub fn new(
        conversation_id: impl Into<String>,
        agent_type: impl Into<String>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            agent_type: agent_type.into(),
            task_id: uuid::Uuid::new_v4().to_string(),
            system_prompt: String::new(),
            user_message: user_message.into(),
            rag_results: Vec::new(),
            tool_steps: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_rag_results(mut self, results: Vec<RankedSearchResult>) -> Self {
        self.rag_results = results;
        self
    }

    pub fn with_tool_steps(mut self, steps: Vec<ToolStepSpec>) -> Self {
        self.tool_steps = steps;
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }
}

/// What a turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub prompt: OptimizedPrompt,
    /// Health of the stored history before this turn.
    pub health: ConversationHealthMetrics,
    pub chain: Option<ToolChainResult>,
    pub suggestions: Vec<ProactiveSuggestion>,
    pub metrics: AgentCostMetrics,
}

pub struct TurnPipeline {
    config: AppConfig,
    counter: Arc<dyn TokenCounter>,
    history: Arc<ConversationHistoryOptimizer>,
    rag: Arc<RagContextOptimizer>,
    prompt: PromptOptimizer,
    orchestrator: ToolChainOrchestrator,
    suggestions: ProactiveSuggestionGenerator,
    completion: Arc<dyn CompletionClient>,
    costs: Arc<CostTracker>,
    events: Arc<EventBus>,
    conversations: Mutex<HashMap<String, Arc<tokio::sync::Mutex<ConversationState>>>>,
}

impl TurnPipeline {
    pub fn new(
        config: AppConfig,
        completion: Arc<dyn CompletionClient>,
        tools: Arc<dyn ToolInvoker>,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Self {
        let counter: Arc<dyn TokenCounter> = Arc::new(HeuristicTokenCounter::new());
        let scorer = RelevanceScorer::from_config(&config.optimization);

        let mut history =
            ConversationHistoryOptimizer::from_config(counter.clone(), &config.optimization);
        if let Some(summarizer) = summarizer {
            history = history.with_summarizer(summarizer);
        }
        let history = Arc::new(history);
        let rag = Arc::new(
            RagContextOptimizer::new(counter.clone(), scorer.clone())
                .with_model(config.default_model.clone()),
        );
        let prompt = PromptOptimizer::new(counter.clone(), history.clone(), rag.clone());

        let events = Arc::new(EventBus::default());
        let orchestrator = ToolChainOrchestrator::new(
            tools,
            OrchestratorSettings::from_config(&config.orchestrator),
        )
        .with_event_bus(events.clone());
        let costs = Arc::new(CostTracker::from_config(
            &config.telemetry,
            config.optimization.count_summary_tokens,
        ));

        Self {
            counter,
            history,
            rag,
            prompt,
            orchestrator,
            suggestions: ProactiveSuggestionGenerator::new(scorer),
            completion,
            costs,
            events,
            conversations: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn costs(&self) -> Arc<CostTracker> {
        self.costs.clone()
    }

    /// Seed a conversation from stored history, replacing any in-memory one.
    pub async fn load_conversation(&self, conversation: Conversation) {
        let id = conversation.id.0.clone();
        let slot = self.slot(&id);
        let mut state = slot.lock().await;
        state.conversation = conversation;
        state.last_chain = None;
    }

    /// Snapshot of a conversation, waiting for any running turn on it.
    pub async fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        let slot = self
            .conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned()?;
        let state = slot.lock().await;
        Some(state.conversation.clone())
    }

    /// Drop a conversation's in-memory state.
    pub fn end_conversation(&self, conversation_id: &str) -> bool {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conversation_id)
            .is_some()
    }

    fn slot(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<ConversationState>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(ConversationState::new(conversation_id)))
            })
            .clone()
    }

    /// Run one turn.
    ///
    /// Cancellation before the completion returns leaves the conversation
    /// untouched. An over-budget prompt is refused with
    /// [`Error::BudgetExceeded`] and never sent.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let profile = self.config.profile(&request.agent_type).clone();
        let model = if profile.prompt.model_name.is_empty() {
            self.config.default_model.clone()
        } else {
            profile.prompt.model_name.clone()
        };
        let conversation_id = request.conversation_id.clone();

        let slot = self.slot(&conversation_id);
        let mut state = slot.lock().await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(format!(
                "turn on conversation {conversation_id} cancelled before start"
            )));
        }
        debug!(
            conversation_id = %conversation_id,
            agent_type = %request.agent_type,
            model = %model,
            "Starting turn"
        );

        // 1. Health and history
        let mut history_opts = profile.history.clone();
        history_opts.model_name = model.clone();
        let stored = &state.conversation.messages;
        let health = self
            .history
            .evaluate_messages(stored, history_opts.max_tokens, &model);

        let mut history_saved = 0;
        let mut summarization_tokens = 0;
        let history = if health.needs_optimization {
            let out = self
                .history
                .optimize_history_for(stored, &request.user_message, &history_opts, cancel)
                .await?;
            history_saved = out.original_tokens.saturating_sub(out.optimized_tokens);
            summarization_tokens += out.summarization_tokens;
            if out.was_pruned() {
                self.events.publish(DomainEvent::HistoryOptimized {
                    conversation_id: conversation_id.clone(),
                    strategy: out.label(),
                    tokens_before: out.original_tokens,
                    tokens_after: out.optimized_tokens,
                    timestamp: Utc::now(),
                });
            }
            out.messages
        } else {
            stored.clone()
        };

        // 2. Retrieval context
        let rag_input_tokens: usize = request.rag_results.iter().map(|r| r.token_count).sum();
        let rag = self.rag.optimize_context(request.rag_results, &profile.rag)?;
        let rag_saved = rag_input_tokens.saturating_sub(rag.total_tokens_used);

        // 3. Prompt
        let mut prompt_opts = profile.prompt.clone();
        prompt_opts.model_name = model.clone();
        let prompt = self
            .prompt
            .optimize_prompt(
                PromptInput {
                    system_prompt: request.system_prompt,
                    user_message: request.user_message.clone(),
                    rag_context: rag.results,
                    history,
                },
                &prompt_opts,
                cancel,
            )
            .await?;
        summarization_tokens += prompt.summarization_tokens;
        self.events.publish(DomainEvent::PromptOptimized {
            conversation_id: conversation_id.clone(),
            strategy: prompt.optimization_strategy.clone(),
            tokens_saved: prompt.tokens_saved,
            over_budget: prompt.over_budget,
            timestamp: Utc::now(),
        });
        prompt.ensure_within_budget()?;

        // 4. Completion
        let completion_request = CompletionRequest {
            model: model.clone(),
            messages: prompt.to_messages(),
            max_tokens: Some(
                u32::try_from(prompt_opts.reserved_completion_tokens).unwrap_or(u32::MAX),
            ),
        };
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(conversation_id = %conversation_id, "Turn cancelled during completion");
                return Err(Error::Cancelled(format!(
                    "turn on conversation {conversation_id} cancelled during completion"
                )));
            }
            res = self.completion.complete(completion_request) => res?,
        };

        let user_msg = Message::user(request.user_message);
        let assistant_msg = Message::assistant(response.content.clone());
        state.conversation.push(user_msg.clone());
        state.conversation.push(assistant_msg.clone());

        // 5. Tool chain
        let chain = if request.tool_steps.is_empty() {
            None
        } else {
            let chain = self
                .orchestrator
                .execute_chain(request.tool_steps, &conversation_id, cancel)
                .await;
            for step in chain.steps.iter().filter(|s| s.status == StepStatus::Completed) {
                if let Some(result) = &step.result {
                    state
                        .conversation
                        .push(Message::tool_output(&step.tool_name, result.to_string()));
                }
            }
            state.last_chain = Some(chain.clone());
            Some(chain)
        };

        // 6. Suggestions over what the model saw plus this exchange
        let mut visible = prompt.conversation_history.clone();
        visible.push(user_msg);
        visible.push(assistant_msg);
        let suggestions = self.suggestions.generate(
            &conversation_id,
            &SuggestionContext {
                messages: &visible,
                chain: chain.as_ref(),
            },
        );

        // 7. Cost
        let completion_tokens = response
            .usage
            .map(|u| u.completion_tokens as usize)
            .unwrap_or_else(|| self.counter.count(&response.content, &model));
        let metrics = self.costs.price_turn(TurnUsage {
            agent_type: request.agent_type.clone(),
            task_id: request.task_id,
            conversation_id: conversation_id.clone(),
            model,
            original_prompt_tokens: prompt.original_estimate.total + history_saved + rag_saved,
            optimized_prompt_tokens: prompt.optimized_estimate.total,
            completion_tokens,
            summarization_tokens,
        });
        self.costs.record_turn(metrics.clone());
        self.events.publish(DomainEvent::TurnCompleted {
            conversation_id: conversation_id.clone(),
            agent_type: request.agent_type,
            prompt_tokens: metrics.optimized_prompt_tokens,
            completion_tokens,
            timestamp: Utc::now(),
        });

        info!(
            conversation_id = %conversation_id,
            strategy = %prompt.optimization_strategy,
            tokens_saved = metrics.tokens_saved,
            chain_status = %chain.as_ref().map(|c| c.status.to_string()).unwrap_or_default(),
            suggestions = suggestions.len(),
            "Turn completed"
        );

        Ok(TurnOutcome {
            response: response.content,
            prompt,
            health,
            chain,
            suggestions,
            metrics,
        })
    }
}
