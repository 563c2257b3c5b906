//! Prompt assembly under a context-window budget.
//!
//! # Budget
//!
//! `available = max_context_window − reserved_completion_tokens − safety buffer`
//!
//! # Trimming order
//!
//! When the components exceed the budget, tiers are trimmed in ascending
//! priority order (equal priorities: history, then RAG, then system prompt).
//! Each tier is asked to shrink by exactly the current overflow:
//!
//! | Tier | How | Floor |
//! |------|-----|-------|
//! | History | delegated to the history optimizer | `min_conversation_history_messages` |
//! | RAG | kept in rank order, last one cut | `min_rag_context_items` |
//! | System prompt | summarized (only with `use_summarization`) | none |
//!
//! Estimates count components as [`OptimizedPrompt::to_messages`] renders
//! them, so the RAG tier includes its heading, labels, and titles.
//!
//! The user message is never touched. If the floors keep the prompt above
//! budget, the result carries `over_budget = true` and callers must refuse
//! to send it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokenwise_core::{
    Error, HistoryOptimizationOptions, Message, PromptOptimizationOptions, PruningStrategy,
    Result,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::history::ConversationHistoryOptimizer;
use crate::context::rag::{
    RAG_SECTION_HEADING, RagContextOptimizer, RankedSearchResult, render_rag, rendered_rag_tokens,
};
use crate::context::token::{MESSAGE_OVERHEAD_TOKENS, TokenCounter, estimate_messages_tokens};

/// The raw components of a prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptInput {
    pub system_prompt: String,
    pub user_message: String,
    /// Already selected and ordered retrieval results.
    pub rag_context: Vec<RankedSearchResult>,
    pub history: Vec<Message>,
}

/// Token estimate per component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub system: usize,
    pub user: usize,
    pub rag: usize,
    pub history: usize,
    pub total: usize,
}

/// What was actually sent, and how it got there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedPrompt {
    pub system_prompt: String,
    pub user_message: String,
    pub rag_context: Vec<RankedSearchResult>,
    pub conversation_history: Vec<Message>,
    pub original_estimate: TokenEstimate,
    pub optimized_estimate: TokenEstimate,
    pub available_budget: usize,
    pub tokens_saved: usize,
    pub was_optimized: bool,
    /// The optimized prompt still exceeds `available_budget`.
    pub over_budget: bool,
    /// Applied steps joined with `+`, e.g. `history-pruned+rag-trimmed`.
    pub optimization_strategy: String,
    /// Tokens spent on summarization while trimming.
    pub summarization_tokens: usize,
}

impl OptimizedPrompt {
    /// Refuse an over-budget prompt.
    pub fn ensure_within_budget(&self) -> Result<()> {
        if self.over_budget {
            return Err(Error::BudgetExceeded {
                required: self.optimized_estimate.total,
                available: self.available_budget,
            });
        }
        Ok(())
    }

    /// Render as completion messages: system prompt with the RAG section,
    /// then history, then the user message.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut system = self.system_prompt.clone();
        if !self.rag_context.is_empty() {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(RAG_SECTION_HEADING);
            system.push_str(&render_rag(&self.rag_context));
        }

        let mut out = Vec::with_capacity(self.conversation_history.len() + 2);
        if !system.is_empty() {
            out.push(Message::system(system));
        }
        out.extend(self.conversation_history.iter().cloned());
        out.push(Message::user(self.user_message.clone()));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    History,
    Rag,
    System,
}

pub struct PromptOptimizer {
    counter: Arc<dyn TokenCounter>,
    history: Arc<ConversationHistoryOptimizer>,
    rag: Arc<RagContextOptimizer>,
}

impl PromptOptimizer {
    pub fn new(
        counter: Arc<dyn TokenCounter>,
        history: Arc<ConversationHistoryOptimizer>,
        rag: Arc<RagContextOptimizer>,
    ) -> Self {
        Self {
            counter,
            history,
            rag,
        }
    }

    /// Token estimate of each component for `model`.
    ///
    /// The sum is never below the estimate of the rendered messages. The
    /// RAG tier carries its own heading, and the message overhead when the
    /// system prompt is empty.
    pub fn estimate(
        &self,
        system_prompt: &str,
        user_message: &str,
        rag: &[RankedSearchResult],
        history: &[Message],
        model: &str,
    ) -> TokenEstimate {
        let system = if system_prompt.is_empty() {
            0
        } else {
            MESSAGE_OVERHEAD_TOKENS + self.counter.count(system_prompt, model)
        };
        let user = MESSAGE_OVERHEAD_TOKENS + self.counter.count(user_message, model);
        let rag = if rag.is_empty() {
            0
        } else {
            self.rag_framing(system_prompt, model)
                + rendered_rag_tokens(self.counter.as_ref(), rag, model)
        };
        let history = estimate_messages_tokens(self.counter.as_ref(), history, model);
        TokenEstimate {
            system,
            user,
            rag,
            history,
            total: system + user + rag + history,
        }
    }

    /// Fit the prompt into the model's context window.
    ///
    /// Only invalid options are errors; an unreachable budget is reported
    /// through `over_budget`.
    pub async fn optimize_prompt(
        &self,
        input: PromptInput,
        options: &PromptOptimizationOptions,
        cancel: &CancellationToken,
    ) -> Result<OptimizedPrompt> {
        options.validate()?;
        let model = options.model_name.as_str();
        let budget = options.available_budget();

        let PromptInput {
            mut system_prompt,
            user_message,
            rag_context: mut rag,
            mut history,
        } = input;

        let original = self.estimate(&system_prompt, &user_message, &rag, &history, model);
        let mut steps: Vec<&'static str> = Vec::new();
        let mut summarization_tokens = 0;

        if original.total > budget {
            debug!(
                total = original.total,
                budget,
                system = original.system,
                user = original.user,
                rag = original.rag,
                history = original.history,
                "Prompt over budget, trimming"
            );

            let p = &options.priorities;
            let mut tiers = vec![
                (p.conversation_history, Tier::History),
                (p.rag_context, Tier::Rag),
                (p.system_prompt, Tier::System),
            ];
            tiers.sort_by_key(|(priority, _)| *priority);

            for (_, tier) in tiers {
                let current = self.estimate(&system_prompt, &user_message, &rag, &history, model);
                if current.total <= budget {
                    break;
                }
                let overflow = current.total - budget;

                match tier {
                    Tier::History => {
                        if history.is_empty() {
                            continue;
                        }
                        let target = current.history.saturating_sub(overflow).max(1);
                        let hist_opts = self.history_options(options, target);
                        let out = self
                            .history
                            .optimize_history_for(&history, &user_message, &hist_opts, cancel)
                            .await?;
                        summarization_tokens += out.summarization_tokens;
                        if out.optimized_tokens < current.history {
                            steps.push(if out.summary.is_some() {
                                "history-summarized"
                            } else {
                                "history-pruned"
                            });
                            history = out.messages;
                        }
                    }
                    Tier::Rag => {
                        if rag.is_empty() {
                            continue;
                        }
                        let target = current
                            .rag
                            .saturating_sub(overflow)
                            .saturating_sub(self.rag_framing(&system_prompt, model));
                        let ctx = self.rag.shrink_to_budget(
                            &rag,
                            target,
                            options.min_rag_context_items,
                            true,
                            model,
                        );
                        let shrunk = self
                            .estimate(&system_prompt, "", &ctx.results, &[], model)
                            .rag;
                        if shrunk < current.rag {
                            steps.push("rag-trimmed");
                            rag = ctx.results;
                        }
                    }
                    Tier::System => {
                        if !options.use_summarization || system_prompt.is_empty() {
                            continue;
                        }
                        let target = current
                            .system
                            .saturating_sub(overflow)
                            .saturating_sub(MESSAGE_OVERHEAD_TOKENS);
                        if target == 0 {
                            continue;
                        }
                        if let Some(summary) = self
                            .history
                            .summarize_text(&system_prompt, target, model, cancel)
                            .await
                        {
                            summarization_tokens += summary.tokens_spent;
                            if MESSAGE_OVERHEAD_TOKENS + self.counter.count(&summary.text, model)
                                < current.system
                            {
                                steps.push("system-summarized");
                                system_prompt = summary.text;
                            }
                        }
                    }
                }
            }
        }

        let optimized = self.estimate(&system_prompt, &user_message, &rag, &history, model);
        let over_budget = optimized.total > budget;
        let tokens_saved = original.total.saturating_sub(optimized.total);
        let strategy = if steps.is_empty() {
            "none".to_string()
        } else {
            steps.join("+")
        };

        if over_budget {
            warn!(
                total = optimized.total,
                budget,
                user = optimized.user,
                strategy = %strategy,
                "Prompt remains over budget after trimming"
            );
        } else if tokens_saved > 0 {
            info!(
                tokens_before = original.total,
                tokens_after = optimized.total,
                tokens_saved,
                strategy = %strategy,
                "Optimized prompt"
            );
        }

        Ok(OptimizedPrompt {
            system_prompt,
            user_message,
            rag_context: rag,
            conversation_history: history,
            original_estimate: original,
            optimized_estimate: optimized,
            available_budget: budget,
            tokens_saved,
            was_optimized: tokens_saved > 0,
            over_budget,
            optimization_strategy: strategy,
            summarization_tokens,
        })
    }

    /// Tokens the RAG section adds on top of its items.
    fn rag_framing(&self, system_prompt: &str, model: &str) -> usize {
        if system_prompt.is_empty() {
            MESSAGE_OVERHEAD_TOKENS + self.counter.count(RAG_SECTION_HEADING, model)
        } else {
            self.counter.count(&format!("\n\n{RAG_SECTION_HEADING}"), model)
        }
    }

    fn history_options(
        &self,
        options: &PromptOptimizationOptions,
        target: usize,
    ) -> HistoryOptimizationOptions {
        let mut strategy = if options.use_summarization && self.history.has_summarizer() {
            PruningStrategy::Summarize
        } else {
            options.history_pruning_strategy
        };
        let summary_max_tokens = options.summary_max_tokens.min(target / 2);
        if strategy == PruningStrategy::Summarize && summary_max_tokens == 0 {
            strategy = PruningStrategy::OldestFirst;
        }
        HistoryOptimizationOptions {
            max_tokens: target,
            pruning_strategy: strategy,
            min_messages_to_keep: options.min_conversation_history_messages,
            summary_max_tokens: summary_max_tokens.max(1),
            model_name: options.model_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::relevance::RelevanceScorer;
    use crate::context::rag::RetrievedDocument;
    use crate::context::token::HeuristicTokenCounter;
    use crate::test_helpers::FixedSummarizer;
    use tokenwise_core::{ComponentPriorities, Role};

    fn counter() -> Arc<dyn TokenCounter> {
        Arc::new(HeuristicTokenCounter::new())
    }

    fn optimizer_with(history: ConversationHistoryOptimizer) -> PromptOptimizer {
        let c = counter();
        PromptOptimizer::new(
            c.clone(),
            Arc::new(history),
            Arc::new(RagContextOptimizer::new(c, RelevanceScorer::default())),
        )
    }

    fn optimizer() -> PromptOptimizer {
        optimizer_with(ConversationHistoryOptimizer::new(counter()))
    }

    /// Text costing exactly `tokens` with the heuristic counter.
    fn text(tokens: usize) -> String {
        "abcd".repeat(tokens)
    }

    /// Message costing exactly `tokens` including overhead.
    fn msg(role: Role, tokens: usize) -> Message {
        Message::new(role, text(tokens - MESSAGE_OVERHEAD_TOKENS))
    }

    fn rag_item(tokens: usize, score: f64) -> RankedSearchResult {
        RankedSearchResult {
            content: text(tokens),
            relevance_score: score,
            token_count: tokens,
            title: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// available = 10_000 - 4_000 - 0 = 6_000
    fn options() -> PromptOptimizationOptions {
        PromptOptimizationOptions {
            model_name: "openai/gpt-4o".into(),
            max_context_window: 10_000,
            reserved_completion_tokens: 4_000,
            safety_buffer_percentage: 0.0,
            use_summarization: false,
            min_conversation_history_messages: 2,
            min_rag_context_items: 1,
            ..Default::default()
        }
    }

    /// Tokens of the messages that would actually be sent.
    fn sent_tokens(out: &OptimizedPrompt, model: &str) -> usize {
        estimate_messages_tokens(&HeuristicTokenCounter::new(), &out.to_messages(), model)
    }

    fn history(count: usize, each: usize) -> Vec<Message> {
        (0..count)
            .map(|i| msg(if i % 2 == 0 { Role::User } else { Role::Assistant }, each))
            .collect()
    }

    #[tokio::test]
    async fn fits_without_changes() {
        let input = PromptInput {
            system_prompt: text(100),
            user_message: "What changed?".into(),
            rag_context: vec![rag_item(200, 0.9)],
            history: history(4, 100),
        };
        let out = optimizer()
            .optimize_prompt(input, &options(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!out.was_optimized);
        assert!(!out.over_budget);
        assert_eq!(out.tokens_saved, 0);
        assert_eq!(out.optimization_strategy, "none");
        assert_eq!(out.original_estimate, out.optimized_estimate);
    }

    #[tokio::test]
    async fn history_shrinks_to_fit() {
        // system 1004 + user 5 + history 8000 = 9009 > 6000
        let input = PromptInput {
            system_prompt: text(1000),
            user_message: "hi".into(),
            rag_context: vec![],
            history: history(16, 500),
        };
        let out = optimizer()
            .optimize_prompt(input, &options(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.was_optimized);
        assert!(!out.over_budget);
        assert!(out.optimized_estimate.total <= 6_000);
        assert_eq!(out.optimization_strategy, "history-pruned");
        assert_eq!(out.conversation_history.len(), 9);
        assert_eq!(out.tokens_saved, out.original_estimate.total - out.optimized_estimate.total);
        assert!(out.ensure_within_budget().is_ok());
    }

    #[tokio::test]
    async fn history_floor_forces_next_tiers() {
        // history floor alone (2 × 2500) leaves the prompt over budget
        let input = PromptInput {
            system_prompt: text(500),
            user_message: "hi".into(),
            rag_context: vec![rag_item(1500, 0.9), rag_item(1500, 0.8)],
            history: history(4, 2500),
        };
        let out = optimizer()
            .optimize_prompt(input, &options(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.conversation_history.len(), 2);
        assert_eq!(out.rag_context.len(), 1);
        assert_eq!(out.optimization_strategy, "history-pruned+rag-trimmed");
        assert!(!out.over_budget);
        assert!(out.optimized_estimate.total <= 6_000);
    }

    #[tokio::test]
    async fn unreachable_budget_sets_flag() {
        let input = PromptInput {
            system_prompt: text(500),
            user_message: text(7000),
            rag_context: vec![],
            history: vec![],
        };
        let user = input.user_message.clone();
        let out = optimizer()
            .optimize_prompt(input, &options(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.over_budget);
        assert_eq!(out.user_message, user);
        assert!(matches!(
            out.ensure_within_budget(),
            Err(Error::BudgetExceeded { available: 6_000, .. })
        ));
    }

    #[tokio::test]
    async fn user_message_never_modified() {
        for size in [10, 1_000, 5_000, 9_000] {
            let user = text(size);
            let input = PromptInput {
                system_prompt: text(800),
                user_message: user.clone(),
                rag_context: vec![rag_item(900, 0.9)],
                history: history(6, 400),
            };
            let out = optimizer()
                .optimize_prompt(input, &options(), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(out.user_message, user);
            assert_eq!(out.was_optimized, out.tokens_saved > 0);
            assert!(out.optimized_estimate.total <= out.available_budget || out.over_budget);
            assert!(sent_tokens(&out, "openai/gpt-4o") <= out.optimized_estimate.total);
        }
    }

    #[tokio::test]
    async fn rendered_prompt_stays_within_budget() {
        let models = ["openai/gpt-4o", "anthropic/claude-sonnet-4"];
        for model in models {
            for title_tokens in [0, 500, 4_000, 7_000] {
                for min_rag in [0, 1] {
                    let titled = |score| RankedSearchResult {
                        title: (title_tokens > 0).then(|| text(title_tokens)),
                        ..rag_item(1_500, score)
                    };
                    let input = PromptInput {
                        system_prompt: text(300),
                        user_message: "Which controls failed?".into(),
                        rag_context: vec![titled(0.9), titled(0.8)],
                        history: history(6, 400),
                    };
                    let opts = PromptOptimizationOptions {
                        model_name: model.into(),
                        min_rag_context_items: min_rag,
                        ..options()
                    };
                    let out = optimizer()
                        .optimize_prompt(input, &opts, &CancellationToken::new())
                        .await
                        .unwrap();

                    let sent = sent_tokens(&out, model);
                    assert_eq!(out.user_message, "Which controls failed?");
                    assert!(sent <= out.optimized_estimate.total, "{model} {title_tokens}");
                    if !out.over_budget {
                        assert!(sent <= out.available_budget, "{model} {title_tokens}");
                    }
                    // only a floor item whose title alone overflows is unsatisfiable
                    assert_eq!(out.over_budget, title_tokens == 7_000 && min_rag == 1);
                }
            }
        }
    }

    #[tokio::test]
    async fn claude_profile_trims_rag_to_fit() {
        let model = "anthropic/claude-sonnet-4";
        let c = counter();
        let rag = RagContextOptimizer::new(c.clone(), RelevanceScorer::default());
        let docs = (0..2)
            .map(|_| RetrievedDocument {
                content: text(3_500),
                ..Default::default()
            })
            .collect();
        // ranked with the generic ratio: 3_500 tokens each
        let ranked = rag.rank("storage", docs);
        assert_eq!(ranked[0].token_count, 3_500);

        let prompt = PromptOptimizer::new(
            c.clone(),
            Arc::new(ConversationHistoryOptimizer::new(c.clone())),
            Arc::new(rag),
        );
        let input = PromptInput {
            system_prompt: String::new(),
            user_message: "hi".into(),
            rag_context: ranked,
            history: vec![],
        };
        let opts = PromptOptimizationOptions {
            model_name: model.into(),
            ..options()
        };
        let out = prompt
            .optimize_prompt(input, &opts, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!out.over_budget);
        assert_eq!(out.optimization_strategy, "rag-trimmed");
        assert_eq!(out.rag_context.len(), 2);
        assert_eq!(out.optimized_estimate.total, 6_000);
        assert_eq!(
            out.rag_context[1].token_count,
            c.count(&out.rag_context[1].content, model)
        );
        assert!(sent_tokens(&out, model) <= out.available_budget);
    }

    #[tokio::test]
    async fn system_prompt_summarized_as_last_resort() {
        let history_opt = ConversationHistoryOptimizer::new(counter())
            .with_summarizer(Arc::new(FixedSummarizer::new("Be concise. Cite controls.")));
        let opts = PromptOptimizationOptions {
            use_summarization: true,
            ..options()
        };
        let input = PromptInput {
            system_prompt: text(7000),
            user_message: "hi".into(),
            rag_context: vec![],
            history: vec![],
        };
        let out = optimizer_with(history_opt)
            .optimize_prompt(input, &opts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.system_prompt, "Be concise. Cite controls.");
        assert_eq!(out.optimization_strategy, "system-summarized");
        assert!(!out.over_budget);
        assert!(out.summarization_tokens > 0);
    }

    #[tokio::test]
    async fn system_prompt_kept_without_summarization() {
        let input = PromptInput {
            system_prompt: text(7000),
            user_message: "hi".into(),
            rag_context: vec![],
            history: vec![],
        };
        let out = optimizer()
            .optimize_prompt(input, &options(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.system_prompt.len(), 28_000);
        assert!(out.over_budget);
        assert!(!out.was_optimized);
    }

    #[tokio::test]
    async fn priorities_change_trim_order() {
        let opts = PromptOptimizationOptions {
            priorities: ComponentPriorities {
                rag_context: 10,
                conversation_history: 50,
                ..Default::default()
            },
            ..options()
        };
        let input = PromptInput {
            system_prompt: String::new(),
            user_message: "hi".into(),
            rag_context: vec![rag_item(2000, 0.9), rag_item(2000, 0.8)],
            history: history(6, 500),
        };
        // 5 + 4013 + 3000 = 7018; trimming RAG alone is enough
        let out = optimizer()
            .optimize_prompt(input, &opts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.optimization_strategy, "rag-trimmed");
        assert_eq!(out.conversation_history.len(), 6);
    }

    #[tokio::test]
    async fn summarized_history_when_enabled() {
        let history_opt = ConversationHistoryOptimizer::new(counter())
            .with_summarizer(Arc::new(FixedSummarizer::new("Earlier: scanned two subscriptions.")));
        let opts = PromptOptimizationOptions {
            use_summarization: true,
            ..options()
        };
        let input = PromptInput {
            system_prompt: text(1000),
            user_message: "hi".into(),
            rag_context: vec![],
            history: history(16, 500),
        };
        let out = optimizer_with(history_opt)
            .optimize_prompt(input, &opts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.optimization_strategy, "history-summarized");
        assert_eq!(out.conversation_history[0].role, Role::System);
        assert!(!out.over_budget);
    }

    #[tokio::test]
    async fn invalid_options_rejected() {
        let opts = PromptOptimizationOptions {
            reserved_completion_tokens: 20_000,
            ..options()
        };
        let err = optimizer()
            .optimize_prompt(PromptInput::default(), &opts, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn to_messages_orders_components() {
        let prompt = OptimizedPrompt {
            system_prompt: "You are a compliance assistant.".into(),
            user_message: "Summarize findings".into(),
            rag_context: vec![rag_item(2, 0.9)],
            conversation_history: vec![Message::user("earlier"), Message::assistant("reply")],
            original_estimate: TokenEstimate::default(),
            optimized_estimate: TokenEstimate::default(),
            available_budget: 100,
            tokens_saved: 0,
            was_optimized: false,
            over_budget: false,
            optimization_strategy: "none".into(),
            summarization_tokens: 0,
        };
        let messages = prompt.to_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("## Relevant context"));
        assert!(messages[0].content.contains("[1]"));
        assert_eq!(messages[3].role, Role::User);
        assert_eq!(messages[3].content, "Summarize findings");
    }
}
