//! Conversation history health evaluation and pruning.
//!
//! Four strategies reduce a history that exceeds its token budget:
//!
//! | Strategy | Keeps |
//! |----------|-------|
//! | `OldestFirst` | the longest recent suffix that fits |
//! | `LowestRelevance` | everything except the least relevant older messages |
//! | `Summarize` | a synthetic summary of the oldest block, then a recent suffix |
//! | `TopicBoundary` | everything from the most recent topic switch on |
//!
//! `Summarize` runs whenever it is selected and the history is over budget,
//! not only once pruning has run out of droppable messages.
//!
//! The most recent `min_messages_to_keep` messages are never dropped, even
//! when they alone exceed the budget; the result then reports
//! `within_budget = false`. Summarization is the only step that may
//! suspend. If it fails, times out, or is cancelled, the optimizer falls
//! back to `OldestFirst` instead of failing the turn.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokenwise_config::OptimizationConfig;
use tokenwise_core::{
    CompletionError, HistoryOptimizationOptions, Message, PruningStrategy, Result, Role,
    Summarizer,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::relevance::RelevanceScorer;
use crate::context::token::{
    MESSAGE_OVERHEAD_TOKENS, TokenCounter, estimate_message_tokens, estimate_messages_tokens,
    truncate_to_tokens,
};

/// A pure projection of a message list plus a budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHealthMetrics {
    pub total_messages: usize,
    pub estimated_tokens: usize,
    pub token_budget: usize,
    /// `estimated_tokens > token_budget × health_threshold`
    pub needs_optimization: bool,
    /// `estimated_tokens / token_budget`; 0.0 for a zero budget.
    pub utilization: f64,
}

/// A detected change of subject. `index` is the first message of the new topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSwitch {
    pub index: usize,
    pub label: String,
}

/// The outcome of one history optimization call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedConversationHistory {
    pub messages: Vec<Message>,
    pub original_message_count: usize,
    pub original_tokens: usize,
    pub optimized_tokens: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Strategy that produced `messages`; `None` when nothing changed.
    pub strategy: Option<PruningStrategy>,
    /// The requested strategy could not be applied and `OldestFirst` was used.
    pub fell_back: bool,
    pub within_budget: bool,
    /// Tokens sent to and received from the summarizer.
    pub summarization_tokens: usize,
}

impl OptimizedConversationHistory {
    pub fn was_pruned(&self) -> bool {
        self.strategy.is_some()
    }

    /// Short label for strategy reporting.
    pub fn label(&self) -> String {
        match (&self.strategy, self.fell_back) {
            (None, _) => "none".into(),
            (Some(s), false) => s.to_string(),
            (Some(s), true) => format!("{s}(fallback)"),
        }
    }
}

/// A bounded summary produced by [`ConversationHistoryOptimizer::summarize_text`].
#[derive(Debug, Clone)]
pub struct BoundedSummary {
    pub text: String,
    /// Input plus output tokens of the summarization call.
    pub tokens_spent: usize,
}

pub struct ConversationHistoryOptimizer {
    counter: Arc<dyn TokenCounter>,
    scorer: RelevanceScorer,
    summarizer: Option<Arc<dyn Summarizer>>,
    health_threshold: f64,
    summary_timeout: Duration,
    topic_window: usize,
    topic_overlap_threshold: f64,
}

impl ConversationHistoryOptimizer {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self::from_config(counter, &OptimizationConfig::default())
    }

    pub fn from_config(counter: Arc<dyn TokenCounter>, config: &OptimizationConfig) -> Self {
        Self {
            counter,
            scorer: RelevanceScorer::from_config(config),
            summarizer: None,
            health_threshold: config.health_threshold,
            summary_timeout: Duration::from_secs(config.summary_timeout_secs),
            topic_window: config.topic_window.max(1),
            topic_overlap_threshold: config.topic_overlap_threshold,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn has_summarizer(&self) -> bool {
        self.summarizer.is_some()
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    // ── Health ────────────────────────────────────────────────────────

    pub fn evaluate_health(
        &self,
        messages: &[Message],
        current_token_count: usize,
        token_budget: usize,
    ) -> ConversationHealthMetrics {
        let utilization = if token_budget == 0 {
            0.0
        } else {
            current_token_count as f64 / token_budget as f64
        };
        ConversationHealthMetrics {
            total_messages: messages.len(),
            estimated_tokens: current_token_count,
            token_budget,
            needs_optimization: current_token_count as f64
                > token_budget as f64 * self.health_threshold,
            utilization,
        }
    }

    /// Count `messages` with `model`, then evaluate.
    pub fn evaluate_messages(
        &self,
        messages: &[Message],
        token_budget: usize,
        model: &str,
    ) -> ConversationHealthMetrics {
        let tokens = estimate_messages_tokens(self.counter.as_ref(), messages, model);
        self.evaluate_health(messages, tokens, token_budget)
    }

    // ── Optimization ──────────────────────────────────────────────────

    /// Optimize against the most recent user message.
    pub async fn optimize_history(
        &self,
        messages: &[Message],
        options: &HistoryOptimizationOptions,
        cancel: &CancellationToken,
    ) -> Result<OptimizedConversationHistory> {
        let query = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        self.optimize_history_for(messages, query, options, cancel)
            .await
    }

    /// Optimize with an explicit relevance query (the incoming user message,
    /// when it is not part of `messages` yet).
    pub async fn optimize_history_for(
        &self,
        messages: &[Message],
        query: &str,
        options: &HistoryOptimizationOptions,
        cancel: &CancellationToken,
    ) -> Result<OptimizedConversationHistory> {
        options.validate()?;
        let model = options.model_name.as_str();
        let costs = self.message_costs(messages, model);
        let original_tokens: usize = costs.iter().sum();

        if original_tokens <= options.max_tokens {
            return Ok(OptimizedConversationHistory {
                messages: messages.to_vec(),
                original_message_count: messages.len(),
                original_tokens,
                optimized_tokens: original_tokens,
                summary: None,
                strategy: None,
                fell_back: false,
                within_budget: true,
                summarization_tokens: 0,
            });
        }

        let budget = options.max_tokens;
        let min_keep = options.min_messages_to_keep;
        let mut summary = None;
        let mut fell_back = false;
        let mut summarization_tokens = 0;
        let mut strategy = options.pruning_strategy;

        let kept: Vec<Message> = match options.pruning_strategy {
            PruningStrategy::OldestFirst => {
                let start = keep_recent(&costs, budget, min_keep);
                messages[start..].to_vec()
            }
            PruningStrategy::LowestRelevance => {
                self.drop_least_relevant(messages, &costs, query, budget, min_keep)
            }
            PruningStrategy::Summarize => {
                match self
                    .summarize_oldest(messages, &costs, options, cancel)
                    .await
                {
                    Some((kept, text, spent)) => {
                        summary = Some(text);
                        summarization_tokens = spent;
                        kept
                    }
                    None => {
                        fell_back = true;
                        strategy = PruningStrategy::OldestFirst;
                        let start = keep_recent(&costs, budget, min_keep);
                        messages[start..].to_vec()
                    }
                }
            }
            PruningStrategy::TopicBoundary => {
                match self.detect_topic_switches(messages).last() {
                    Some(switch) => {
                        let cut = switch.index.min(messages.len().saturating_sub(min_keep));
                        let tail_costs = &costs[cut..];
                        let start = cut + keep_recent(tail_costs, budget, min_keep);
                        messages[start..].to_vec()
                    }
                    None => {
                        debug!("No topic switch found, pruning oldest first");
                        fell_back = true;
                        strategy = PruningStrategy::OldestFirst;
                        let start = keep_recent(&costs, budget, min_keep);
                        messages[start..].to_vec()
                    }
                }
            }
        };

        let optimized_tokens = estimate_messages_tokens(self.counter.as_ref(), &kept, model);
        let within_budget = optimized_tokens <= budget;
        info!(
            strategy = %strategy,
            fell_back,
            messages_before = messages.len(),
            messages_after = kept.len(),
            tokens_before = original_tokens,
            tokens_after = optimized_tokens,
            "Optimized conversation history"
        );
        if !within_budget {
            warn!(
                tokens = optimized_tokens,
                budget, min_keep, "History still over budget after keeping the protected messages"
            );
        }

        Ok(OptimizedConversationHistory {
            messages: kept,
            original_message_count: messages.len(),
            original_tokens,
            optimized_tokens,
            summary,
            strategy: Some(strategy),
            fell_back,
            within_budget,
            summarization_tokens,
        })
    }

    fn message_costs(&self, messages: &[Message], model: &str) -> Vec<usize> {
        messages
            .iter()
            .map(|m| estimate_message_tokens(self.counter.as_ref(), m, model))
            .collect()
    }

    fn drop_least_relevant(
        &self,
        messages: &[Message],
        costs: &[usize],
        query: &str,
        budget: usize,
        min_keep: usize,
    ) -> Vec<Message> {
        let droppable = messages.len().saturating_sub(min_keep);
        let mut order: Vec<(usize, f64)> = messages[..droppable]
            .iter()
            .enumerate()
            .map(|(i, m)| (i, self.scorer.score(query, &m.content, None)))
            .collect();
        // Lowest score first; equal scores drop the older message first.
        order.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let mut total: usize = costs.iter().sum();
        let mut dropped = HashSet::new();
        for (i, score) in order {
            if total <= budget {
                break;
            }
            debug!(index = i, score, "Dropping low-relevance message");
            total -= costs[i];
            dropped.insert(i);
        }

        messages
            .iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Collapse the oldest block into one system message. `None` means the
    /// caller should fall back.
    async fn summarize_oldest(
        &self,
        messages: &[Message],
        costs: &[usize],
        options: &HistoryOptimizationOptions,
        cancel: &CancellationToken,
    ) -> Option<(Vec<Message>, String, usize)> {
        let reserve = options.summary_max_tokens + MESSAGE_OVERHEAD_TOKENS;
        let keep_budget = options.max_tokens.saturating_sub(reserve);
        let start = keep_recent(costs, keep_budget, options.min_messages_to_keep);
        if start == 0 {
            return None;
        }

        let block = &messages[..start];
        let transcript = block
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let summary = self
            .summarize_text(
                &transcript,
                options.summary_max_tokens,
                &options.model_name,
                cancel,
            )
            .await?;

        let content = truncate_to_tokens(
            self.counter.as_ref(),
            &format!("Summary of earlier conversation: {}", summary.text),
            options.summary_max_tokens,
            &options.model_name,
        );
        let last_ts = block.last().map(|m| m.timestamp)?;
        let mut summary_msg = Message::system(content).at(last_ts);
        summary_msg
            .metadata
            .insert("summarized_messages".into(), serde_json::json!(block.len()));

        let mut kept = Vec::with_capacity(messages.len() - start + 1);
        kept.push(summary_msg);
        kept.extend_from_slice(&messages[start..]);
        Some((kept, summary.text, summary.tokens_spent))
    }

    /// Run the summarizer under the configured timeout and `cancel`, and
    /// bound its output to `max_tokens`.
    ///
    /// Every failure is logged and returned as `None`.
    pub async fn summarize_text(
        &self,
        text: &str,
        max_tokens: usize,
        model: &str,
        cancel: &CancellationToken,
    ) -> Option<BoundedSummary> {
        let Some(summarizer) = &self.summarizer else {
            warn!("Summarization requested but no summarizer is configured");
            return None;
        };

        let call = tokio::time::timeout(
            self.summary_timeout,
            summarizer.summarize(text, max_tokens),
        );
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CompletionError::Cancelled),
            res = call => {
                match res {
                    Ok(r) => r,
                    Err(_) => Err(CompletionError::Timeout {
                        timeout_secs: self.summary_timeout.as_secs(),
                    }),
                }
            }
        };

        match outcome {
            Ok(raw) => {
                let bounded =
                    truncate_to_tokens(self.counter.as_ref(), raw.trim(), max_tokens, model);
                if bounded.is_empty() {
                    warn!("Summarizer returned an empty summary");
                    return None;
                }
                let tokens_spent =
                    self.counter.count(text, model) + self.counter.count(&bounded, model);
                Some(BoundedSummary {
                    text: bounded,
                    tokens_spent,
                })
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retryable = e.is_retryable(),
                    "Summarization failed, falling back"
                );
                None
            }
        }
    }

    // ── Windows and topics ────────────────────────────────────────────

    /// A contiguous window around `target_index` that fits `max_tokens`.
    ///
    /// Grows one message left, then one right, alternately; a side stops at
    /// the first message that no longer fits. An out-of-range target is
    /// clamped to the last message.
    pub fn get_context_window(
        &self,
        messages: &[Message],
        max_tokens: usize,
        target_index: usize,
    ) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }
        let target = target_index.min(messages.len() - 1);
        let costs = self.message_costs(messages, "");
        if costs[target] > max_tokens {
            return Vec::new();
        }

        let (mut lo, mut hi) = (target, target + 1);
        let mut used = costs[target];
        let (mut left_open, mut right_open) = (true, true);
        while left_open || right_open {
            if left_open {
                if lo > 0 && used + costs[lo - 1] <= max_tokens {
                    lo -= 1;
                    used += costs[lo];
                } else {
                    left_open = false;
                }
            }
            if right_open {
                if hi < messages.len() && used + costs[hi] <= max_tokens {
                    used += costs[hi];
                    hi += 1;
                } else {
                    right_open = false;
                }
            }
        }
        messages[lo..hi].to_vec()
    }

    /// Indices where the vocabulary of consecutive message windows stops
    /// overlapping. Heuristic; results are ordered by index and at least
    /// one window apart.
    pub fn detect_topic_switches(&self, messages: &[Message]) -> Vec<TopicSwitch> {
        let w = self.topic_window;
        if messages.len() < 2 * w {
            return Vec::new();
        }

        let words: Vec<Vec<String>> = messages
            .iter()
            .map(|m| self.scorer.significant_words(&m.content))
            .collect();
        let window_set = |from: usize| -> HashSet<&str> {
            words[from..from + w]
                .iter()
                .flatten()
                .map(String::as_str)
                .collect()
        };

        let mut switches: Vec<TopicSwitch> = Vec::new();
        for i in w..=messages.len() - w {
            if switches.last().is_some_and(|s| i - s.index < w) {
                continue;
            }
            let before = window_set(i - w);
            let after = window_set(i);
            if before.is_empty() || after.is_empty() {
                continue;
            }
            let shared = before.intersection(&after).count();
            let union = before.union(&after).count();
            let overlap = shared as f64 / union as f64;
            if overlap < self.topic_overlap_threshold {
                let label = dominant_word(&words[i..i + w]);
                debug!(index = i, overlap, label = %label, "Topic switch detected");
                switches.push(TopicSwitch { index: i, label });
            }
        }
        switches
    }
}

/// Start index of the longest recent suffix that fits `budget`, never
/// shorter than `min_keep` messages.
fn keep_recent(costs: &[usize], budget: usize, min_keep: usize) -> usize {
    let n = costs.len();
    let mut start = n - min_keep.min(n);
    let mut used: usize = costs[start..].iter().sum();
    while start > 0 && used + costs[start - 1] <= budget {
        start -= 1;
        used += costs[start];
    }
    start
}

/// Most frequent word; ties go to the alphabetically first.
fn dominant_word(window: &[Vec<String>]) -> String {
    let mut freq: HashMap<&str, usize> = HashMap::new();
    for w in window.iter().flatten() {
        *freq.entry(w.as_str()).or_default() += 1;
    }
    freq.into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(w, _)| w.to_string())
        .unwrap_or_default()
}
