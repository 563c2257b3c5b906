//! Ranking and budget-bounded selection of retrieved context.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokenwise_core::{RagOptimizationOptions, Result};
use tracing::debug;

use crate::context::relevance::RelevanceScorer;
use crate::context::token::{TokenCounter, truncate_to_tokens};

/// A retrieved document before scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievedDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A scored retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSearchResult {
    pub content: String,
    pub relevance_score: f64,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// The selected subset of results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizedRagContext {
    pub results: Vec<RankedSearchResult>,
    pub total_tokens_used: usize,
    /// Input results that were not selected.
    pub dropped: usize,
    /// Whether the last selected result was cut to fit.
    pub truncated: bool,
}

impl OptimizedRagContext {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Heading that introduces the rendered results in the system message.
pub const RAG_SECTION_HEADING: &str = "## Relevant context\n\n";

/// Render results as a numbered context section for the system message.
pub fn render_rag(results: &[RankedSearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| render_rag_item(i, r))
        .collect()
}

/// One result as it appears in [`render_rag`] output, including the blank
/// line that separates it from the previous result.
pub fn render_rag_item(index: usize, result: &RankedSearchResult) -> String {
    let mut out = item_frame(index, result);
    out.push_str(&result.content);
    out
}

/// Separator and `[n] title` label placed before a result's content.
fn item_frame(index: usize, result: &RankedSearchResult) -> String {
    let sep = if index > 0 { "\n\n" } else { "" };
    match &result.title {
        Some(title) => format!("{sep}[{}] {title}\n", index + 1),
        None => format!("{sep}[{}]\n", index + 1),
    }
}

/// Tokens of the rendered results, counted per item.
///
/// Never less than the count of the whole [`render_rag`] output for
/// character-ratio counters, so budgets built on it hold for what is sent.
pub fn rendered_rag_tokens(
    counter: &dyn TokenCounter,
    results: &[RankedSearchResult],
    model: &str,
) -> usize {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| counter.count(&render_rag_item(i, r), model))
        .sum()
}

pub struct RagContextOptimizer {
    counter: Arc<dyn TokenCounter>,
    scorer: RelevanceScorer,
    model: String,
}

impl RagContextOptimizer {
    pub fn new(counter: Arc<dyn TokenCounter>, scorer: RelevanceScorer) -> Self {
        Self {
            counter,
            scorer,
            model: String::new(),
        }
    }

    /// Model name used when counting truncated content.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Score documents against `query` and count their tokens.
    ///
    /// Output keeps input order; [`Self::optimize_context`] does the sorting.
    pub fn rank(&self, query: &str, documents: Vec<RetrievedDocument>) -> Vec<RankedSearchResult> {
        documents
            .into_iter()
            .map(|doc| RankedSearchResult {
                relevance_score: self.scorer.score(query, &doc.content, doc.title.as_deref()),
                token_count: self.counter.count(&doc.content, &self.model),
                content: doc.content,
                title: doc.title,
                metadata: doc.metadata,
            })
            .collect()
    }

    /// Filter, sort, and greedily select results under the token budget.
    ///
    /// Results below `min_relevance_score` are discarded. The rest are
    /// taken highest score first (ties keep input order) while they fit and
    /// the count stays within `max_results`. With `trim_large_results`, the
    /// first result that does not fit is cut to the remaining budget and
    /// selection stops; otherwise it is skipped and smaller ones are tried.
    pub fn optimize_context(
        &self,
        results: Vec<RankedSearchResult>,
        options: &RagOptimizationOptions,
    ) -> Result<OptimizedRagContext> {
        options.validate()?;
        let input_len = results.len();

        let mut candidates: Vec<RankedSearchResult> = results
            .into_iter()
            .filter(|r| r.relevance_score >= options.min_relevance_score)
            .collect();
        // Stable: equal scores keep their input order.
        candidates.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

        let mut ctx = OptimizedRagContext::default();
        for result in candidates {
            if ctx.results.len() >= options.max_results {
                break;
            }
            let remaining = options.max_rag_tokens - ctx.total_tokens_used;
            if result.token_count <= remaining {
                ctx.total_tokens_used += result.token_count;
                ctx.results.push(result);
            } else if options.trim_large_results {
                if let Some(cut) = self.truncate_result(result, remaining) {
                    ctx.total_tokens_used += cut.token_count;
                    ctx.results.push(cut);
                    ctx.truncated = true;
                }
                break;
            }
        }

        ctx.dropped = input_len - ctx.results.len();
        debug!(
            selected = ctx.results.len(),
            dropped = ctx.dropped,
            tokens = ctx.total_tokens_used,
            truncated = ctx.truncated,
            "Optimized RAG context"
        );
        Ok(ctx)
    }

    /// Shrink an already selected, ordered result list to `budget` tokens
    /// without going below `min_items` results.
    ///
    /// `budget` covers the rendered items (labels, titles, and separators
    /// included) counted with `model`; the caller-supplied `token_count` is
    /// not trusted here. Results are kept in order. A floor item that does
    /// not fit is cut to the remaining budget when its label fits, and kept
    /// whole otherwise. Past the floor, the first result that does not fit
    /// is cut (if `trim` is set) and selection stops.
    pub fn shrink_to_budget(
        &self,
        results: &[RankedSearchResult],
        budget: usize,
        min_items: usize,
        trim: bool,
        model: &str,
    ) -> OptimizedRagContext {
        let floor = min_items.min(results.len());
        let mut ctx = OptimizedRagContext::default();

        for (i, result) in results.iter().enumerate() {
            let remaining = budget.saturating_sub(ctx.total_tokens_used);
            let cost = self.counter.count(&render_rag_item(i, result), model);
            if cost <= remaining {
                let mut kept = result.clone();
                kept.token_count = self.counter.count(&kept.content, model);
                ctx.total_tokens_used += cost;
                ctx.results.push(kept);
                continue;
            }
            if i < floor {
                match self.truncate_rendered(i, result, remaining, model) {
                    Some((cut, cut_cost)) => {
                        ctx.total_tokens_used += cut_cost;
                        ctx.results.push(cut);
                        ctx.truncated = true;
                    }
                    None => {
                        let mut kept = result.clone();
                        kept.token_count = self.counter.count(&kept.content, model);
                        ctx.total_tokens_used += cost;
                        ctx.results.push(kept);
                    }
                }
                continue;
            }
            let trimmed = if trim {
                self.truncate_rendered(i, result, remaining, model)
            } else {
                None
            };
            if let Some((cut, cut_cost)) = trimmed {
                ctx.total_tokens_used += cut_cost;
                ctx.results.push(cut);
                ctx.truncated = true;
            }
            break;
        }

        ctx.dropped = results.len() - ctx.results.len();
        ctx
    }

    fn truncate_result(
        &self,
        mut result: RankedSearchResult,
        max_tokens: usize,
    ) -> Option<RankedSearchResult> {
        if max_tokens == 0 {
            return None;
        }
        let cut =
            truncate_to_tokens(self.counter.as_ref(), &result.content, max_tokens, &self.model);
        if cut.is_empty() {
            return None;
        }
        result.token_count = self.counter.count(&cut, &self.model);
        result.content = cut;
        Some(result)
    }

    /// Cut `result`'s content so its rendered form at `index` costs at most
    /// `max_tokens`. Returns the cut result and its rendered cost.
    fn truncate_rendered(
        &self,
        index: usize,
        result: &RankedSearchResult,
        max_tokens: usize,
        model: &str,
    ) -> Option<(RankedSearchResult, usize)> {
        let frame = self.counter.count(&item_frame(index, result), model);
        let mut allowance = max_tokens.checked_sub(frame)?;
        while allowance > 0 {
            let cut = truncate_to_tokens(self.counter.as_ref(), &result.content, allowance, model);
            if cut.is_empty() {
                return None;
            }
            let mut out = result.clone();
            out.token_count = self.counter.count(&cut, model);
            out.content = cut;
            let cost = self.counter.count(&render_rag_item(index, &out), model);
            if cost <= max_tokens {
                return Some((out, cost));
            }
            allowance = allowance.saturating_sub(cost - max_tokens);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token::HeuristicTokenCounter;

    fn optimizer() -> RagContextOptimizer {
        RagContextOptimizer::new(Arc::new(HeuristicTokenCounter::new()), RelevanceScorer::default())
    }

    fn result(content: &str, score: f64, tokens: usize) -> RankedSearchResult {
        RankedSearchResult {
            content: content.into(),
            relevance_score: score,
            token_count: tokens,
            title: None,
            metadata: serde_json::Map::new(),
        }
    }

    fn large_budget() -> RagOptimizationOptions {
        RagOptimizationOptions {
            max_rag_tokens: 100_000,
            min_relevance_score: 0.4,
            max_results: 10,
            trim_large_results: true,
        }
    }

    #[test]
    fn filters_below_threshold_and_sorts() {
        let input = vec![
            result("e", 0.1, 10),
            result("c", 0.5, 10),
            result("a", 0.9, 10),
            result("d", 0.3, 10),
            result("b", 0.7, 10),
        ];
        let ctx = optimizer().optimize_context(input, &large_budget()).unwrap();
        let scores: Vec<f64> = ctx.results.iter().map(|r| r.relevance_score).collect();
        assert_eq!(scores, vec![0.9, 0.7, 0.5]);
        assert_eq!(ctx.dropped, 2);
        assert_eq!(ctx.total_tokens_used, 30);
    }

    #[test]
    fn ties_keep_input_order() {
        let input = vec![
            result("first", 0.6, 5),
            result("second", 0.6, 5),
            result("third", 0.8, 5),
            result("fourth", 0.6, 5),
        ];
        let ctx = optimizer().optimize_context(input, &large_budget()).unwrap();
        let order: Vec<&str> = ctx.results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(order, vec!["third", "first", "second", "fourth"]);
    }

    #[test]
    fn optimizing_twice_is_identical() {
        let input = vec![
            result("x", 0.5, 40),
            result("y", 0.9, 70),
            result("z", 0.5, 20),
        ];
        let opts = RagOptimizationOptions {
            max_rag_tokens: 100,
            ..large_budget()
        };
        let a = optimizer().optimize_context(input.clone(), &opts).unwrap();
        let b = optimizer().optimize_context(input, &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn respects_max_results() {
        let input = (0..8).map(|i| result("doc", 0.9 - i as f64 * 0.01, 1)).collect();
        let opts = RagOptimizationOptions {
            max_results: 3,
            ..large_budget()
        };
        let ctx = optimizer().optimize_context(input, &opts).unwrap();
        assert_eq!(ctx.results.len(), 3);
        assert_eq!(ctx.dropped, 5);
    }

    #[test]
    fn large_result_truncated_to_fit() {
        let long = "evidence ".repeat(100); // 900 chars, 225 tokens
        let input = vec![result("short", 0.9, 2), result(&long, 0.8, 225)];
        let opts = RagOptimizationOptions {
            max_rag_tokens: 52,
            ..large_budget()
        };
        let ctx = optimizer().optimize_context(input, &opts).unwrap();
        assert_eq!(ctx.results.len(), 2);
        assert!(ctx.truncated);
        assert_eq!(ctx.results[1].token_count, 50);
        assert!(ctx.total_tokens_used <= 52);
    }

    #[test]
    fn large_result_skipped_without_trim() {
        let input = vec![
            result("big", 0.9, 500),
            result("small", 0.8, 30),
        ];
        let opts = RagOptimizationOptions {
            max_rag_tokens: 100,
            trim_large_results: false,
            ..large_budget()
        };
        let ctx = optimizer().optimize_context(input, &opts).unwrap();
        assert_eq!(ctx.results.len(), 1);
        assert_eq!(ctx.results[0].content, "small");
        assert!(!ctx.truncated);
    }

    #[test]
    fn invalid_options_rejected() {
        let opts = RagOptimizationOptions {
            max_rag_tokens: 0,
            ..large_budget()
        };
        assert!(optimizer().optimize_context(vec![], &opts).is_err());
    }

    #[test]
    fn rank_scores_with_title() {
        let docs = vec![
            RetrievedDocument {
                title: Some("Storage encryption".into()),
                content: "Customer managed keys for storage".into(),
                ..Default::default()
            },
            RetrievedDocument {
                title: None,
                content: "Virtual network peering".into(),
                ..Default::default()
            },
        ];
        let ranked = optimizer().rank("storage encryption", docs);
        assert!((ranked[0].relevance_score - (0.5 + 0.15)).abs() < 1e-10);
        assert_eq!(ranked[1].relevance_score, 0.0);
        assert_eq!(ranked[0].token_count, 9);
    }

    #[test]
    fn shrink_honours_floor() {
        let input = vec![result(&"a".repeat(400), 0.9, 100), result("b", 0.8, 50)];
        let ctx = optimizer().shrink_to_budget(&input, 0, 1, true, "");
        assert_eq!(ctx.results.len(), 1);
        assert_eq!(ctx.results[0].token_count, 100);
        assert_eq!(ctx.dropped, 1);

        // "[1]\n" costs one token of the 40
        let ctx = optimizer().shrink_to_budget(&input, 40, 1, true, "");
        assert_eq!(ctx.results.len(), 1);
        assert_eq!(ctx.results[0].token_count, 39);
        assert_eq!(ctx.total_tokens_used, 40);
        assert!(ctx.truncated);
    }

    #[test]
    fn shrink_counts_rendered_titles() {
        let counter = HeuristicTokenCounter::new();
        let mut titled = result(&"a".repeat(400), 0.9, 100);
        titled.title = Some("t".repeat(200));
        let input = vec![titled, result("b", 0.8, 1)];

        let ctx = optimizer().shrink_to_budget(&input, 120, 1, false, "");
        assert_eq!(ctx.results.len(), 1);
        assert_eq!(ctx.results[0].token_count, 68);
        assert_eq!(ctx.total_tokens_used, 120);
        assert!(counter.count(&render_rag(&ctx.results), "") <= 120);
    }

    #[test]
    fn shrink_recounts_with_given_model() {
        let counter = HeuristicTokenCounter::new();
        let model = "anthropic/claude-sonnet-4";
        // token_count was taken with the generic ratio
        let input = vec![result(&"a".repeat(700), 0.9, 175)];

        let ctx = optimizer().shrink_to_budget(&input, 150, 1, true, model);
        let rendered = counter.count(&render_rag(&ctx.results), model);
        assert!(rendered <= 150);
        assert_eq!(ctx.total_tokens_used, rendered);
        assert_eq!(
            ctx.results[0].token_count,
            counter.count(&ctx.results[0].content, model)
        );
    }

    #[test]
    fn rendered_tokens_cover_whole_section() {
        let counter = HeuristicTokenCounter::new();
        let mut first = result("Encryption is enabled on every account.", 0.9, 10);
        first.title = Some("Storage baseline".into());
        let input = vec![first, result("Second.", 0.5, 2), result("x", 0.4, 1)];
        for model in ["openai/gpt-4o", "anthropic/claude-sonnet-4"] {
            assert!(
                rendered_rag_tokens(&counter, &input, model)
                    >= counter.count(&render_rag(&input), model)
            );
        }
    }

    #[test]
    fn render_numbers_results() {
        let mut r = result("Encryption is enabled.", 0.9, 5);
        r.title = Some("Storage".into());
        let text = render_rag(&[r, result("Second.", 0.5, 2)]);
        assert_eq!(text, "[1] Storage\nEncryption is enabled.\n\n[2]\nSecond.");
    }
}
