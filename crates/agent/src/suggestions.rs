//! Follow-up action suggestions.
//!
//! Two sources feed the candidate list: a keyword rule table scored
//! against the recent conversation, and the outcome of the last tool chain
//! (failed steps can be retried, skipped steps need input, completed
//! results can be reviewed). Generation is read-only over its inputs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokenwise_core::{Message, Role};
use tokenwise_workflow::{StepStatus, ToolChainResult};
use tracing::debug;

use crate::context::relevance::RelevanceScorer;

/// Maximum number of suggestions returned.
pub const MAX_SUGGESTIONS: usize = 5;

/// Messages considered by the keyword rules, newest last.
const RECENT_MESSAGES: usize = 6;

/// Keyword rules below this score are not suggested.
const MIN_KEYWORD_CONFIDENCE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProactiveSuggestion {
    pub title: String,
    pub description: String,
    pub priority: SuggestionPriority,
    pub category: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub suggested_prompt: String,
}

/// What the generator looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuggestionContext<'a> {
    /// The conversation after optimization.
    pub messages: &'a [Message],
    /// The chain run during this turn, if any.
    pub chain: Option<&'a ToolChainResult>,
}

struct KeywordRule {
    keywords: &'static str,
    title: &'static str,
    description: &'static str,
    category: &'static str,
    priority: SuggestionPriority,
    tool_name: &'static str,
    prompt: &'static str,
}

const KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        keywords: "compliance scan audit policy violations resources",
        title: "Run a compliance scan",
        description: "Scan the resources under discussion against the active policy set.",
        category: "compliance",
        priority: SuggestionPriority::High,
        tool_name: "compliance_scan",
        prompt: "Run a compliance scan on the resources we discussed.",
    },
    KeywordRule {
        keywords: "evidence collect controls audit screenshots",
        title: "Collect audit evidence",
        description: "Gather evidence for the controls mentioned in this conversation.",
        category: "evidence",
        priority: SuggestionPriority::Medium,
        tool_name: "evidence_collector",
        prompt: "Collect evidence for the controls we covered.",
    },
    KeywordRule {
        keywords: "document documentation report generate policy",
        title: "Generate documentation",
        description: "Produce a report from the findings so far.",
        category: "documentation",
        priority: SuggestionPriority::Medium,
        tool_name: "document_generator",
        prompt: "Generate a report from these findings.",
    },
    KeywordRule {
        keywords: "cost costs spend budget billing savings",
        title: "Review cloud spend",
        description: "Break down the cost of the resources under discussion.",
        category: "cost",
        priority: SuggestionPriority::Low,
        tool_name: "cost_analysis",
        prompt: "Show me a cost breakdown for these resources.",
    },
    KeywordRule {
        keywords: "remediate remediation misconfigured vulnerable violations",
        title: "Plan remediation",
        description: "Draft remediation steps for the reported violations.",
        category: "remediation",
        priority: SuggestionPriority::High,
        tool_name: "remediation_planner",
        prompt: "Draft a remediation plan for the violations.",
    },
];

pub struct ProactiveSuggestionGenerator {
    scorer: RelevanceScorer,
}

impl ProactiveSuggestionGenerator {
    pub fn new(scorer: RelevanceScorer) -> Self {
        Self { scorer }
    }

    /// Ranked suggestions, highest confidence first.
    ///
    /// Candidates with the same tool and category collapse into the most
    /// confident one. Ties are ordered by title.
    pub fn generate(
        &self,
        conversation_id: &str,
        context: &SuggestionContext<'_>,
    ) -> Vec<ProactiveSuggestion> {
        let mut candidates = self.keyword_candidates(context.messages);
        if let Some(chain) = context.chain {
            candidates.extend(chain_candidates(chain));
        }

        let mut best: HashMap<(Option<String>, String), ProactiveSuggestion> = HashMap::new();
        for s in candidates {
            let key = (s.tool_name.clone(), s.category.clone());
            match best.get(&key) {
                Some(existing) if existing.confidence >= s.confidence => {}
                _ => {
                    best.insert(key, s);
                }
            }
        }

        let mut out: Vec<ProactiveSuggestion> = best.into_values().collect();
        out.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.title.cmp(&b.title))
        });
        out.truncate(MAX_SUGGESTIONS);

        debug!(
            conversation_id,
            count = out.len(),
            top = out.first().map(|s| s.title.as_str()).unwrap_or(""),
            "Generated suggestions"
        );
        out
    }

    fn keyword_candidates(&self, messages: &[Message]) -> Vec<ProactiveSuggestion> {
        let recent: Vec<&str> = messages
            .iter()
            .rev()
            .filter(|m| m.role != Role::System)
            .take(RECENT_MESSAGES)
            .map(|m| m.content.as_str())
            .collect();
        if recent.is_empty() {
            return Vec::new();
        }
        let text = recent.join("\n");

        KEYWORD_RULES
            .iter()
            .filter_map(|rule| {
                let confidence = self.scorer.score(rule.keywords, &text, None);
                (confidence >= MIN_KEYWORD_CONFIDENCE).then(|| ProactiveSuggestion {
                    title: rule.title.to_string(),
                    description: rule.description.to_string(),
                    priority: rule.priority,
                    category: rule.category.to_string(),
                    confidence,
                    tool_name: Some(rule.tool_name.to_string()),
                    suggested_prompt: rule.prompt.to_string(),
                })
            })
            .collect()
    }
}

impl Default for ProactiveSuggestionGenerator {
    fn default() -> Self {
        Self::new(RelevanceScorer::default())
    }
}

fn chain_candidates(chain: &ToolChainResult) -> Vec<ProactiveSuggestion> {
    let mut out = Vec::new();
    for step in &chain.steps {
        match step.status {
            StepStatus::Failed => out.push(ProactiveSuggestion {
                title: format!("Retry {}", step.tool_name),
                description: format!(
                    "Step {} failed: {}",
                    step.index + 1,
                    step.error.as_deref().unwrap_or("unknown error")
                ),
                priority: SuggestionPriority::High,
                category: "retry".into(),
                confidence: 0.9,
                tool_name: Some(step.tool_name.clone()),
                suggested_prompt: format!("Retry {}.", step.tool_name),
            }),
            StepStatus::Skipped => {
                let missing: Vec<&str> = step
                    .requires
                    .iter()
                    .filter(|k| !chain.context.contains_key(k.as_str()))
                    .map(String::as_str)
                    .collect();
                let description = if missing.is_empty() {
                    format!("Step {} did not run.", step.index + 1)
                } else {
                    format!("Step {} is waiting for: {}", step.index + 1, missing.join(", "))
                };
                out.push(ProactiveSuggestion {
                    title: format!("Provide input for {}", step.tool_name),
                    description,
                    priority: SuggestionPriority::Medium,
                    category: "missing_input".into(),
                    confidence: 0.75,
                    tool_name: Some(step.tool_name.clone()),
                    suggested_prompt: format!("Here is the input {} needs:", step.tool_name),
                });
            }
            StepStatus::Completed => out.push(ProactiveSuggestion {
                title: format!("Review {} results", step.tool_name),
                description: format!("Results are stored under `{}`.", step.output_key),
                priority: SuggestionPriority::Low,
                category: "review".into(),
                confidence: 0.6,
                tool_name: Some(step.tool_name.clone()),
                suggested_prompt: format!("Summarize the {} results.", step.tool_name),
            }),
            StepStatus::Pending | StepStatus::Running => {}
        }
    }
    out
}
