//! Data model for per-turn cost records and savings reports.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Token counts reported by the turn pipeline, before pricing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnUsage {
    pub agent_type: String,
    pub task_id: String,
    pub conversation_id: String,
    pub model: String,
    /// Prompt size before any optimization.
    pub original_prompt_tokens: usize,
    /// Prompt size actually sent.
    pub optimized_prompt_tokens: usize,
    pub completion_tokens: usize,
    /// Tokens spent on summarization calls during the turn.
    pub summarization_tokens: usize,
}

/// One append-only log entry per completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCostMetrics {
    pub agent_type: String,
    pub task_id: String,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub original_prompt_tokens: usize,
    pub optimized_prompt_tokens: usize,
    pub tokens_saved: usize,
    pub completion_tokens: usize,
    pub summarization_tokens: usize,
    /// Estimated USD cost of the turn as sent.
    pub estimated_cost: f64,
    /// Estimated USD saved against the unoptimized prompt.
    pub cost_saved: f64,
}

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days` days leading up to `now`.
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::days(i64::from(days)),
            end: now,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

/// Savings for one agent type inside a summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSavings {
    pub agent_type: String,
    pub turns: usize,
    pub original_prompt_tokens: usize,
    pub tokens_saved: usize,
    pub estimated_cost: f64,
    pub cost_saved: f64,
}

/// Aggregate over the records matching an agent type and date range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSummary {
    pub agent_type: Option<String>,
    pub range: Option<DateRange>,
    pub turns: usize,
    pub original_prompt_tokens: usize,
    pub optimized_prompt_tokens: usize,
    pub tokens_saved: usize,
    pub completion_tokens: usize,
    pub summarization_tokens: usize,
    pub estimated_cost: f64,
    pub cost_saved: f64,
    /// `tokens_saved / original_prompt_tokens` as a fraction; 0.0 with no data.
    pub percentage_saved: f64,
    /// Per-agent breakdown, most tokens saved first.
    pub by_agent: Vec<AgentSavings>,
}

impl OptimizationSummary {
    pub(crate) fn add(&mut self, m: &AgentCostMetrics) {
        self.turns += 1;
        self.original_prompt_tokens += m.original_prompt_tokens;
        self.optimized_prompt_tokens += m.optimized_prompt_tokens;
        self.tokens_saved += m.tokens_saved;
        self.completion_tokens += m.completion_tokens;
        self.summarization_tokens += m.summarization_tokens;
        self.estimated_cost += m.estimated_cost;
        self.cost_saved += m.cost_saved;

        match self
            .by_agent
            .iter_mut()
            .find(|a| a.agent_type == m.agent_type)
        {
            Some(agent) => agent.add(m),
            None => {
                let mut agent = AgentSavings {
                    agent_type: m.agent_type.clone(),
                    ..Default::default()
                };
                agent.add(m);
                self.by_agent.push(agent);
            }
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.percentage_saved = if self.original_prompt_tokens == 0 {
            0.0
        } else {
            self.tokens_saved as f64 / self.original_prompt_tokens as f64
        };
        self.by_agent.sort_by(|a, b| {
            b.tokens_saved
                .cmp(&a.tokens_saved)
                .then_with(|| a.agent_type.cmp(&b.agent_type))
        });
        self
    }
}

impl AgentSavings {
    fn add(&mut self, m: &AgentCostMetrics) {
        self.turns += 1;
        self.original_prompt_tokens += m.original_prompt_tokens;
        self.tokens_saved += m.tokens_saved;
        self.estimated_cost += m.estimated_cost;
        self.cost_saved += m.cost_saved;
    }
}

/// Savings for one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySavings {
    pub date: NaiveDate,
    pub turns: usize,
    pub tokens_saved: usize,
    pub cost_saved: f64,
}
