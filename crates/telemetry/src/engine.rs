//! Thread-safe cost tracker: prices turns, appends records, and serves
//! savings reports.

use crate::TelemetryError;
use crate::model::*;
use crate::pricing::PricingTable;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tokenwise_config::TelemetryConfig;

/// Append-only store of [`AgentCostMetrics`].
///
/// Writers only ever push; the one operation that removes records is
/// [`CostTracker::purge_expired`], a maintenance call that is never made
/// from the turn path.
pub struct CostTracker {
    pricing: PricingTable,
    records: RwLock<Vec<AgentCostMetrics>>,
    enabled: bool,
    retention_days: u32,
    count_summary_tokens: bool,
}

impl CostTracker {
    /// Create a tracker with default pricing and 90-day retention.
    pub fn new() -> Self {
        Self::with_pricing(PricingTable::with_defaults())
    }

    pub fn with_pricing(pricing: PricingTable) -> Self {
        Self {
            pricing,
            records: RwLock::new(Vec::new()),
            enabled: true,
            retention_days: 90,
            count_summary_tokens: false,
        }
    }

    /// Build from `[telemetry]` config. `count_summary_tokens` comes from
    /// `[optimization]`.
    pub fn from_config(config: &TelemetryConfig, count_summary_tokens: bool) -> Self {
        Self {
            pricing: PricingTable::with_overrides(&config.custom_pricing),
            records: RwLock::new(Vec::new()),
            enabled: config.enabled,
            retention_days: config.retention_days,
            count_summary_tokens,
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn raw token counts into a priced record.
    ///
    /// Summarization tokens are kept in their own column. They count
    /// against the optimized prompt (and so reduce `tokens_saved`) only
    /// when `count_summary_tokens` is set.
    pub fn price_turn(&self, usage: TurnUsage) -> AgentCostMetrics {
        let charged_prompt = if self.count_summary_tokens {
            usage.optimized_prompt_tokens + usage.summarization_tokens
        } else {
            usage.optimized_prompt_tokens
        };
        let tokens_saved = usage.original_prompt_tokens.saturating_sub(charged_prompt);

        let original_cost = self
            .pricing
            .prompt_cost(&usage.model, usage.original_prompt_tokens);
        let prompt_cost = self.pricing.prompt_cost(&usage.model, charged_prompt);
        let completion_cost = self
            .pricing
            .completion_cost(&usage.model, usage.completion_tokens);

        AgentCostMetrics {
            agent_type: usage.agent_type,
            task_id: usage.task_id,
            conversation_id: usage.conversation_id,
            timestamp: Utc::now(),
            original_prompt_tokens: usage.original_prompt_tokens,
            optimized_prompt_tokens: usage.optimized_prompt_tokens,
            tokens_saved,
            completion_tokens: usage.completion_tokens,
            summarization_tokens: usage.summarization_tokens,
            estimated_cost: prompt_cost + completion_cost,
            cost_saved: (original_cost - prompt_cost).max(0.0),
        }
    }

    /// Append a turn record. A disabled tracker drops it.
    pub fn record_turn(&self, metrics: AgentCostMetrics) {
        if !self.enabled {
            tracing::debug!(
                conversation_id = %metrics.conversation_id,
                "Cost tracking disabled, dropping turn record"
            );
            return;
        }
        tracing::debug!(
            agent_type = %metrics.agent_type,
            conversation_id = %metrics.conversation_id,
            tokens_saved = metrics.tokens_saved,
            estimated_cost = metrics.estimated_cost,
            "Recorded turn cost"
        );
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(metrics);
    }

    /// Aggregate savings, optionally filtered by agent type and date range.
    pub fn optimization_summary(
        &self,
        agent_type: Option<&str>,
        range: Option<DateRange>,
    ) -> Result<OptimizationSummary, TelemetryError> {
        check_range(range.as_ref())?;
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);

        let mut summary = OptimizationSummary {
            agent_type: agent_type.map(str::to_string),
            range,
            ..Default::default()
        };
        for m in records.iter() {
            if agent_type.is_some_and(|a| a != m.agent_type) {
                continue;
            }
            if range.is_some_and(|r| !r.contains(m.timestamp)) {
                continue;
            }
            summary.add(m);
        }
        Ok(summary.finish())
    }

    /// Savings per UTC calendar day, oldest first.
    pub fn daily_trend(
        &self,
        range: Option<DateRange>,
    ) -> Result<Vec<DailySavings>, TelemetryError> {
        check_range(range.as_ref())?;
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);

        let mut days: BTreeMap<NaiveDate, DailySavings> = BTreeMap::new();
        for m in records
            .iter()
            .filter(|m| range.is_none_or(|r| r.contains(m.timestamp)))
        {
            let date = m.timestamp.date_naive();
            let day = days.entry(date).or_insert_with(|| DailySavings {
                date,
                turns: 0,
                tokens_saved: 0,
                cost_saved: 0.0,
            });
            day.turns += 1;
            day.tokens_saved += m.tokens_saved;
            day.cost_saved += m.cost_saved;
        }
        Ok(days.into_values().collect())
    }

    /// All records for one conversation, in insertion order.
    pub fn records_for_conversation(&self, conversation_id: &str) -> Vec<AgentCostMetrics> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// The most recent `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AgentCostMetrics> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop records older than `retention_days` before `now`.
    ///
    /// Returns the number removed. Maintenance only.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(i64::from(self.retention_days));
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|m| m.timestamp >= cutoff);
        let removed = before - records.len();
        if removed > 0 {
            tracing::info!(
                removed,
                retention_days = self.retention_days,
                "Purged expired cost records"
            );
        }
        removed
    }

    /// Serialize every record as a JSON array.
    pub fn export_json(&self) -> Result<String, TelemetryError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(serde_json::to_string_pretty(&*records)?)
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn check_range(range: Option<&DateRange>) -> Result<(), TelemetryError> {
    match range {
        Some(r) if !r.is_valid() => Err(TelemetryError::InvalidRange {
            start: r.start,
            end: r.end,
        }),
        _ => Ok(()),
    }
}
