//! Token and cost accounting for tokenwise turns.
//!
//! Every completed turn is priced against a model pricing table and
//! appended to an in-memory log. Reports aggregate the log by agent type,
//! date range, and day.

pub mod engine;
pub mod model;
pub mod pricing;

pub use engine::CostTracker;
pub use model::{
    AgentCostMetrics, AgentSavings, DailySavings, DateRange, OptimizationSummary, TurnUsage,
};
pub use pricing::{ModelPricing, PricingTable};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid date range: {start} is after {end}")]
    InvalidRange {
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    },

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
