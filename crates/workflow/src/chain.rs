//! Tool chain state: steps, statuses, and the chain result record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-step state machine: `pending → running → {completed | failed | skipped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Chain-level state: `running → {completed | partial_success | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Running,
    Completed,
    PartialSuccess,
    Failed,
}

impl std::fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::PartialSuccess => write!(f, "partial_success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A step as declared by the caller, before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStepSpec {
    pub tool_name: String,

    /// JSON arguments. String values may reference the shared context with
    /// `${key}`; see [`crate::template`].
    #[serde(default)]
    pub arguments: serde_json::Value,

    /// Context keys that must exist before this step runs.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Context key the result is stored under. Defaults to the tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
}

impl ToolStepSpec {
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            requires: Vec::new(),
            output_key: None,
        }
    }

    pub fn requires(mut self, key: impl Into<String>) -> Self {
        self.requires.push(key.into());
        self
    }

    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }
}

/// One step inside a [`ToolChainResult`], mutated in place as it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStep {
    pub index: usize,
    pub tool_name: String,
    /// Declared arguments, replaced by the resolved ones once the step starts.
    pub arguments: serde_json::Value,
    pub requires: Vec<String>,
    pub output_key: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Invocations made, including retries.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolStep {
    pub(crate) fn from_spec(index: usize, spec: ToolStepSpec) -> Self {
        let output_key = spec.output_key.unwrap_or_else(|| spec.tool_name.clone());
        Self {
            index,
            tool_name: spec.tool_name,
            arguments: spec.arguments,
            requires: spec.requires,
            output_key,
            status: StepStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
        }
    }

    pub(crate) fn start(&mut self, resolved_arguments: serde_json::Value) {
        self.arguments = resolved_arguments;
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn complete(&mut self, result: serde_json::Value) {
        self.status = StepStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: String) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn skip(&mut self, reason: String) {
        self.status = StepStatus::Skipped;
        self.error = Some(reason);
        self.completed_at = Some(Utc::now());
    }

    /// Wall-clock time between start and completion, if the step ran.
    pub fn duration_ms(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.completed_at?);
        Some(end.signed_duration_since(start).num_milliseconds().max(0) as u64)
    }
}

/// A failed step, as recorded in [`ToolChainResult::errors`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainError {
    pub step_index: usize,
    pub tool_name: String,
    /// Error kind, e.g. "timeout" or "not_found".
    pub kind: String,
    pub message: String,
}

/// The result of executing a tool chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChainResult {
    pub chain_id: String,
    pub conversation_id: String,
    pub steps: Vec<ToolStep>,
    pub status: ChainStatus,
    /// Shared key/value map threaded between steps.
    pub context: serde_json::Map<String, serde_json::Value>,
    pub errors: Vec<ChainError>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolChainResult {
    pub(crate) fn new(conversation_id: &str, specs: Vec<ToolStepSpec>) -> Self {
        Self {
            chain_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            steps: specs
                .into_iter()
                .enumerate()
                .map(|(i, spec)| ToolStep::from_spec(i, spec))
                .collect(),
            status: ChainStatus::Running,
            context: serde_json::Map::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn completed_steps(&self) -> usize {
        self.count(StepStatus::Completed)
    }

    pub fn failed_steps(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    pub fn skipped_steps(&self) -> usize {
        self.count(StepStatus::Skipped)
    }

    fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// `completed / total`, valid at any point during the run. An empty
    /// chain has nothing left to do and reports 1.0.
    pub fn success_rate(&self) -> f64 {
        if self.steps.is_empty() {
            return 1.0;
        }
        self.completed_steps() as f64 / self.total_steps() as f64
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ChainStatus::Running
    }

    /// Derive the terminal status. Every step must be terminal by now.
    pub(crate) fn finish(&mut self) {
        let completed = self.completed_steps();
        self.status = if completed == self.total_steps() {
            ChainStatus::Completed
        } else if completed == 0 {
            ChainStatus::Failed
        } else {
            ChainStatus::PartialSuccess
        };
        self.completed_at = Some(Utc::now());
    }
}
