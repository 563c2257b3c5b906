//! Sequential tool chain executor.
//!
//! Steps run strictly in declared order. Each invocation is bounded by a
//! per-step timeout and transient failures are retried with capped
//! exponential backoff. Cancellation is observed while a tool runs and
//! while backing off; the running step is then failed and the rest skipped,
//! so no step is ever left `running`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokenwise_config::OrchestratorConfig;
use tokenwise_core::{DomainEvent, EventBus, ToolError, ToolInvoker};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{ChainError, StepStatus, ToolChainResult, ToolStepSpec};
use crate::template;

/// What happens to later steps when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Attempt every later step; they may be independent.
    #[default]
    Continue,
    /// Skip every later step.
    Abort,
}

/// Runtime settings derived from `[orchestrator]`.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub step_timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub failure_policy: FailurePolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let failure_policy = match config.failure_policy.as_str() {
            "abort" => FailurePolicy::Abort,
            _ => FailurePolicy::Continue,
        };
        Self {
            step_timeout: Duration::from_secs(config.step_timeout_secs),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            backoff_multiplier: config.backoff_multiplier,
            failure_policy,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX));
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Executes tool chains against a [`ToolInvoker`].
pub struct ToolChainOrchestrator {
    invoker: Arc<dyn ToolInvoker>,
    settings: OrchestratorSettings,
    events: Option<Arc<EventBus>>,
}

impl ToolChainOrchestrator {
    pub fn new(invoker: Arc<dyn ToolInvoker>, settings: OrchestratorSettings) -> Self {
        Self {
            invoker,
            settings,
            events: None,
        }
    }

    /// Publish step and chain events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Execute `steps` in order and return the terminal chain record.
    pub async fn execute_chain(
        &self,
        steps: Vec<ToolStepSpec>,
        conversation_id: &str,
        cancel: &CancellationToken,
    ) -> ToolChainResult {
        let mut chain = ToolChainResult::new(conversation_id, steps);
        info!(
            chain_id = %chain.chain_id,
            conversation_id,
            steps = chain.total_steps(),
            "Starting tool chain"
        );

        // Reason given to every remaining step once the chain stops early.
        let mut halted: Option<String> = None;

        for i in 0..chain.steps.len() {
            if halted.is_none() && cancel.is_cancelled() {
                halted = Some("chain cancelled before step started".into());
            }
            if let Some(reason) = &halted {
                chain.steps[i].skip(reason.clone());
                self.step_finished(&chain, i);
                continue;
            }

            let step = &chain.steps[i];
            let mut missing: Vec<String> = step
                .requires
                .iter()
                .filter(|key| template::lookup(&chain.context, key).is_none())
                .cloned()
                .collect();
            let resolved = match template::resolve_arguments(&step.arguments, &chain.context) {
                Ok(args) => Some(args),
                Err(keys) => {
                    missing.extend(keys);
                    None
                }
            };
            let resolved = match resolved {
                Some(args) if missing.is_empty() => args,
                _ => {
                    missing.sort();
                    missing.dedup();
                    debug!(
                        chain_id = %chain.chain_id,
                        step = i,
                        tool = %step.tool_name,
                        missing = ?missing,
                        "Skipping step with missing inputs"
                    );
                    chain.steps[i].skip(format!("missing context keys: {}", missing.join(", ")));
                    self.step_finished(&chain, i);
                    continue;
                }
            };

            chain.steps[i].start(resolved.clone());
            let tool_name = chain.steps[i].tool_name.clone();
            let (outcome, attempts) = self.invoke_with_retry(&tool_name, resolved, cancel).await;
            chain.steps[i].attempts = attempts;

            match outcome {
                Ok(value) => {
                    let key = chain.steps[i].output_key.clone();
                    chain.context.insert(key, value.clone());
                    chain.steps[i].complete(value);
                }
                Err(err) => {
                    warn!(
                        chain_id = %chain.chain_id,
                        step = i,
                        tool = %tool_name,
                        attempts,
                        error = %err,
                        "Tool step failed"
                    );
                    chain.errors.push(ChainError {
                        step_index: i,
                        tool_name: tool_name.clone(),
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    });
                    chain.steps[i].fail(err.to_string());

                    if matches!(err, ToolError::Cancelled(_)) {
                        halted = Some("chain cancelled".into());
                    } else if self.settings.failure_policy == FailurePolicy::Abort {
                        halted = Some(format!("chain aborted after step {i} failed"));
                    }
                }
            }
            self.step_finished(&chain, i);
        }

        chain.finish();
        info!(
            chain_id = %chain.chain_id,
            status = %chain.status,
            completed = chain.completed_steps(),
            failed = chain.failed_steps(),
            skipped = chain.skipped_steps(),
            "Tool chain finished"
        );
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::ToolChainFinished {
                chain_id: chain.chain_id.clone(),
                conversation_id: chain.conversation_id.clone(),
                status: chain.status.to_string(),
                success_rate: chain.success_rate(),
                timestamp: Utc::now(),
            });
        }
        chain
    }

    /// Invoke one tool, retrying transient failures.
    ///
    /// Returns the outcome plus the number of invocations made.
    async fn invoke_with_retry(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> (Result<serde_json::Value, ToolError>, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ToolError::Cancelled(tool_name.to_string())),
                res = tokio::time::timeout(
                    self.settings.step_timeout,
                    self.invoker.invoke(tool_name, arguments.clone()),
                ) => match res {
                    Ok(r) => r,
                    Err(_) => Err(ToolError::Timeout {
                        tool_name: tool_name.to_string(),
                        timeout_secs: self.settings.step_timeout.as_secs(),
                    }),
                },
            };

            match outcome {
                Err(err) if err.is_retryable() && attempt < self.settings.max_attempts => {
                    let delay = self.settings.backoff_for(attempt);
                    warn!(
                        tool = tool_name,
                        attempt,
                        max_attempts = self.settings.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient tool failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return (Err(ToolError::Cancelled(tool_name.to_string())), attempt);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return (other, attempt),
            }
        }
    }

    fn step_finished(&self, chain: &ToolChainResult, index: usize) {
        let step = &chain.steps[index];
        debug_assert!(step.status != StepStatus::Running);
        debug!(
            chain_id = %chain.chain_id,
            step = index,
            tool = %step.tool_name,
            status = %step.status,
            "Step finished"
        );
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::ToolStepFinished {
                chain_id: chain.chain_id.clone(),
                step_index: index,
                tool_name: step.tool_name.clone(),
                status: step.status.to_string(),
                duration_ms: step.duration_ms().unwrap_or(0),
                timestamp: Utc::now(),
            });
        }
    }
}
