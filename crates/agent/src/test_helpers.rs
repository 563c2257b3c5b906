//! Shared mocks for agent tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokenwise_core::{
    CompletionClient, CompletionError, CompletionRequest, CompletionResponse, Summarizer, Tool,
    ToolError, Usage,
};

/// Returns scripted replies in order, then repeats the last one.
///
/// Records every request and tracks how many calls overlap.
pub struct ScriptedCompletionClient {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    last: Mutex<String>,
    delay: Option<Duration>,
    seen: Mutex<Vec<CompletionRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedCompletionClient {
    pub fn new(replies: Vec<Result<String, CompletionError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new("ok".into()),
            delay: None,
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn text(reply: &str) -> Self {
        Self::new(vec![Ok(reply.to_string())])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let model = request.model.clone();
        self.seen.lock().unwrap().push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.replies.lock().unwrap().pop_front();
        let reply = match next {
            Some(Ok(text)) => {
                *self.last.lock().unwrap() = text.clone();
                Ok(text)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().unwrap().clone()),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        reply.map(|content| CompletionResponse {
            content,
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            }),
            model,
        })
    }
}

/// Always returns the same summary.
pub struct FixedSummarizer {
    summary: String,
    calls: AtomicUsize,
}

impl FixedSummarizer {
    pub fn new(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for FixedSummarizer {
    async fn summarize(&self, _text: &str, _max_tokens: usize) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.summary.clone())
    }
}

pub struct FailingSummarizer;

#[async_trait]
impl Summarizer for FailingSummarizer {
    async fn summarize(&self, _text: &str, _max_tokens: usize) -> Result<String, CompletionError> {
        Err(CompletionError::Unavailable("summarizer offline".into()))
    }
}

/// Sleeps before answering; used to hit timeouts and cancellation.
pub struct SlowSummarizer {
    delay: Duration,
}

impl SlowSummarizer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Summarizer for SlowSummarizer {
    async fn summarize(&self, _text: &str, _max_tokens: usize) -> Result<String, CompletionError> {
        tokio::time::sleep(self.delay).await;
        Ok("late summary".into())
    }
}

/// Returns `{ "tool": name, "input": arguments }`.
pub struct EchoTool(pub &'static str);

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        self.0
    }
    fn description(&self) -> &str {
        "Returns its arguments"
    }
    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        Ok(json!({ "tool": self.0, "input": arguments }))
    }
}

/// Fails permanently on every call.
pub struct BrokenTool(pub &'static str);

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        self.0
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: self.0.to_string(),
            reason: "resource group not found".into(),
        })
    }
}
