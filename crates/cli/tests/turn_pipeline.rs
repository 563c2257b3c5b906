//! End-to-end tests for the turn pipeline.
//!
//! These drive whole turns across crates: config parsing, history
//! optimization with a real summarizer wrapper, prompt assembly, tool
//! chains, suggestions and cost tracking.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokenwise_agent::{
    HeuristicTokenCounter, RagContextOptimizer, RelevanceScorer, RetrievedDocument, TurnPipeline,
    TurnRequest,
};
use tokenwise_config::AppConfig;
use tokenwise_core::llm::CompletionSummarizer;
use tokenwise_core::{
    CompletionClient, CompletionError, CompletionRequest, CompletionResponse, DomainEvent, Role,
    Tool, ToolError, ToolRegistry, Usage,
};
use tokenwise_workflow::{ChainStatus, StepStatus, ToolStepSpec};
use tokio_util::sync::CancellationToken;

// ── Mocks ────────────────────────────────────────────────────────────────

/// Returns the same reply for every request and counts calls.
struct ScriptedClient {
    reply: String,
    calls: std::sync::Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    fn text(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn last_request(&self) -> CompletionRequest {
        self.calls.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let model = request.model.clone();
        self.calls.lock().unwrap().push(request);
        Ok(CompletionResponse {
            content: self.reply.clone(),
            usage: Some(Usage {
                prompt_tokens: 50,
                completion_tokens: 8,
                total_tokens: 58,
            }),
            model,
        })
    }
}

struct ResourceScanTool;

#[async_trait]
impl Tool for ResourceScanTool {
    fn name(&self) -> &str {
        "resource_scan"
    }
    fn description(&self) -> &str {
        "Lists non-compliant resources"
    }
    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let scope = arguments["scope"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("scope is required".into()))?;
        Ok(json!({ "scope": scope, "violations": 2, "resources": ["st-logs", "st-backup"] }))
    }
}

/// Unavailable on the first call, then succeeds.
struct FlakyReportTool {
    calls: AtomicU32,
}

#[async_trait]
impl Tool for FlakyReportTool {
    fn name(&self) -> &str {
        "report"
    }
    fn description(&self) -> &str {
        "Renders a findings report"
    }
    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ToolError::Unavailable {
                tool_name: "report".into(),
                reason: "renderer starting".into(),
            });
        }
        Ok(json!({ "rendered": true, "input": arguments }))
    }
}

fn registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ResourceScanTool),
        Arc::new(FlakyReportTool {
            calls: AtomicU32::new(0),
        }),
    ];
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(registry)
}

const CONFIG: &str = r#"
default_model = "openai/gpt-4o-mini"

[agents.compliance.history]
max_tokens = 300
pruning_strategy = "summarize"
min_messages_to_keep = 2
summary_max_tokens = 60

[agents.compliance.prompt]
max_context_window = 4000
reserved_completion_tokens = 500
safety_buffer_percentage = 5.0

[agents.compliance.rag]
max_rag_tokens = 200
min_relevance_score = 0.3
max_results = 2

[orchestrator]
max_attempts = 3
initial_backoff_ms = 10
max_backoff_ms = 100
"#;

fn pipeline(client: Arc<ScriptedClient>) -> TurnPipeline {
    let config = AppConfig::from_toml(CONFIG).unwrap();
    let summarizer = CompletionSummarizer::new(
        ScriptedClient::text("Earlier turns recorded storage encryption findings."),
        "openai/gpt-4o-mini",
    );
    TurnPipeline::new(config, client, registry(), Some(Arc::new(summarizer)))
}

fn finding(i: usize) -> String {
    format!("turn {i}: {}", "storage account encryption finding ".repeat(10))
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_long_conversation_is_summarized_and_savings_recorded() {
    let client = Arc::new(ScriptedClient::text("Recorded finding."));
    let pipeline = pipeline(client.clone());
    let mut events = pipeline.event_bus().subscribe();
    let cancel = CancellationToken::new();

    for i in 0..4 {
        pipeline
            .run_turn(TurnRequest::new("conv-e2e", "compliance", finding(i)), &cancel)
            .await
            .unwrap();
    }

    assert_eq!(client.calls(), 4);

    // The model saw a summary in place of the oldest message.
    let sent = client.last_request();
    assert!(sent.messages.iter().any(|m| {
        m.role == Role::System && m.content.contains("Summary of earlier conversation")
    }));

    // Storage keeps everything.
    let stored = pipeline.conversation("conv-e2e").await.unwrap();
    assert_eq!(stored.messages.len(), 8);
    assert!(stored.messages.iter().all(|m| m.role != Role::System));

    let mut history_events = Vec::new();
    while let Ok(e) = events.try_recv() {
        if let DomainEvent::HistoryOptimized {
            strategy,
            tokens_before,
            tokens_after,
            ..
        } = e.as_ref()
        {
            history_events.push((strategy.clone(), *tokens_before, *tokens_after));
        }
    }
    assert_eq!(history_events.len(), 1);
    assert_eq!(history_events[0].0, "summarize");
    assert!(history_events[0].2 < history_events[0].1);

    let costs = pipeline.costs();
    let records = costs.records_for_conversation("conv-e2e");
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].tokens_saved, 0);
    assert!(records[3].tokens_saved > 0);
    assert!(records[3].summarization_tokens > 0);
    assert_eq!(records[3].completion_tokens, 8);

    let summary = costs.optimization_summary(Some("compliance"), None).unwrap();
    assert_eq!(summary.turns, 4);
    assert_eq!(summary.tokens_saved, records[3].tokens_saved);
    assert!(summary.cost_saved > 0.0);
}

#[tokio::test(start_paused = true)]
async fn e2e_tool_chain_retries_and_threads_context() {
    let client = Arc::new(ScriptedClient::text("Scanning and reporting."));
    let pipeline = pipeline(client);
    let mut events = pipeline.event_bus().subscribe();

    let steps = vec![
        ToolStepSpec::new("resource_scan", json!({ "scope": "prod" })).output_key("scan"),
        ToolStepSpec::new(
            "report",
            json!({ "count": "${scan.violations}", "title": "Findings for ${scan.scope}" }),
        )
        .requires("scan"),
    ];

    let out = pipeline
        .run_turn(
            TurnRequest::new("conv-tools", "compliance", "scan prod and write a report")
                .with_tool_steps(steps),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let chain = out.chain.unwrap();
    assert_eq!(chain.status, ChainStatus::Completed);
    assert!((chain.success_rate() - 1.0).abs() < f64::EPSILON);
    assert_eq!(chain.steps[1].status, StepStatus::Completed);
    assert_eq!(chain.steps[1].attempts, 2);
    assert_eq!(chain.context["report"]["input"]["count"], 2);
    assert_eq!(chain.context["report"]["input"]["title"], "Findings for prod");

    let stored = pipeline.conversation("conv-tools").await.unwrap();
    let tool_messages: Vec<_> = stored
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 2);

    assert!(
        out.suggestions
            .iter()
            .any(|s| s.title == "Review resource_scan results")
    );

    let mut step_events = 0;
    let mut chain_events = 0;
    while let Ok(e) = events.try_recv() {
        match e.as_ref() {
            DomainEvent::ToolStepFinished { .. } => step_events += 1,
            DomainEvent::ToolChainFinished { status, .. } => {
                chain_events += 1;
                assert_eq!(status, "completed");
            }
            _ => {}
        }
    }
    assert_eq!(step_events, 2);
    assert_eq!(chain_events, 1);
}

#[tokio::test]
async fn e2e_rag_results_are_ranked_and_bounded() {
    let client = Arc::new(ScriptedClient::text("Encryption is enabled on both."));
    let pipeline = pipeline(client.clone());
    let ranker = RagContextOptimizer::new(
        Arc::new(HeuristicTokenCounter::new()),
        RelevanceScorer::default(),
    );

    let query = "storage encryption status";
    let documents = vec![
        RetrievedDocument {
            title: Some("Storage encryption".into()),
            content: "All storage accounts enforce encryption at rest. ".repeat(4),
            ..Default::default()
        },
        RetrievedDocument {
            title: Some("Network rules".into()),
            content: "Inbound traffic is limited to the corporate range.".into(),
            ..Default::default()
        },
        RetrievedDocument {
            title: None,
            content: "Storage status: encryption keys rotate every 90 days.".into(),
            ..Default::default()
        },
    ];
    let ranked = ranker.rank(query, documents);

    let out = pipeline
        .run_turn(
            TurnRequest::new("conv-rag", "compliance", query).with_rag_results(ranked),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let rag = &out.prompt.rag_context;
    assert_eq!(rag.len(), 2);
    assert!(rag.iter().all(|r| r.relevance_score >= 0.3));
    assert!(rag.iter().map(|r| r.token_count).sum::<usize>() <= 200);
    assert!(rag.windows(2).all(|w| w[0].relevance_score >= w[1].relevance_score));

    let system = &client.last_request().messages[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("## Relevant context"));
    assert!(!system.content.contains("corporate range"));
}

#[tokio::test]
async fn e2e_cost_records_export_and_purge() {
    let pipeline = pipeline(Arc::new(ScriptedClient::text("ok")));
    for conv in ["conv-1", "conv-2"] {
        pipeline
            .run_turn(
                TurnRequest::new(conv, "triage", "hello").with_task_id("task-7"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
    }

    let costs = pipeline.costs();
    let exported: Value = serde_json::from_str(&costs.export_json().unwrap()).unwrap();
    let records = exported.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["agent_type"], "triage");
    assert_eq!(records[0]["task_id"], "task-7");

    let trend = costs.daily_trend(None).unwrap();
    assert_eq!(trend.iter().map(|d| d.turns).sum::<usize>(), 2);

    let later = chrono::Utc::now() + chrono::Duration::days(365);
    assert_eq!(costs.purge_expired(later), 2);
    assert!(costs.is_empty());
}

#[tokio::test(start_paused = true)]
async fn e2e_concurrent_conversations_keep_their_own_history() {
    let pipeline = Arc::new(pipeline(Arc::new(ScriptedClient::text("ok"))));

    let mut handles = Vec::new();
    for conv in 0..4 {
        let p = pipeline.clone();
        handles.push(tokio::spawn(async move {
            for turn in 0..3 {
                p.run_turn(
                    TurnRequest::new(
                        format!("conv-{conv}"),
                        "compliance",
                        format!("conv {conv} turn {turn}"),
                    ),
                    &CancellationToken::new(),
                )
                .await
                .unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    for conv in 0..4 {
        let stored = pipeline.conversation(&format!("conv-{conv}")).await.unwrap();
        let user_turns: Vec<&str> = stored
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(
            user_turns,
            vec![
                format!("conv {conv} turn 0"),
                format!("conv {conv} turn 1"),
                format!("conv {conv} turn 2"),
            ]
        );
    }
}
