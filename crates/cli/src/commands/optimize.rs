//! `tokenwise optimize`: run the prompt pipeline offline.
//!
//! No model is called and no summarizer is configured, so summarizing
//! strategies fall back to pruning.

use std::path::PathBuf;
use std::sync::Arc;

use tokenwise_agent::{
    ConversationHistoryOptimizer, HeuristicTokenCounter, PromptInput, PromptOptimizer,
    RagContextOptimizer, RelevanceScorer, TokenCounter,
};
use tokenwise_config::AppConfig;
use tokio_util::sync::CancellationToken;

pub struct OptimizeArgs {
    pub history: Option<PathBuf>,
    pub rag: Option<PathBuf>,
    pub message: String,
    pub system: String,
    pub agent: String,
    pub json: bool,
}

pub async fn run(args: OptimizeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let profile = config.profile(&args.agent).clone();
    let model = if profile.prompt.model_name.is_empty() {
        config.default_model.clone()
    } else {
        profile.prompt.model_name.clone()
    };

    let messages = match &args.history {
        Some(path) => super::read_history(path)?,
        None => Vec::new(),
    };
    let documents = match &args.rag {
        Some(path) => super::read_documents(path)?,
        None => Vec::new(),
    };

    let counter: Arc<dyn TokenCounter> = Arc::new(HeuristicTokenCounter::new());
    let scorer = RelevanceScorer::from_config(&config.optimization);
    let history = Arc::new(ConversationHistoryOptimizer::from_config(
        counter.clone(),
        &config.optimization,
    ));
    let rag = Arc::new(RagContextOptimizer::new(counter.clone(), scorer).with_model(model.clone()));
    let prompt_optimizer = PromptOptimizer::new(counter, history.clone(), rag.clone());
    let cancel = CancellationToken::new();

    let mut history_opts = profile.history.clone();
    history_opts.model_name = model.clone();
    let health = history.evaluate_messages(&messages, history_opts.max_tokens, &model);
    let history_out = if health.needs_optimization {
        Some(
            history
                .optimize_history_for(&messages, &args.message, &history_opts, &cancel)
                .await?,
        )
    } else {
        None
    };
    let kept = history_out
        .as_ref()
        .map(|h| h.messages.clone())
        .unwrap_or(messages);

    let ranked = rag.rank(&args.message, documents);
    let rag_ctx = rag.optimize_context(ranked, &profile.rag)?;

    let mut prompt_opts = profile.prompt.clone();
    prompt_opts.model_name = model.clone();
    let prompt = prompt_optimizer
        .optimize_prompt(
            PromptInput {
                system_prompt: args.system,
                user_message: args.message,
                rag_context: rag_ctx.results.clone(),
                history: kept,
            },
            &prompt_opts,
            &cancel,
        )
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&prompt)?);
        return Ok(());
    }

    println!("Optimized prompt ({}, {model})", args.agent);
    if let Some(h) = &history_out {
        println!(
            "  History:   {} -> {} messages, {} -> {} tokens [{}]",
            h.original_message_count,
            h.messages.len(),
            h.original_tokens,
            h.optimized_tokens,
            h.label()
        );
    } else {
        println!(
            "  History:   {} messages, {} tokens (healthy)",
            health.total_messages, health.estimated_tokens
        );
    }
    println!(
        "  RAG:       {} selected, {} dropped, {} tokens{}",
        rag_ctx.results.len(),
        rag_ctx.dropped,
        rag_ctx.total_tokens_used,
        if rag_ctx.truncated { " (truncated)" } else { "" }
    );
    let before = prompt.original_estimate;
    let after = prompt.optimized_estimate;
    println!(
        "  Prompt:    {} -> {} tokens of {} available [{}]",
        before.total, after.total, prompt.available_budget, prompt.optimization_strategy
    );
    println!(
        "             system {} | user {} | rag {} | history {}",
        after.system, after.user, after.rag, after.history
    );
    if prompt.over_budget {
        println!();
        println!(
            "  Over budget by {} tokens: this prompt would be refused.",
            after.total - prompt.available_budget
        );
    }

    Ok(())
}
