//! `tokenwise health`: evaluate a conversation against its history budget.

use std::path::Path;
use std::sync::Arc;

use tokenwise_agent::{ConversationHistoryOptimizer, HeuristicTokenCounter};
use tokenwise_config::AppConfig;

pub async fn run(history: &Path, agent: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let profile = config.profile(agent);
    let model = if profile.prompt.model_name.is_empty() {
        config.default_model.as_str()
    } else {
        profile.prompt.model_name.as_str()
    };

    let messages = super::read_history(history)?;
    let optimizer = ConversationHistoryOptimizer::from_config(
        Arc::new(HeuristicTokenCounter::new()),
        &config.optimization,
    );
    let health = optimizer.evaluate_messages(&messages, profile.history.max_tokens, model);

    println!("Conversation health ({agent}, {model})");
    println!("  Messages:     {}", health.total_messages);
    println!(
        "  Tokens:       {} / {} ({:.1}%)",
        health.estimated_tokens,
        health.token_budget,
        health.utilization * 100.0
    );
    println!(
        "  Threshold:    {:.0}%",
        config.optimization.health_threshold * 100.0
    );
    println!(
        "  Status:       {}",
        if health.needs_optimization {
            format!("needs optimization ({})", profile.history.pruning_strategy)
        } else {
            "ok".to_string()
        }
    );

    let switches = optimizer.detect_topic_switches(&messages);
    if !switches.is_empty() {
        println!();
        println!("  Topic switches:");
        for s in &switches {
            println!("    at message {:>4}: {}", s.index, s.label);
        }
    }

    Ok(())
}
