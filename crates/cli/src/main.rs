//! tokenwise CLI: the main entry point.
//!
//! Commands:
//! - `onboard`  : write the default config file
//! - `profile`  : show the optimization profile for an agent type
//! - `health`   : evaluate a stored conversation against its budget
//! - `optimize` : assemble an optimized prompt offline
//! - `pricing`  : list model prices used for cost estimates

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "tokenwise",
    about = "tokenwise: token-budgeted prompt optimization",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Onboard {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Print the optimization profile used for an agent type
    Profile {
        /// Agent type, e.g. "compliance"
        agent: String,
    },

    /// Evaluate conversation health
    Health {
        /// JSON file with an array of {"role", "content"} messages
        #[arg(long)]
        history: PathBuf,

        /// Agent type selecting the profile
        #[arg(short, long, default_value = "default")]
        agent: String,
    },

    /// Assemble an optimized prompt without calling a model
    Optimize {
        /// JSON file with an array of {"role", "content"} messages
        #[arg(long)]
        history: Option<PathBuf>,

        /// JSON file with an array of {"title", "content"} documents
        #[arg(long)]
        rag: Option<PathBuf>,

        /// The incoming user message
        #[arg(short, long)]
        message: String,

        /// System prompt
        #[arg(short, long, default_value = "")]
        system: String,

        /// Agent type selecting the profile
        #[arg(short, long, default_value = "default")]
        agent: String,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List model pricing (per 1M tokens)
    Pricing,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard { force } => commands::onboard::run(force).await?,
        Commands::Profile { agent } => commands::profile::run(&agent).await?,
        Commands::Health { history, agent } => commands::health::run(&history, &agent).await?,
        Commands::Optimize {
            history,
            rag,
            message,
            system,
            agent,
            json,
        } => {
            commands::optimize::run(commands::optimize::OptimizeArgs {
                history,
                rag,
                message,
                system,
                agent,
                json,
            })
            .await?
        }
        Commands::Pricing => commands::pricing::run().await?,
    }

    Ok(())
}
