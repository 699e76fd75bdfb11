mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "esr", version, about = "Cache-first associative memory for AI agents")]
struct Cli {
    /// CI identity recorded on every access
    #[arg(long, global = true, default_value = "cli")]
    ci: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show cache, graph, and backend statistics
    Stats,
    /// Show full details for a single cache entry
    Inspect {
        /// Entry key
        key: String,
    },
    /// Store a thought
    Think {
        /// Thought content
        content: String,
        /// Thought type (idea, memory, fact, opinion, question, answer, plan,
        /// reflection, feeling, observation)
        #[arg(long = "type", default_value = "idea")]
        thought_type: String,
        /// Belief strength between 0.0 and 1.0
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,
        /// Key of an associated thought (repeatable)
        #[arg(long = "assoc")]
        associations: Vec<String>,
    },
    /// Gather thoughts around a topic
    Context {
        topic: String,
        /// Association hops to traverse
        #[arg(long, default_value_t = 3)]
        depth: usize,
    },
    /// Forget entries not accessed recently
    Forget {
        /// Age threshold in days (defaults to metabolism.forget_after_days)
        #[arg(long)]
        older_than_days: Option<u64>,
    },
    /// Run one metabolism sweep now
    Metabolize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = esr::config::EsrConfig::load()?;

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let ci = cli.ci.as_str();
    match cli.command {
        Command::Stats => cli::stats::stats(config).await?,
        Command::Inspect { key } => cli::inspect::inspect(config, &key).await?,
        Command::Think {
            content,
            thought_type,
            confidence,
            associations,
        } => {
            cli::think::think(config, ci, &content, &thought_type, confidence, associations)
                .await?
        }
        Command::Context { topic, depth } => {
            cli::context::context(config, ci, &topic, depth).await?
        }
        Command::Forget { older_than_days } => {
            cli::forget::forget(config, older_than_days).await?
        }
        Command::Metabolize => cli::metabolize::metabolize(config).await?,
    }

    Ok(())
}
