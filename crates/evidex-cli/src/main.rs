//! Evidex — medical evidence ingestion CLI.
//! Entry point for the `evidex` binary.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod topics;

use commands::{bulk, check_env, ingest, monitor, scale};

#[derive(Parser)]
#[command(name = "evidex")]
#[command(version)]
#[command(about = "PubMed evidence ingestion pipeline")]
#[command(after_help = "\
QUICK START:
  evidex check-env                          # Verify required environment
  evidex ingest --topic \"heart failure\"     # Small topic run
  evidex scale --topics-file topics.txt     # Checkpointed multi-worker run
  evidex bulk --dir ./dumps                 # Ingest local PubMed XML dumps
  evidex monitor                            # Watch a running ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one or more topics in-process (small runs)
    Ingest(ingest::IngestArgs),
    /// Checkpointed, multi-worker topic ingestion for large runs
    Scale(scale::ScaleArgs),
    /// Ingest local PubMed XML dump files
    Bulk(bulk::BulkArgs),
    /// Read-only terminal view of a running ingestion's checkpoint
    Monitor(monitor::MonitorArgs),
    /// Verify required environment variables without printing values
    CheckEnv,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("evidex=info,warn")),
        )
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Ingest(args) => ingest::run(args).await?,
        Commands::Scale(args) => scale::run(args).await?,
        Commands::Bulk(args) => bulk::run(args).await?,
        Commands::Monitor(args) => monitor::run(args).await?,
        Commands::CheckEnv => check_env::run()?,
    };
    std::process::exit(exit_code);
}
