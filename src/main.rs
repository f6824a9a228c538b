use anyhow::Result;
use clap::{Parser, Subcommand};
use continuity_store::{ContinuityConfig, SessionRestorer, StreamWriter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "continuity-store", about = "Inspect and operate on a continuity store")]
struct Cli {
    /// Root directory of the continuity store.
    #[arg(long, global = true, env = "CONTINUITY_STORAGE_PATH")]
    storage_path: PathBuf,

    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-verify the hash chain across every stream file.
    Validate,
    /// Print totals, file count, and disk usage.
    Stats,
    /// Report whether implicit resumption would trigger right now.
    RestoreCheck {
        #[arg(long, default_value_t = 30)]
        threshold_minutes: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = ContinuityConfig::new(cli.storage_path);

    match cli.command {
        Commands::Validate => run_validate(&config),
        Commands::Stats => run_stats(config).await,
        Commands::RestoreCheck { threshold_minutes } => {
            run_restore_check(config, threshold_minutes).await
        }
    }
}

fn run_validate(config: &ContinuityConfig) -> Result<()> {
    let report = continuity_store::validate_stream(&config.resolved_storage_path())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_stats(config: ContinuityConfig) -> Result<()> {
    let writer = StreamWriter::new(config);
    writer.initialize().await?;
    let stats = writer.get_stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    writer.close().await?;
    Ok(())
}

async fn run_restore_check(config: ContinuityConfig, threshold_minutes: u64) -> Result<()> {
    let writer = StreamWriter::new(config);
    writer.initialize().await?;
    let restorer = SessionRestorer::new(&writer);
    let result = restorer.detect_implicit_resumption(threshold_minutes).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    writer.close().await?;
    Ok(())
}
