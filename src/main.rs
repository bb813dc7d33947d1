mod azure;
mod config;
mod error;
mod export;
mod query;

use anyhow::{Context, Result};
use azure::client::ResourceGraphClient;
use clap::Parser;
use config::Config;
use query::QueryClient;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

/// Export Azure Resource Graph query results to CSV
#[derive(Parser, Debug)]
#[command(name = "graph-export", version, about, long_about = None)]
struct Args {
    /// JSON file with required parameters
    #[arg(long)]
    params: PathBuf,
}

/// Route log lines to stdout through a non-blocking writer
///
/// The returned guard flushes pending lines when dropped, so the caller keeps
/// it alive for the whole run.
fn setup_logging() -> tracing_appender::non_blocking::WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        // --help and --version
        Err(err) if !err.use_stderr() => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _log_guard = setup_logging();
            tracing::error!("{}", usage_error(&err));
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = setup_logging();
    tracing::info!("Starting graph-export {}", env!("CARGO_PKG_VERSION"));

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Flatten a clap error into a single log line
fn usage_error(err: &clap::Error) -> String {
    err.render()
        .to_string()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

async fn run(args: &Args) -> Result<()> {
    let config = Config::load(&args.params)?;
    tracing::info!(
        "Loaded parameters for {} subscription(s)",
        config.subscription_ids.len()
    );

    tracing::info!("Creating Azure credential chain...");
    let client = ResourceGraphClient::from_env()?;

    export_query(&config, &client).await?;
    Ok(())
}

/// Run the configured query to completion and write every row to the export file
async fn export_query<C: QueryClient + ?Sized>(config: &Config, client: &C) -> Result<usize> {
    tracing::info!("Querying Azure Resource Graph...");
    let results = query::accumulate(client, &config.subscription_ids, &config.query).await?;

    export::write_csv(&results.rows, &config.export_file_path)
        .with_context(|| format!("Failed to write {}", config.export_file_path.display()))?;

    Ok(results.rows.len())
}
