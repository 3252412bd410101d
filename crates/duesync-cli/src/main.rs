//! DUE sync command-line interface: runs one of the six orchestrator
//! operations against the configured upstream and store, then prints the
//! run summary as JSON.

use clap::{Parser, Subcommand};
use duesync_config::{init_logging, Config};
use duesync_core::{DueNumber, RunSummary};
use duesync_pipelines::{cancellation_pair, BondedActsKind, Orchestrator};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "duesync")]
#[command(about = "Synchronizes Siscomex export declarations into the local store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover invoices with no linked DUE and full-fetch each DUE found
    DiscoverNew {
        /// Cap the number of invoices processed this run, overriding MAX_DISCOVERY_PER_RUN
        #[arg(long)]
        limit: Option<u32>,
        /// Worker pool size for this run, overriding WORKERS
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Re-probe and refresh already-known DUEs
    RefreshExisting {
        /// Cap the number of DUEs processed this run, overriding MAX_REFRESH_PER_RUN
        #[arg(long)]
        limit: Option<u32>,
        /// Worker pool size for this run, overriding WORKERS
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Run discover-new followed by refresh-existing
    Full,
    /// Force a full re-fetch of exactly one DUE number
    RefreshOne {
        /// The DUE number, e.g. 24BR0000000001
        due_number: String,
    },
    /// Refresh only the bonded-suspension or bonded-exemption acts subpayload
    RefreshBondedActs {
        /// "suspension" or "exemption"
        kind: String,
        /// DUE numbers to refresh
        due_numbers: Vec<String>,
    },
    /// Print stored counts without contacting upstream
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = match Orchestrator::bootstrap(config).await {
        Ok(orchestrator) => orchestrator,
        Err(err) => {
            error!(error = %err, "failed to start up");
            return ExitCode::FAILURE;
        }
    };

    let (cancel_token, cancel_observer) = cancellation_pair();
    let ctrl_c = tokio::signal::ctrl_c();

    let outcome = tokio::select! {
        result = run_command(&orchestrator, cli.command, cancel_observer) => result,
        _ = ctrl_c => {
            info!("received shutdown signal, cancelling run...");
            cancel_token.cancel();
            return ExitCode::FAILURE;
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_command(
    orchestrator: &Orchestrator,
    command: Commands,
    cancel: duesync_pipelines::CancellationObserver,
) -> Result<(), duesync_pipelines::PipelineError> {
    match command {
        Commands::DiscoverNew { limit, workers } => {
            let summary = orchestrator.discover_new(limit, workers, cancel).await?;
            print_summary(&summary);
        }
        Commands::RefreshExisting { limit, workers } => {
            let summary = orchestrator.refresh_existing(limit, workers, cancel).await?;
            print_summary(&summary);
        }
        Commands::Full => {
            let summary = orchestrator.full(None, None, cancel).await?;
            print_summary(&summary);
        }
        Commands::RefreshOne { due_number } => {
            let due_number = parse_due_number(&due_number)?;
            orchestrator.refresh_one(due_number, cancel).await?;
            info!("refresh-one complete");
        }
        Commands::RefreshBondedActs { kind, due_numbers } => {
            let which = match kind.to_ascii_lowercase().as_str() {
                "suspension" => BondedActsKind::Suspension,
                "exemption" => BondedActsKind::Exemption,
                other => {
                    return Err(duesync_pipelines::PipelineError::Permanent(format!(
                        "unrecognized bonded-acts kind {other:?}, expected \"suspension\" or \"exemption\""
                    )))
                }
            };
            let due_numbers = due_numbers
                .into_iter()
                .map(|raw| parse_due_number(&raw))
                .collect::<Result<Vec<_>, _>>()?;
            let summary = orchestrator.refresh_bonded_acts(due_numbers, which, cancel).await?;
            print_summary(&summary);
        }
        Commands::Status => {
            let counts = orchestrator.status().await?;
            println!(
                "{}",
                serde_json::json!({
                    "due_principal": counts.due_principal,
                    "links": counts.links,
                    "unlinked_invoice_keys": counts.unlinked_invoice_keys,
                })
            );
        }
    }
    Ok(())
}

fn parse_due_number(raw: &str) -> Result<DueNumber, duesync_pipelines::PipelineError> {
    DueNumber::new(raw.to_string())
        .map_err(|e| duesync_pipelines::PipelineError::Permanent(format!("invalid DUE number {raw:?}: {e}")))
}

fn print_summary(summary: &RunSummary) {
    println!("{}", serde_json::to_string(summary).unwrap_or_default());
}
