use crate::commands::{run_approve, run_recompute, run_simulate};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use mlm_engine::config::AppConfig;
use mlm_engine::error::AppError;
use mlm_engine::telemetry;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "mlm-engine",
    about = "Approve package purchases and maintain referral ranks against a JSON fixture",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Approve one pending request and print the outcome
    Approve(ApproveArgs),
    /// Recompute ranks for one participant or the whole fixture
    Recompute(RecomputeArgs),
    /// Approve every pending request in the fixture and print a payout summary
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
pub(crate) struct FixtureArgs {
    /// JSON fixture with ranks, packages, participants and approval requests
    #[arg(long)]
    pub(crate) fixture: PathBuf,
}

#[derive(Args, Debug)]
pub(crate) struct ApproveArgs {
    #[command(flatten)]
    pub(crate) fixture: FixtureArgs,
    /// Identifier of the approval request
    #[arg(long)]
    pub(crate) request: String,
    /// Approval timestamp (RFC 3339). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_timestamp)]
    pub(crate) at: Option<DateTime<Utc>>,
    /// Write the earnings recorded by this run to a CSV file
    #[arg(long)]
    pub(crate) ledger_csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct RecomputeArgs {
    #[command(flatten)]
    pub(crate) fixture: FixtureArgs,
    /// Only recompute this participant
    #[arg(long)]
    pub(crate) participant: Option<String>,
    /// Print qualification reports without writing ranks
    #[arg(long)]
    pub(crate) dry_run: bool,
}

#[derive(Args, Debug)]
pub(crate) struct SimulateArgs {
    #[command(flatten)]
    pub(crate) fixture: FixtureArgs,
    /// Approval timestamp (RFC 3339). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_timestamp)]
    pub(crate) at: Option<DateTime<Utc>>,
    /// Approve requests concurrently instead of in request id order
    #[arg(long)]
    pub(crate) parallel: bool,
    /// Write the earnings recorded by this run to a CSV file
    #[arg(long)]
    pub(crate) ledger_csv: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    info!(
        ?config.environment,
        fallback_enabled = config.engine.fallback_enabled,
        "mlm engine starting"
    );

    match cli.command {
        Command::Approve(args) => run_approve(args, &config),
        Command::Recompute(args) => run_recompute(args, &config),
        Command::Simulate(args) => run_simulate(args, &config).await,
    }
}
