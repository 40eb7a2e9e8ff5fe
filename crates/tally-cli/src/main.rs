use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tally_auth::RefreshState;
use tally_config::TallyConfig;
use tally_core::RunSummary;
use tally_engine::Engine;

mod cli;

/// Exit status of a run that finished but missed its success policy.
const RUN_FAILED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    if let Err(error) = init_tracing(cli.log_level()) {
        eprintln!("tally error: {error:#}");
        return ExitCode::FAILURE;
    }
    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(RUN_FAILED),
        Err(error) => {
            eprintln!("tally error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

/// Load configuration, run the extraction, persist rotated refresh tokens
/// and print the summary. `Ok(false)` means the success policy was not met.
async fn run(cli: &cli::Cli) -> anyhow::Result<bool> {
    let config =
        TallyConfig::load_with_dotenv(cli.config.as_deref()).context("failed to load configuration")?;
    let state_path = cli
        .state
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.destination.state_path));
    let previous = RefreshState::load(&state_path).context("failed to read refresh-token state")?;
    let policy = config.extract.success_policy;

    let engine = Engine::from_config(config, &previous).context("invalid configuration")?;
    watch_for_abort(&engine, cli);

    let outcome = engine.run().await;
    let persisted = engine
        .refresh_state()
        .await
        .save(&state_path)
        .context("failed to persist rotated refresh tokens");
    let summary = outcome.context("extraction aborted")?;

    print_summary(&summary, cli.json)?;
    persisted?;
    Ok(summary.is_success(policy))
}

/// Cancel the run on Ctrl-C or when the time budget runs out.
fn watch_for_abort(engine: &Engine, cli: &cli::Cli) {
    let cancel = engine.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping after in-flight pages");
            cancel.cancel();
        }
    });
    if let Some(budget) = cli.time_budget() {
        let cancel = engine.cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            tracing::warn!(budget_secs = budget.as_secs(), "time budget exhausted; stopping");
            cancel.cancel();
        });
    }
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TALLY_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
