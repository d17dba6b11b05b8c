//! Harness Runner
//!
//! Runs a named end-to-end scenario against a docker compose cluster:
//! - Reads `HARNESS_*` settings from the environment (and `.env`)
//! - Runs the scenario under a global timeout
//! - Always tears the cluster down, dumping logs of crashed containers

use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::time::timeout;

use harness::scenarios::TestScenarios;
use shared::logging::log_error;
use harness::{Backends, HarnessSettings, MessageFormat, StopOptions, TestCluster};

#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Integration test harness for the change-data-capture pipeline")]
struct Args {
    /// Scenario to run (smoke, snapshot, restart, outage, topics, all)
    #[arg(long, default_value = "smoke")]
    scenario: String,

    /// Scenario timeout in seconds
    #[arg(long, default_value = "300")]
    timeout_secs: u64,

    /// Format the application publishes in (json or avro)
    #[arg(long, default_value = "json")]
    format: MessageFormat,

    /// Log level for the harness crates
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Leave the cluster running after the scenario (for debugging)
    #[arg(long)]
    keep_running: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    shared::logging::init_tracing_with_level(Some(&args.log_level));

    tracing::info!("🧪 Starting integration harness");
    tracing::info!("Scenario: {}, Format: {}, Timeout: {}s", args.scenario, args.format, args.timeout_secs);

    let settings = HarnessSettings::from_env().context("reading HARNESS_* settings")?;
    let backends = Backends::docker(&settings).context("connecting to the docker daemon")?;
    let mut cluster = TestCluster::new(settings.clone(), backends);
    let scenarios = TestScenarios::new(args.format);

    let outcome = timeout(
        Duration::from_secs(args.timeout_secs),
        scenarios.run_scenario(&args.scenario, &mut cluster),
    )
    .await;

    let result = match outcome {
        Ok(Ok(())) => {
            tracing::info!("✅ Scenario '{}' completed successfully", args.scenario);
            Ok(())
        }
        Ok(Err(e)) => {
            log_error(&format!("Scenario '{}'", args.scenario), &e);
            Err(e)
        }
        Err(_) => {
            tracing::error!("⏰ Scenario '{}' timed out after {}s", args.scenario, args.timeout_secs);
            Err(anyhow::anyhow!("scenario timed out"))
        }
    };

    if args.keep_running && cluster.is_started() {
        tracing::info!("🔄 Keeping cluster running (--keep-running flag set)");
        tracing::info!("Press Ctrl+C to stop all services");
        tokio::signal::ctrl_c().await?;
    }

    tracing::info!("🛑 Shutting down cluster");
    cluster.stop(StopOptions::default()).await;

    if let Err(e) = result {
        bail!("scenario '{}' failed: {:#}", args.scenario, e);
    }

    tracing::info!("🏁 Harness completed");
    Ok(())
}
