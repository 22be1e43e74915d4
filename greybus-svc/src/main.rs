//! gb-svc-sim - replay an SVC session against the loopback fabric.

use anyhow::{Context, Result};
use clap::Parser;
use greybus_svc::sim::{LoopbackFabric, Route, Scenario, StepOutcome, run_scenario};
use greybus_svc::{Config, Interface, Svc, SvcAttributes, SvcState};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Replay a scripted Greybus SVC session.
#[derive(Parser)]
#[command(name = "gb-svc-sim")]
#[command(version = VERSION)]
#[command(about = "Replay a scripted Greybus SVC session against a loopback fabric")]
struct Args {
    /// Scenario file (JSON list of steps)
    scenario: PathBuf,

    /// SVC config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep interfaces alive instead of shutting the SVC down at the end
    #[arg(long)]
    no_shutdown: bool,
}

#[derive(Serialize)]
struct Report {
    svc: String,
    state: SvcState,
    attributes: Option<SvcAttributes>,
    outcomes: Vec<StepOutcome>,
    interfaces: Vec<Interface>,
    routes: Vec<Route>,
    allocated_device_ids: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("greybus_svc=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };

    let contents = tokio::fs::read_to_string(&args.scenario)
        .await
        .with_context(|| format!("reading scenario {}", args.scenario.display()))?;
    let scenario: Scenario = serde_json::from_str(&contents).context("parsing scenario")?;

    info!(steps = scenario.steps.len(), "gb-svc-sim v{} starting", VERSION);

    let fabric = Arc::new(LoopbackFabric::new());
    let svc = Svc::new(config, fabric.clone(), fabric.clone()).context("creating SVC")?;

    let outcomes = run_scenario(&svc, &fabric, &scenario).await;

    let report = Report {
        svc: svc.name().to_string(),
        state: svc.state(),
        attributes: svc.attributes(),
        outcomes,
        interfaces: svc.interfaces(),
        routes: fabric.routes(),
        allocated_device_ids: svc.device_ids().allocated_count(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !args.no_shutdown {
        svc.shutdown().await;
    }

    Ok(())
}
