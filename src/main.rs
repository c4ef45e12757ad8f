use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mongos_operator::backend::{load_snapshot, HookToolBackend, MemoryBackend};
use mongos_operator::controller;
use mongos_operator::model::{Event, RelationName};
use mongos_operator::process::{RecordingProcess, SnapMongos};
use mongos_operator::settings::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Handle one dispatched event to completion
    Dispatch(DispatchArgs),
    /// Replay a scenario file against the in-memory model
    Run(RunArgs),
    /// Show version and build information
    Version,
}

#[derive(Parser, Debug)]
struct DispatchArgs {
    /// Hook to handle; read from the dispatch environment when omitted
    #[arg(long, env = "JUJU_HOOK_NAME")]
    event: Option<String>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// YAML scenario file: model seed plus the events to replay
    scenario: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("mongos-operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Dispatch(dispatch_args) => run_dispatch(dispatch_args).await,
        Commands::Run(run_args) => run_scenario(run_args).await,
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

async fn run_dispatch(args: DispatchArgs) -> anyhow::Result<()> {
    init_tracing();

    let hook = match args.event {
        Some(hook) => hook,
        None => hook_from_dispatch_path()?,
    };
    let remote_unit = std::env::var("JUJU_REMOTE_UNIT").ok();
    let departing_unit = std::env::var("JUJU_DEPARTING_UNIT").ok();
    let secret_label = std::env::var("JUJU_SECRET_LABEL").ok();
    let event = Event::parse(
        &hook,
        remote_unit.as_deref(),
        departing_unit.as_deref(),
        secret_label.as_deref(),
    )
    .with_context(|| format!("unhandled hook: {}", hook))?;

    let backend = HookToolBackend::from_env()?;
    let process = SnapMongos::new(Settings::default());

    let report = controller::dispatch(&event, &backend, &process).await?;
    info!(
        executed = report.executed,
        apply_failed = report.apply_failed,
        lost_leadership = report.lost_leadership,
        "event handled"
    );
    Ok(())
}

fn hook_from_dispatch_path() -> anyhow::Result<String> {
    let path = std::env::var("JUJU_DISPATCH_PATH")
        .context("no event given and JUJU_DISPATCH_PATH is not set")?;
    Ok(path.trim_start_matches("hooks/").to_string())
}

/// Offline model a scenario replays against.
#[derive(Debug, serde::Deserialize)]
struct Scenario {
    #[serde(default = "default_app")]
    app: String,
    #[serde(default = "default_unit")]
    unit: String,
    #[serde(default = "default_address")]
    address: String,
    #[serde(default = "default_leader")]
    leader: bool,
    #[serde(default)]
    relations: Vec<ScenarioRelation>,
    events: Vec<Event>,
}

#[derive(Debug, serde::Deserialize)]
struct ScenarioRelation {
    name: RelationName,
    remote_app: String,
    #[serde(default)]
    remote_app_data: BTreeMap<String, String>,
    #[serde(default)]
    remote_units: BTreeMap<String, BTreeMap<String, String>>,
}

fn default_app() -> String {
    "mongos".to_string()
}

fn default_unit() -> String {
    "mongos/0".to_string()
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_leader() -> bool {
    true
}

async fn run_scenario(args: RunArgs) -> anyhow::Result<()> {
    init_tracing();

    let raw = std::fs::read_to_string(&args.scenario)
        .with_context(|| format!("reading scenario {}", args.scenario.display()))?;
    let scenario: Scenario = serde_yaml::from_str(&raw).context("parsing scenario file")?;

    let backend = MemoryBackend::new(&scenario.app, &scenario.unit, &scenario.address);
    backend.set_leader(scenario.leader);
    for relation in &scenario.relations {
        let id = backend.add_relation(relation.name, &relation.remote_app);
        let entries: Vec<(&str, &str)> = relation
            .remote_app_data
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        backend.put_remote_app_data(id, &entries);
        for (unit, bag) in &relation.remote_units {
            let entries: Vec<(&str, &str)> =
                bag.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            backend.put_remote_unit(id, unit, &entries);
        }
    }

    let process = RecordingProcess::new();
    for event in &scenario.events {
        let snapshot = load_snapshot(&backend, &process).await?;
        let plan = controller::plan(event, &snapshot)?;
        let names: Vec<&str> = plan.actions.iter().map(|a| a.name()).collect();
        println!(
            "{}: phase={} actions=[{}]",
            event.name(),
            plan.phase,
            names.join(", ")
        );

        let report = controller::execute(&plan, &snapshot, &backend, &process).await?;
        if let Some(status) = report.status {
            println!("  status: {} {}", status.kind, status.message);
        }
        if report.apply_failed {
            println!("  config apply failed, recovery ran");
        }
    }
    Ok(())
}
