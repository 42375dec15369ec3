use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use artemis_verify::exec::{ExecEndpoint, OfflineEndpoint};
use artemis_verify::scenario::{
    ScenarioContext, ScenarioPlan, ScenarioReport, ScenarioTiming, VerificationScenario,
};
use artemis_verify::settings::{AppConfig, LogFormat, ScenarioSettings};
use artemis_verify::store::{MemoryStore, ResourceStore};
use artemis_verify::trace;

#[derive(Parser, Debug)]
#[command(name = "artemis-verify", version, about)]
/// Deploy a broker cluster with queues and confirm every broker pod serves them
struct Args {
    /// whether to be verbose
    #[arg(short = 'v')]
    verbose: bool,

    /// path to a TOML config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// run against the cluster in the current kubeconfig (same as USE_EXISTING_CLUSTER=true)
    #[arg(long)]
    live: bool,

    /// the operator under test is deployed for this run (same as DEPLOY_OPERATOR=true)
    #[arg(long)]
    deploy_controller: bool,

    /// namespace to deploy into, overriding the config file
    #[arg(short = 'n', long)]
    namespace: Option<String>,

    /// emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let mut cfg = AppConfig::load(args.config.as_deref())?;
    if let Some(ns) = args.namespace.clone() {
        cfg.namespace = ns;
    }
    if args.json_logs {
        cfg.log_format = LogFormat::Json;
    }
    trace::init(cfg.log_format)?;
    if args.verbose {
        println!("DEBUG {args:?}");
        println!("DEBUG {cfg:?}");
    }

    let mut settings = cfg.scenario.with_process_env();
    settings.run_against_live_cluster |= args.live;
    settings.deploy_controller |= args.deploy_controller;

    let timing = ScenarioTiming::from_config(&cfg.timing)?;
    let plan = ScenarioPlan::address_rollout(&cfg.namespace);

    let report = if settings.run_against_live_cluster {
        run_live(plan, settings, timing).await?
    } else {
        let ctx = ScenarioContext::new(MemoryStore::new(), OfflineEndpoint);
        run(&ctx, plan, settings, timing).await
    };

    print_report(&report);
    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(feature = "k8s")]
async fn run_live(
    plan: ScenarioPlan,
    settings: ScenarioSettings,
    timing: ScenarioTiming,
) -> anyhow::Result<ScenarioReport> {
    let ctx = ScenarioContext::connect().await?;
    Ok(run(&ctx, plan, settings, timing).await)
}

#[cfg(not(feature = "k8s"))]
async fn run_live(
    _plan: ScenarioPlan,
    _settings: ScenarioSettings,
    _timing: ScenarioTiming,
) -> anyhow::Result<ScenarioReport> {
    anyhow::bail!("live runs need the `k8s` feature")
}

async fn run<S: ResourceStore, E: ExecEndpoint>(
    ctx: &ScenarioContext<S, E>,
    plan: ScenarioPlan,
    settings: ScenarioSettings,
    timing: ScenarioTiming,
) -> ScenarioReport {
    VerificationScenario::new(ctx, plan, settings, timing)
        .run()
        .await
}

fn print_report(report: &ScenarioReport) {
    let trail: Vec<String> = report.trail.iter().map(|p| p.to_string()).collect();
    println!("phases:   {}", trail.join(" -> "));
    println!("created:  {}", report.created.len());
    println!("deleted:  {}", report.deleted.len());
    if !report.verified_workers.is_empty() {
        println!("verified: {}", report.verified_workers.join(", "));
    }
    for e in &report.cleanup_errors {
        println!("cleanup error: {e}");
    }
    match &report.failure {
        Some(e) => println!("FAILED: {e}"),
        None => println!("PASSED"),
    }
}
