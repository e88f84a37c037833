//! testbed CLI - プランファイルを読んでテストを実行する

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use testbed_core::app::{Control, ControlServer, PeriodicCommand, Scheduler};
use testbed_core::domain::{PlanSpec, TargetKind};
use testbed_core::harness::{Collaborators, Harness};
use testbed_core::impls::{
    CommandAppRunner, CommandBuildInvoker, CommandSimulatorHost, DryRun, JsonReportSink, StaticDiscovery,
    StatvfsProbe, TracingReportSink,
};

#[derive(Parser)]
#[command(name = "testbed")]
#[command(about = "Builds and runs test projects on the host, simulators and devices", long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG wins when set)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every enabled task in the plan
    Run {
        /// Plan file (JSON)
        #[arg(long)]
        plan: PathBuf,
        /// Serve the control plane and keep running until /quit
        #[arg(long)]
        server: bool,
        /// Overrides the plan's log directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// Record every build and run as succeeded without starting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the tasks the plan expands to
    List {
        #[arg(long)]
        plan: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_plan(path: &Path) -> Result<PlanSpec> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    PlanSpec::from_json(&json).with_context(|| format!("parsing {}", path.display()))
}

fn collaborators(plan: &PlanSpec, plan_path: &Path) -> Collaborators {
    let devices = Arc::new(StaticDiscovery::new(TargetKind::Device, &plan.targets).with_source(plan_path));
    let simulators = Arc::new(StaticDiscovery::new(TargetKind::Simulator, &plan.targets).with_source(plan_path));
    if plan.config.dry_run {
        return Collaborators {
            builder: Arc::new(DryRun),
            runner: Arc::new(DryRun),
            devices,
            simulators,
            simulator_host: Arc::new(DryRun),
            disk: Arc::new(StatvfsProbe),
        };
    }
    let tools = &plan.config.tools;
    Collaborators {
        builder: Arc::new(CommandBuildInvoker::new(tools.clone())),
        runner: Arc::new(CommandAppRunner::new(tools.clone())),
        devices,
        simulators,
        simulator_host: Arc::new(CommandSimulatorHost::new(tools.clone())),
        disk: Arc::new(StatvfsProbe),
    }
}

fn scheduler(plan: &PlanSpec, plan_path: &Path) -> Result<Scheduler> {
    let harness = Arc::new(Harness::new(plan.config.clone(), collaborators(plan, plan_path)));
    let report = JsonReportSink::in_directory(&plan.config.log_directory);
    Ok(Scheduler::from_plan(harness, plan)?
        .with_sink(Arc::new(report))
        .with_sink(Arc::new(TracingReportSink)))
}

async fn run(plan_path: PathBuf, server: bool, log_dir: Option<PathBuf>, dry_run: bool) -> Result<i32> {
    let mut plan = load_plan(&plan_path)?;
    if let Some(dir) = log_dir {
        plan.config.log_directory = dir;
    }
    plan.config.dry_run |= dry_run;
    std::fs::create_dir_all(&plan.config.log_directory)
        .with_context(|| format!("creating {}", plan.config.log_directory.display()))?;

    let scheduler = Arc::new(scheduler(&plan, &plan_path)?);
    info!(
        run_id = %scheduler.harness().run_id(),
        tasks = scheduler.all_tasks().len(),
        dry_run = plan.config.dry_run,
        "plan loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let periodic = plan.config.periodic.clone().map(|config| {
        let command = PeriodicCommand::new(config, &plan.config.log_directory);
        tokio::spawn(command.run(shutdown_rx.clone()))
    });

    let control_server = if server {
        let control = Arc::new(Control::new(Arc::clone(&scheduler)));
        Some(ControlServer::start(control, Handle::current(), plan.config.server_port)?)
    } else {
        None
    };
    if let Some(s) = &control_server {
        info!(url = %format!("http://127.0.0.1:{}/", s.port()), "control plane ready");
    }

    let report = scheduler.run_all().await;
    println!("{}", report.render_text());

    if let Some(s) = control_server {
        info!("waiting for /quit (or ctrl-c)");
        tokio::select! {
            _ = s.wait_quit() => {}
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "could not listen for ctrl-c");
                }
            }
        }
        s.stop();
    }

    shutdown_tx.send_replace(true);
    if let Some(handle) = periodic {
        if let Err(e) = handle.await {
            warn!(error = %e, "periodic command task failed");
        }
    }
    Ok(scheduler.exit_code())
}

fn list(plan_path: &Path) -> Result<()> {
    let plan = load_plan(plan_path)?;
    let scheduler = scheduler(&plan, plan_path)?;
    for (task, parent) in scheduler.all_tasks() {
        let indent = if parent.is_some() { "    " } else { "" };
        let ignored = if task.is_ignored() { " (ignored)" } else { "" };
        println!("{indent}{} {}{ignored}", task.id(), task.path().join(" / "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            plan,
            server,
            log_dir,
            dry_run,
        } => run(plan, server, log_dir, dry_run).await,
        Commands::List { plan } => list(&plan).map(|()| 0),
    };
    match result {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}
