//! cloudrig: brings a cluster's cloud resources and services to the state
//! described by a project file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cloudrig_aws::{AwsCli, AwsCliProvider};
use cloudrig_core::{ConsoleSink, DeployContext, Dispatcher, DispatcherConfig, Project, Workflow};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod ssh;

use ssh::SshExecutor;

/// cloudrig cluster deployment tool
#[derive(Parser, Debug)]
#[command(name = "cloudrig", version, about)]
struct Args {
    /// Print provider responses and remote output
    #[arg(short, long)]
    verbose: bool,

    /// Project file
    #[arg(long, default_value = "cloudrig.json")]
    prj: PathBuf,

    /// Work items allowed in flight at once
    #[arg(long, default_value = "10")]
    max_workers: usize,

    /// Minimum spacing between two submissions, in milliseconds
    #[arg(long, default_value = "1000")]
    throttle_ms: u64,

    /// AWS region (defaults to the aws CLI configuration)
    #[arg(long)]
    region: Option<String>,

    /// AWS CLI profile
    #[arg(long)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocate the bastion and NAT gateway addresses
    CreateFloatingIps,
    /// Release the bastion and NAT gateway addresses
    DeleteFloatingIps,
    CreateSecurityGroups,
    DeleteSecurityGroups,
    /// Network, subnets, gateways and route tables
    CreateNetworking,
    DeleteNetworking,
    CreateVolumes {
        /// Comma-separated instance nicknames or patterns
        selector: String,
    },
    AttachVolumes {
        selector: String,
    },
    DeleteVolumes {
        selector: String,
    },
    CreateInstances {
        selector: String,
    },
    DeleteInstances {
        selector: String,
    },
    /// Run `id` on each instance
    PingInstances {
        selector: String,
    },
    InstallServices {
        selector: String,
    },
    ConfigServices {
        selector: String,
    },
    StartServices {
        selector: String,
    },
    StopServices {
        selector: String,
    },
    /// Stop, reconfigure and restart the cassandra ring, then wait for it
    ConfigCluster,
}

impl Command {
    fn workflow(&self) -> (Workflow, Option<&str>) {
        match self {
            Command::CreateFloatingIps => (Workflow::CreateFloatingIps, None),
            Command::DeleteFloatingIps => (Workflow::DeleteFloatingIps, None),
            Command::CreateSecurityGroups => (Workflow::CreateSecurityGroups, None),
            Command::DeleteSecurityGroups => (Workflow::DeleteSecurityGroups, None),
            Command::CreateNetworking => (Workflow::CreateNetworking, None),
            Command::DeleteNetworking => (Workflow::DeleteNetworking, None),
            Command::CreateVolumes { selector } => (Workflow::CreateVolumes, Some(selector)),
            Command::AttachVolumes { selector } => (Workflow::AttachVolumes, Some(selector)),
            Command::DeleteVolumes { selector } => (Workflow::DeleteVolumes, Some(selector)),
            Command::CreateInstances { selector } => (Workflow::CreateInstances, Some(selector)),
            Command::DeleteInstances { selector } => (Workflow::DeleteInstances, Some(selector)),
            Command::PingInstances { selector } => (Workflow::PingInstances, Some(selector)),
            Command::InstallServices { selector } => (Workflow::InstallServices, Some(selector)),
            Command::ConfigServices { selector } => (Workflow::ConfigServices, Some(selector)),
            Command::StartServices { selector } => (Workflow::StartServices, Some(selector)),
            Command::StopServices { selector } => (Workflow::StopServices, Some(selector)),
            Command::ConfigCluster => (Workflow::ConfigCluster, None),
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "cloudrig=debug,cloudrig_core=debug,cloudrig_aws=debug"
    } else {
        "cloudrig=info,cloudrig_core=info,cloudrig_aws=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<bool> {
    let (workflow, selector) = args.command.workflow();
    let project = Project::load(&args.prj)
        .await
        .with_context(|| format!("loading {}", args.prj.display()))?;
    let project_dir = args
        .prj
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let executor = Arc::new(SshExecutor::new(&project.ssh_config));
    let provider = Arc::new(AwsCliProvider::new(AwsCli::new(
        args.region.clone(),
        args.profile.clone(),
    )));
    let dispatcher = Dispatcher::new(
        DispatcherConfig {
            max_workers: args.max_workers.max(1),
            throttle: Duration::from_millis(args.throttle_ms),
        },
        Arc::new(ConsoleSink),
    );
    let mut ctx = DeployContext {
        project,
        project_dir,
        provider,
        executor,
        dispatcher,
        verbose: args.verbose,
    };

    info!(workflow = %workflow, selector = ?selector, "Starting");
    let started = Instant::now();
    let outcome = workflow.run(&mut ctx, selector).await;

    // Allocated addresses must survive a failed run too.
    ctx.project
        .save(&args.prj)
        .await
        .with_context(|| format!("saving {}", args.prj.display()))?;

    let report = outcome?;
    if report.is_success() {
        println!(
            "{} OK, elapsed {:.3}s",
            workflow,
            started.elapsed().as_secs_f64()
        );
        Ok(true)
    } else {
        error!(
            workflow = %workflow,
            failed = ?report.failed,
            "{} of {} targets failed",
            report.failed.len(),
            report.submitted
        );
        Ok(false)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
