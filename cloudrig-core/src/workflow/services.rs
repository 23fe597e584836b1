//! Remote commands on instances: reachability and service lifecycle scripts.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::DeployContext;
use crate::dispatch::{ItemResult, Report, WorkItem};
use crate::error::{DeployError, Result};
use crate::log::LogBuilder;
use crate::project::{InstanceDef, ServiceCommandsDef};
use crate::remote::{Env, ExecError, RemoteExecutor};
use crate::select::select;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServiceCommand {
    Install,
    Config,
    Start,
    Stop,
}

impl ServiceCommand {
    pub(crate) fn name(self) -> &'static str {
        match self {
            ServiceCommand::Install => "install_services",
            ServiceCommand::Config => "config_services",
            ServiceCommand::Start => "start_services",
            ServiceCommand::Stop => "stop_services",
        }
    }

    fn scripts(self, cmd: &ServiceCommandsDef) -> &[String] {
        match self {
            ServiceCommand::Install => &cmd.install,
            ServiceCommand::Config => &cmd.config,
            ServiceCommand::Start => &cmd.start,
            ServiceCommand::Stop => &cmd.stop,
        }
    }
}

/// Copy remote output into the record and turn failures into deploy errors.
pub(crate) fn log_output(
    host: &str,
    result: std::result::Result<String, ExecError>,
    lb: &mut LogBuilder,
) -> Result<()> {
    match result {
        Ok(output) => {
            output.lines().for_each(|l| lb.add(l));
            Ok(())
        }
        Err(e) => {
            e.output().lines().for_each(|l| lb.add(l));
            Err(DeployError::Remote {
                host: host.to_string(),
                source: e,
            })
        }
    }
}

async fn run_scripts(
    executor: Arc<dyn RemoteExecutor>,
    title: String,
    host: String,
    scripts: Vec<String>,
    env: Env,
    verbose: bool,
) -> ItemResult {
    let mut lb = LogBuilder::new(title, verbose);
    if scripts.is_empty() {
        lb.add(format!("no scripts to run on {}", host));
        return lb.complete(Ok(()));
    }
    let result = executor.run_scripts(&host, &scripts, &env, verbose).await;
    let result = log_output(&host, result, &mut lb);
    lb.complete(result)
}

/// One work item per instance running its `cmd` scripts.
///
/// Each item gets its own copy of the instance's address, environment and
/// script paths.
pub(crate) fn service_items(
    ctx: &DeployContext,
    instances: &BTreeMap<String, &InstanceDef>,
    cmd: ServiceCommand,
) -> Vec<WorkItem> {
    instances
        .iter()
        .map(|(nickname, def)| {
            WorkItem::new(
                nickname.clone(),
                run_scripts(
                    Arc::clone(&ctx.executor),
                    format!("{} {}", cmd.name(), nickname),
                    def.best_ip_address().to_string(),
                    ctx.script_paths(cmd.scripts(&def.service.cmd)),
                    def.service.env.clone(),
                    ctx.verbose,
                ),
            )
        })
        .collect()
}

async fn run_service_command(
    ctx: &mut DeployContext,
    selector: Option<&str>,
    cmd: ServiceCommand,
) -> Result<Report> {
    let selected = select(selector.unwrap_or_default(), &ctx.project.instances, "instance")?;
    let items = service_items(ctx, &selected, cmd);
    Ok(ctx.dispatcher.run_batch(items).await)
}

async fn ping(
    executor: Arc<dyn RemoteExecutor>,
    title: String,
    host: String,
    verbose: bool,
) -> ItemResult {
    let mut lb = LogBuilder::new(title, verbose);
    let result = executor.run(&host, "id", &Env::new(), verbose).await;
    let result = log_output(&host, result, &mut lb);
    lb.complete(result)
}

pub(super) fn ping_instances<'a>(
    ctx: &'a mut DeployContext,
    selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    async move {
        let selected = select(selector.unwrap_or_default(), &ctx.project.instances, "instance")?;
        let items = selected
            .iter()
            .map(|(nickname, def)| {
                WorkItem::new(
                    nickname.clone(),
                    ping(
                        Arc::clone(&ctx.executor),
                        format!("ping_instances {}", nickname),
                        def.best_ip_address().to_string(),
                        ctx.verbose,
                    ),
                )
            })
            .collect();
        Ok(ctx.dispatcher.run_batch(items).await)
    }
    .boxed()
}

pub(super) fn install_services<'a>(
    ctx: &'a mut DeployContext,
    selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    run_service_command(ctx, selector, ServiceCommand::Install).boxed()
}

pub(super) fn config_services<'a>(
    ctx: &'a mut DeployContext,
    selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    run_service_command(ctx, selector, ServiceCommand::Config).boxed()
}

pub(super) fn start_services<'a>(
    ctx: &'a mut DeployContext,
    selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    run_service_command(ctx, selector, ServiceCommand::Start).boxed()
}

pub(super) fn stop_services<'a>(
    ctx: &'a mut DeployContext,
    selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    run_service_command(ctx, selector, ServiceCommand::Stop).boxed()
}
