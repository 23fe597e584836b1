//! Database ring reconfiguration.
//!
//! Three phases with a barrier between them: stop every member, push the
//! configuration to every member, then poll one member until the whole ring
//! reports up/normal.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::info;

use super::services::{service_items, ServiceCommand};
use super::DeployContext;
use crate::converge::{classify_ring_status, Poller, RING_STATUS_COMMAND};
use crate::dispatch::{ItemResult, Phase, Report, WorkItem};
use crate::error::{DeployError, Result};
use crate::log::LogBuilder;
use crate::project::PURPOSE_CASSANDRA;
use crate::remote::{Env, RemoteExecutor};

/// Poll `host` until every address in `members` is up/normal.
pub(crate) async fn wait_for_ring(
    executor: Arc<dyn RemoteExecutor>,
    poller: Poller,
    host: String,
    members: Vec<String>,
    verbose: bool,
) -> ItemResult {
    let mut lb = LogBuilder::new(format!("wait_for_ring {}", host), verbose);
    lb.add(format!("waiting for {} to be up/normal", members.join(", ")));

    let executor = &executor;
    let host_ref = host.as_str();
    let members_ref = members.as_slice();
    let env = Env::new();
    let env_ref = &env;
    let result = poller
        .wait(move || async move {
            let status = executor
                .run(host_ref, RING_STATUS_COMMAND, env_ref, verbose)
                .await;
            classify_ring_status(host_ref, status, members_ref)
        })
        .await;

    let result = match result {
        Ok(output) => {
            output.lines().for_each(|l| lb.add(l));
            Ok(())
        }
        Err(DeployError::UnknownOutput { what, output }) => {
            output.lines().for_each(|l| lb.add(l));
            Err(DeployError::UnknownOutput { what, output })
        }
        Err(e) => Err(e),
    };
    lb.complete(result)
}

pub(super) fn config_cluster<'a>(
    ctx: &'a mut DeployContext,
    _selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    async move {
        let members = ctx.project.instances_with_purpose(PURPOSE_CASSANDRA);
        let Some(first) = members.values().next() else {
            return Err(DeployError::Invalid(format!(
                "no instances with purpose {}",
                PURPOSE_CASSANDRA
            )));
        };
        let probe_host = first.best_ip_address().to_string();
        let addresses: Vec<String> = members.values().map(|d| d.ip_address.clone()).collect();
        info!(members = members.len(), probe = %probe_host, "Reconfiguring cluster");

        let stop = service_items(ctx, &members, ServiceCommand::Stop);
        let config = service_items(ctx, &members, ServiceCommand::Config);
        let probe = WorkItem::new(
            probe_host.clone(),
            wait_for_ring(
                Arc::clone(&ctx.executor),
                Poller::new("cluster ring"),
                probe_host,
                addresses,
                ctx.verbose,
            ),
        );

        let phases = vec![
            Phase::new("stop", stop),
            Phase::new("config", config),
            Phase::new("converge", vec![probe]),
        ];
        Ok(ctx.dispatcher.run_phases(phases).await)
    }
    .boxed()
}
