//! Volume workflows. Targets are (instance, volume) pairs of the selected
//! instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{secs, DeployContext};
use crate::dispatch::{Report, WorkItem};
use crate::error::Result;
use crate::log::LogBuilder;
use crate::project::{InstanceDef, VolumeDef};
use crate::reconciler::volume::{VolumeDesired, VolumeReconciler};
use crate::reconciler::Reconciler;
use crate::select::select;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VolumeOp {
    Create,
    Attach,
    Delete,
}

impl VolumeOp {
    fn name(self) -> &'static str {
        match self {
            VolumeOp::Create => "create_volumes",
            VolumeOp::Attach => "attach_volumes",
            VolumeOp::Delete => "delete_volumes",
        }
    }
}

/// `instance.volume` label plus owned copies of both definitions.
fn volume_pairs(instances: &BTreeMap<String, &InstanceDef>) -> Vec<(String, InstanceDef, VolumeDef)> {
    instances
        .iter()
        .flat_map(|(inst_nick, inst)| {
            inst.volumes.iter().map(move |(vol_nick, vol)| {
                (
                    format!("{}.{}", inst_nick, vol_nick),
                    (*inst).clone(),
                    vol.clone(),
                )
            })
        })
        .collect()
}

async fn run_volume_op(
    ctx: &mut DeployContext,
    selector: Option<&str>,
    op: VolumeOp,
) -> Result<Report> {
    let selected = select(selector.unwrap_or_default(), &ctx.project.instances, "instance")?;
    let pairs = volume_pairs(&selected);
    if pairs.is_empty() {
        ctx.dispatcher.sink().notice("No volumes to create/attach/delete");
        return Ok(Report::default());
    }

    let timeouts = &ctx.project.timeouts;
    let items = pairs
        .into_iter()
        .map(|(target, inst, vol)| {
            let reconciler = VolumeReconciler::new(
                Arc::clone(&ctx.provider),
                ctx.tags(),
                secs(timeouts.create_volume),
                secs(timeouts.attach_volume),
            );
            let title = format!("{} {}", op.name(), target);
            let verbose = ctx.verbose;
            WorkItem::new(target, async move {
                let mut lb = LogBuilder::new(title, verbose);
                let result = match op {
                    VolumeOp::Create => {
                        let desired = VolumeDesired {
                            name: vol.name.clone(),
                            availability_zone: vol.availability_zone.clone(),
                            size_gb: vol.size_gb,
                            volume_type: vol.volume_type.clone(),
                        };
                        reconciler.ensure(&desired, &mut lb).await.map(|_| ())
                    }
                    VolumeOp::Attach => {
                        let attached = reconciler
                            .attach(&vol.name, &inst.hostname, &vol.device_name, &mut lb)
                            .await;
                        if attached.is_ok() {
                            lb.add(format!(
                                "volume {} attached at {}, mount point {}",
                                vol.name, vol.device_name, vol.mount_point
                            ));
                        }
                        attached.map(|_| ())
                    }
                    VolumeOp::Delete => reconciler.delete(&vol.name, &mut lb).await,
                };
                lb.complete(result)
            })
        })
        .collect();

    Ok(ctx.dispatcher.run_batch(items).await)
}

pub(super) fn create_volumes<'a>(
    ctx: &'a mut DeployContext,
    selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    run_volume_op(ctx, selector, VolumeOp::Create).boxed()
}

pub(super) fn attach_volumes<'a>(
    ctx: &'a mut DeployContext,
    selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    run_volume_op(ctx, selector, VolumeOp::Attach).boxed()
}

pub(super) fn delete_volumes<'a>(
    ctx: &'a mut DeployContext,
    selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    run_volume_op(ctx, selector, VolumeOp::Delete).boxed()
}
