//! Instance creation and deletion, one work item per instance.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{secs, DeployContext};
use crate::dispatch::{ItemResult, Report, WorkItem};
use crate::error::{DeployError, ProviderContext, Result};
use crate::log::LogBuilder;
use crate::project::InstanceDef;
use crate::provider::{CloudProvider, ResourceKind};
use crate::reconciler::instance::{InstanceDesired, InstanceReconciler};
use crate::reconciler::Reconciler;
use crate::select::select;

/// Flavor and image names resolved to provider ids.
#[derive(Debug, Default)]
struct Resolved {
    instance_types: BTreeMap<String, String>,
    images: BTreeMap<String, String>,
}

/// Resolve every flavor, image and key pair the selected instances use.
async fn preflight(
    provider: &Arc<dyn CloudProvider>,
    instances: &BTreeMap<String, &InstanceDef>,
    lb: &mut LogBuilder,
) -> Result<Resolved> {
    let mut resolved = Resolved::default();

    let flavors: BTreeSet<&str> = instances.values().map(|d| d.flavor_name.as_str()).collect();
    for flavor in flavors {
        let Some(instance_type) = provider
            .resolve_instance_type(flavor)
            .await
            .on(ResourceKind::Instance, flavor)?
        else {
            return Err(DeployError::Invalid(format!("cannot resolve flavor {}", flavor)));
        };
        lb.add(format!("flavor {} is instance type {}", flavor, instance_type));
        resolved.instance_types.insert(flavor.to_string(), instance_type);
    }

    let images: BTreeSet<&str> = instances.values().map(|d| d.image_name.as_str()).collect();
    for image in images {
        let Some(image_id) = provider
            .resolve_image(image)
            .await
            .on(ResourceKind::Instance, image)?
        else {
            return Err(DeployError::Invalid(format!("cannot resolve image {}", image)));
        };
        lb.add(format!("image {} is {}", image, image_id));
        resolved.images.insert(image.to_string(), image_id);
    }

    let keys: BTreeSet<&str> = instances.values().map(|d| d.root_key_name.as_str()).collect();
    for key in keys {
        if !provider
            .keypair_exists(key)
            .await
            .on(ResourceKind::Instance, key)?
        {
            return Err(DeployError::Invalid(format!("key pair {} not found", key)));
        }
        lb.add(format!("key pair {} exists", key));
    }

    Ok(resolved)
}

pub(super) fn create_instances<'a>(
    ctx: &'a mut DeployContext,
    selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    async move {
        let selected = select(selector.unwrap_or_default(), &ctx.project.instances, "instance")?;

        let mut lb = LogBuilder::new("create_instances preflight", ctx.verbose);
        let resolved = preflight(&ctx.provider, &selected, &mut lb).await;
        let (record, resolved) = lb.complete(resolved);
        ctx.dispatcher.sink().record(&record);
        let resolved = resolved?;

        let mut hints = vec!["Clear stale host keys with:".to_string()];
        hints.extend(
            selected
                .values()
                .map(|def| format!("ssh-keygen -f ~/.ssh/known_hosts -R {}", def.best_ip_address())),
        );
        ctx.dispatcher.sink().notice(&hints.join("\n"));

        let timeouts = &ctx.project.timeouts;
        let items = selected
            .iter()
            .map(|(nickname, def)| {
                let desired = InstanceDesired {
                    name: def.hostname.clone(),
                    instance_type: resolved.instance_types[&def.flavor_name].clone(),
                    image_id: resolved.images[&def.image_name].clone(),
                    key_name: def.root_key_name.clone(),
                    subnet_name: ctx.subnet_name(def),
                    security_group_name: def.security_group_name.clone(),
                    private_ip: def.ip_address.clone(),
                };
                let reconciler = InstanceReconciler::new(
                    Arc::clone(&ctx.provider),
                    ctx.tags(),
                    secs(timeouts.create_instance),
                    secs(timeouts.delete_instance),
                );
                let title = format!("create_instances {}", nickname);
                let verbose = ctx.verbose;
                WorkItem::new(nickname.clone(), async move {
                    let mut lb = LogBuilder::new(title, verbose);
                    let result = reconciler.ensure(&desired, &mut lb).await.map(|_| ());
                    lb.complete(result)
                })
            })
            .collect();

        Ok(ctx.dispatcher.run_batch(items).await)
    }
    .boxed()
}

async fn delete_instance(
    reconciler: InstanceReconciler,
    title: String,
    hostname: String,
    verbose: bool,
) -> ItemResult {
    let mut lb = LogBuilder::new(title, verbose);
    let result = reconciler.delete(&hostname, &mut lb).await;
    lb.complete(result)
}

pub(super) fn delete_instances<'a>(
    ctx: &'a mut DeployContext,
    selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    async move {
        let selected = select(selector.unwrap_or_default(), &ctx.project.instances, "instance")?;
        let timeouts = &ctx.project.timeouts;
        let items = selected
            .iter()
            .map(|(nickname, def)| {
                let reconciler = InstanceReconciler::new(
                    Arc::clone(&ctx.provider),
                    ctx.tags(),
                    secs(timeouts.create_instance),
                    secs(timeouts.delete_instance),
                );
                WorkItem::new(
                    nickname.clone(),
                    delete_instance(
                        reconciler,
                        format!("delete_instances {}", nickname),
                        def.hostname.clone(),
                        ctx.verbose,
                    ),
                )
            })
            .collect();

        Ok(ctx.dispatcher.run_batch(items).await)
    }
    .boxed()
}
