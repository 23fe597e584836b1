//! Singleton workflows: floating ips, security groups, networking.
//!
//! Each runs as one job on the coordinating task. Creation and teardown
//! order is fixed here; teardown is not a mirror of creation because the
//! provider refuses to delete a network with live dependents.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{secs, DeployContext};
use crate::dispatch::Report;
use crate::error::Result;
use crate::log::LogBuilder;
use crate::project::Project;
use crate::provider::{CloudProvider, ResourceKind, RouteTarget, Tags};
use crate::reconciler::floating_ip::FloatingIpReconciler;
use crate::reconciler::gateway::{
    InternetGatewayDesired, InternetGatewayReconciler, NatGatewayDesired, NatGatewayReconciler,
};
use crate::reconciler::network::{NetworkDesired, NetworkReconciler, SubnetDesired, SubnetReconciler};
use crate::reconciler::route_table::{RouteTableDesired, RouteTableReconciler};
use crate::reconciler::security_group::{SecurityGroupDesired, SecurityGroupReconciler};
use crate::reconciler::{lookup, require, Reconciler};

pub(super) fn create_floating_ips<'a>(
    ctx: &'a mut DeployContext,
    _selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    async move {
        const TITLE: &str = "create_floating_ips";
        let verbose = ctx.verbose;
        let floating = FloatingIpReconciler::new(Arc::clone(&ctx.provider));
        let project = &mut ctx.project;
        let report = ctx
            .dispatcher
            .run_single(TITLE, async move {
                let mut lb = LogBuilder::new(TITLE, verbose);
                let result = allocate_floating_ips(&floating, project, &mut lb).await;
                lb.complete(result)
            })
            .await;
        Ok(report)
    }
    .boxed()
}

async fn allocate_floating_ips(
    floating: &FloatingIpReconciler,
    project: &mut Project,
    lb: &mut LogBuilder,
) -> Result<()> {
    let bastion_name = project.ssh_config.bastion_external_ip_address_name.clone();
    let bastion_ip = floating.ensure(&bastion_name, lb).await?;
    project.set_ssh_external_ip(&bastion_ip);

    let natgw_name = project.network.public_subnet.nat_gateway_external_ip_name.clone();
    let natgw_ip = floating.ensure(&natgw_name, lb).await?;
    project.set_nat_gateway_external_ip(&natgw_ip);

    lb.add(format!(
        "bastion address is {}, assign it to the bastion instance: ssh -i {} -p {} {}@{}",
        bastion_ip,
        project.ssh_config.private_key_path,
        project.ssh_config.port,
        project.ssh_config.user,
        bastion_ip
    ));
    lb.add(format!("nat gateway address is {}", natgw_ip));
    Ok(())
}

pub(super) fn delete_floating_ips<'a>(
    ctx: &'a mut DeployContext,
    _selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    async move {
        const TITLE: &str = "delete_floating_ips";
        let verbose = ctx.verbose;
        let floating = FloatingIpReconciler::new(Arc::clone(&ctx.provider));
        let project = &mut ctx.project;
        let report = ctx
            .dispatcher
            .run_single(TITLE, async move {
                let mut lb = LogBuilder::new(TITLE, verbose);
                let result = release_floating_ips(&floating, project, &mut lb).await;
                lb.complete(result)
            })
            .await;
        Ok(report)
    }
    .boxed()
}

async fn release_floating_ips(
    floating: &FloatingIpReconciler,
    project: &mut Project,
    lb: &mut LogBuilder,
) -> Result<()> {
    let bastion_ip = project.ssh_config.external_ip_address.clone();
    floating.release(&bastion_ip, "bastion", lb).await?;
    project.set_ssh_external_ip("");

    let natgw_ip = project.network.public_subnet.nat_gateway_public_ip.clone();
    floating.release(&natgw_ip, "nat gateway", lb).await?;
    project.set_nat_gateway_external_ip("");
    Ok(())
}

pub(super) fn create_security_groups<'a>(
    ctx: &'a mut DeployContext,
    _selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    async move {
        const TITLE: &str = "create_security_groups";
        let provider = Arc::clone(&ctx.provider);
        let tags = ctx.tags();
        let project = &ctx.project;
        let verbose = ctx.verbose;
        let report = ctx
            .dispatcher
            .run_single(TITLE, async move {
                let mut lb = LogBuilder::new(TITLE, verbose);
                let result = ensure_security_groups(provider, tags, project, &mut lb).await;
                lb.complete(result)
            })
            .await;
        Ok(report)
    }
    .boxed()
}

async fn ensure_security_groups(
    provider: Arc<dyn CloudProvider>,
    tags: Tags,
    project: &Project,
    lb: &mut LogBuilder,
) -> Result<()> {
    let network = require(&provider, ResourceKind::Network, &project.network.name, lb).await?;
    let groups = SecurityGroupReconciler::new(provider, tags);
    for def in project.security_groups.values() {
        let desired = SecurityGroupDesired {
            name: def.name.clone(),
            network_id: network.id.clone(),
            rules: def.rules.clone(),
        };
        groups.ensure(&desired, lb).await?;
    }
    Ok(())
}

pub(super) fn delete_security_groups<'a>(
    ctx: &'a mut DeployContext,
    _selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    async move {
        const TITLE: &str = "delete_security_groups";
        let groups = SecurityGroupReconciler::new(Arc::clone(&ctx.provider), ctx.tags());
        let project = &ctx.project;
        let verbose = ctx.verbose;
        let report = ctx
            .dispatcher
            .run_single(TITLE, async move {
                let mut lb = LogBuilder::new(TITLE, verbose);
                let mut result = Ok(());
                for def in project.security_groups.values() {
                    result = groups.delete(&def.name, &mut lb).await;
                    if result.is_err() {
                        break;
                    }
                }
                lb.complete(result)
            })
            .await;
        Ok(report)
    }
    .boxed()
}

pub(super) fn create_networking<'a>(
    ctx: &'a mut DeployContext,
    _selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    async move {
        const TITLE: &str = "create_networking";
        let provider = Arc::clone(&ctx.provider);
        let tags = ctx.tags();
        let project = &ctx.project;
        let verbose = ctx.verbose;
        let report = ctx
            .dispatcher
            .run_single(TITLE, async move {
                let mut lb = LogBuilder::new(TITLE, verbose);
                let result = ensure_networking(provider, tags, project, &mut lb).await;
                lb.complete(result)
            })
            .await;
        Ok(report)
    }
    .boxed()
}

pub(super) fn delete_networking<'a>(
    ctx: &'a mut DeployContext,
    _selector: Option<&'a str>,
) -> BoxFuture<'a, Result<Report>> {
    async move {
        const TITLE: &str = "delete_networking";
        let provider = Arc::clone(&ctx.provider);
        let tags = ctx.tags();
        let project = &ctx.project;
        let verbose = ctx.verbose;
        let report = ctx
            .dispatcher
            .run_single(TITLE, async move {
                let mut lb = LogBuilder::new(TITLE, verbose);
                let result = teardown_networking(provider, tags, project, &mut lb).await;
                lb.complete(result)
            })
            .await;
        Ok(report)
    }
    .boxed()
}

/// Name tag given to the network's main route table.
fn main_route_table_name(public_subnet: &str) -> String {
    format!("{}_vpc_default_rt", public_subnet)
}

/// VPC, subnets, internet gateway with the main route table, NAT gateway
/// with the private route table. Stops at the first failing step.
pub(crate) async fn ensure_networking(
    provider: Arc<dyn CloudProvider>,
    tags: Tags,
    project: &Project,
    lb: &mut LogBuilder,
) -> Result<()> {
    let net = &project.network;
    let timeouts = &project.timeouts;

    let network_id = NetworkReconciler::new(
        Arc::clone(&provider),
        tags.clone(),
        secs(timeouts.create_network),
    )
    .ensure(
        &NetworkDesired {
            name: net.name.clone(),
            cidr: net.cidr.clone(),
        },
        lb,
    )
    .await?;

    let subnets = SubnetReconciler::new(Arc::clone(&provider), tags.clone());
    let private_subnet_id = subnets
        .ensure(
            &SubnetDesired {
                name: net.private_subnet.name.clone(),
                network_id: network_id.clone(),
                cidr: net.private_subnet.cidr.clone(),
                availability_zone: net.private_subnet.availability_zone.clone(),
            },
            lb,
        )
        .await?;
    let public_subnet_id = subnets
        .ensure(
            &SubnetDesired {
                name: net.public_subnet.name.clone(),
                network_id: network_id.clone(),
                cidr: net.public_subnet.cidr.clone(),
                availability_zone: net.public_subnet.availability_zone.clone(),
            },
            lb,
        )
        .await?;

    let igw_id = InternetGatewayReconciler::new(Arc::clone(&provider), tags.clone())
        .ensure(
            &InternetGatewayDesired {
                name: net.router.name.clone(),
                network_id: network_id.clone(),
            },
            lb,
        )
        .await?;

    let route_tables = RouteTableReconciler::new(Arc::clone(&provider), tags.clone());
    route_tables
        .ensure_main(
            &RouteTableDesired {
                name: main_route_table_name(&net.public_subnet.name),
                network_id: network_id.clone(),
                subnet_id: public_subnet_id.clone(),
                target: RouteTarget::InternetGateway(igw_id),
            },
            lb,
        )
        .await?;

    let allocation_id = FloatingIpReconciler::new(Arc::clone(&provider))
        .allocation_id(&net.public_subnet.nat_gateway_external_ip_name, lb)
        .await?;
    let natgw_id = NatGatewayReconciler::new(
        Arc::clone(&provider),
        tags.clone(),
        secs(timeouts.create_nat_gateway),
        secs(timeouts.delete_nat_gateway),
    )
    .ensure(
        &NatGatewayDesired {
            name: net.public_subnet.nat_gateway_name.clone(),
            subnet_id: public_subnet_id,
            allocation_id,
        },
        lb,
    )
    .await?;

    route_tables
        .ensure(
            &RouteTableDesired {
                name: net.private_subnet.route_table_to_nat_gateway_name.clone(),
                network_id,
                subnet_id: private_subnet_id,
                target: RouteTarget::NatGateway(natgw_id),
            },
            lb,
        )
        .await?;
    Ok(())
}

/// NAT gateway, internet gateway (detach, delete), public subnet, private
/// subnet, private route table, network. Stops at the first failing step.
pub(crate) async fn teardown_networking(
    provider: Arc<dyn CloudProvider>,
    tags: Tags,
    project: &Project,
    lb: &mut LogBuilder,
) -> Result<()> {
    let net = &project.network;
    let timeouts = &project.timeouts;

    NatGatewayReconciler::new(
        Arc::clone(&provider),
        tags.clone(),
        secs(timeouts.create_nat_gateway),
        secs(timeouts.delete_nat_gateway),
    )
    .delete(&net.public_subnet.nat_gateway_name, lb)
    .await?;

    InternetGatewayReconciler::new(Arc::clone(&provider), tags.clone())
        .delete(&net.router.name, lb)
        .await?;

    let subnets = SubnetReconciler::new(Arc::clone(&provider), tags.clone());
    subnets.delete(&net.public_subnet.name, lb).await?;
    subnets.delete(&net.private_subnet.name, lb).await?;

    let Some(network) = lookup(&provider, ResourceKind::Network, &net.name, lb).await? else {
        lb.add(format!("will not delete network {}, nothing to delete", net.name));
        return Ok(());
    };
    RouteTableReconciler::new(Arc::clone(&provider), tags.clone())
        .delete_in_network(&net.private_subnet.route_table_to_nat_gateway_name, &network.id, lb)
        .await?;
    NetworkReconciler::new(provider, tags, secs(timeouts.create_network))
        .delete(&net.name, lb)
        .await
}
