//! Workflow catalogue.
//!
//! Every operator verb is a [`Workflow`] variant bound to a [`Handler`] with
//! the same "run with target selector" shape. Single-threaded workflows may
//! update the project; parallel work items only ever see clones of it.

mod cluster;
mod instances;
mod networking;
mod services;
mod volumes;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::dispatch::{Dispatcher, Report};
use crate::error::Result;
use crate::project::{InstanceDef, Project, SubnetType};
use crate::provider::{CloudProvider, Tags};
use crate::remote::RemoteExecutor;

/// Everything a workflow needs for one command run.
pub struct DeployContext {
    pub project: Project,
    /// Directory service script paths are resolved against.
    pub project_dir: PathBuf,
    pub provider: Arc<dyn CloudProvider>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub dispatcher: Dispatcher,
    pub verbose: bool,
}

impl DeployContext {
    /// Tags put on every resource this run creates.
    pub(crate) fn tags(&self) -> Tags {
        self.project.tags.clone()
    }

    pub(crate) fn script_paths(&self, scripts: &[String]) -> Vec<String> {
        scripts
            .iter()
            .map(|s| self.project_dir.join(s).to_string_lossy().into_owned())
            .collect()
    }

    pub(crate) fn subnet_name(&self, def: &InstanceDef) -> String {
        match def.subnet_type {
            SubnetType::Public => self.project.network.public_subnet.name.clone(),
            SubnetType::Private => self.project.network.private_subnet.name.clone(),
        }
    }
}

pub(crate) fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Uniform entry point of every workflow.
///
/// An `Err` means nothing (or nothing further) was submitted: selection
/// failures, pre-flight failures. Per-item failures land in the [`Report`].
pub type Handler =
    for<'a> fn(&'a mut DeployContext, Option<&'a str>) -> BoxFuture<'a, Result<Report>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workflow {
    CreateFloatingIps,
    DeleteFloatingIps,
    CreateSecurityGroups,
    DeleteSecurityGroups,
    CreateNetworking,
    DeleteNetworking,
    CreateVolumes,
    AttachVolumes,
    DeleteVolumes,
    CreateInstances,
    DeleteInstances,
    PingInstances,
    InstallServices,
    ConfigServices,
    StartServices,
    StopServices,
    ConfigCluster,
}

impl Workflow {
    pub const ALL: [Workflow; 17] = [
        Workflow::CreateFloatingIps,
        Workflow::DeleteFloatingIps,
        Workflow::CreateSecurityGroups,
        Workflow::DeleteSecurityGroups,
        Workflow::CreateNetworking,
        Workflow::DeleteNetworking,
        Workflow::CreateVolumes,
        Workflow::AttachVolumes,
        Workflow::DeleteVolumes,
        Workflow::CreateInstances,
        Workflow::DeleteInstances,
        Workflow::PingInstances,
        Workflow::InstallServices,
        Workflow::ConfigServices,
        Workflow::StartServices,
        Workflow::StopServices,
        Workflow::ConfigCluster,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Workflow::CreateFloatingIps => "create_floating_ips",
            Workflow::DeleteFloatingIps => "delete_floating_ips",
            Workflow::CreateSecurityGroups => "create_security_groups",
            Workflow::DeleteSecurityGroups => "delete_security_groups",
            Workflow::CreateNetworking => "create_networking",
            Workflow::DeleteNetworking => "delete_networking",
            Workflow::CreateVolumes => "create_volumes",
            Workflow::AttachVolumes => "attach_volumes",
            Workflow::DeleteVolumes => "delete_volumes",
            Workflow::CreateInstances => "create_instances",
            Workflow::DeleteInstances => "delete_instances",
            Workflow::PingInstances => "ping_instances",
            Workflow::InstallServices => "install_services",
            Workflow::ConfigServices => "config_services",
            Workflow::StartServices => "start_services",
            Workflow::StopServices => "stop_services",
            Workflow::ConfigCluster => "config_cluster",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.replace('-', "_");
        Self::ALL.into_iter().find(|w| w.name() == normalized)
    }

    /// Whether the workflow runs per instance and needs a selector.
    pub fn takes_selector(self) -> bool {
        !matches!(
            self,
            Workflow::CreateFloatingIps
                | Workflow::DeleteFloatingIps
                | Workflow::CreateSecurityGroups
                | Workflow::DeleteSecurityGroups
                | Workflow::CreateNetworking
                | Workflow::DeleteNetworking
                | Workflow::ConfigCluster
        )
    }

    pub fn handler(self) -> Handler {
        match self {
            Workflow::CreateFloatingIps => networking::create_floating_ips,
            Workflow::DeleteFloatingIps => networking::delete_floating_ips,
            Workflow::CreateSecurityGroups => networking::create_security_groups,
            Workflow::DeleteSecurityGroups => networking::delete_security_groups,
            Workflow::CreateNetworking => networking::create_networking,
            Workflow::DeleteNetworking => networking::delete_networking,
            Workflow::CreateVolumes => volumes::create_volumes,
            Workflow::AttachVolumes => volumes::attach_volumes,
            Workflow::DeleteVolumes => volumes::delete_volumes,
            Workflow::CreateInstances => instances::create_instances,
            Workflow::DeleteInstances => instances::delete_instances,
            Workflow::PingInstances => services::ping_instances,
            Workflow::InstallServices => services::install_services,
            Workflow::ConfigServices => services::config_services,
            Workflow::StartServices => services::start_services,
            Workflow::StopServices => services::stop_services,
            Workflow::ConfigCluster => cluster::config_cluster,
        }
    }

    pub async fn run(self, ctx: &mut DeployContext, selector: Option<&str>) -> Result<Report> {
        (self.handler())(ctx, selector).await
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
