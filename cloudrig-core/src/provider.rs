//! Provider client interface.
//!
//! A provider exposes lookup/create/delete/tag primitives per resource kind.
//! Identity lookup by `Name` tag before every create is what makes the
//! reconcilers idempotent; nothing here caches identities across calls.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cloud resource kinds managed by cloudrig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Subnet,
    InternetGateway,
    NatGateway,
    RouteTable,
    SecurityGroup,
    Instance,
    Volume,
    FloatingIp,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet gateway",
            ResourceKind::NatGateway => "nat gateway",
            ResourceKind::RouteTable => "route table",
            ResourceKind::SecurityGroup => "security group",
            ResourceKind::Instance => "instance",
            ResourceKind::Volume => "volume",
            ResourceKind::FloatingIp => "floating ip",
        };
        f.write_str(s)
    }
}

/// Provider-observed lifecycle state. Not owned by cloudrig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Available,
    InUse,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Running,
    Stopping,
    Stopped,
    Deleting,
    Deleted,
    Other(String),
}

impl LifecycleState {
    /// The object is gone or on its way out.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Deleting | LifecycleState::Deleted)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Other(s) => f.write_str(s),
            other => {
                let s = serde_json::to_value(other)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                f.write_str(&s)
            }
        }
    }
}

/// What the provider knows about one existing object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub id: String,
    pub state: LifecycleState,
    /// Owning network (subnet, route table, security group) or the network
    /// an internet gateway is attached to.
    pub network_id: Option<String>,
    /// Subnet a route table is associated with, or an instance lives in.
    pub subnet_id: Option<String>,
    /// Instance a volume or floating ip is attached to.
    pub attached_to: Option<String>,
}

impl ResourceIdentity {
    pub fn new(id: impl Into<String>, state: LifecycleState) -> Self {
        Self {
            id: id.into(),
            state,
            network_id: None,
            subnet_id: None,
            attached_to: None,
        }
    }

    pub fn in_network(mut self, network_id: impl Into<String>) -> Self {
        self.network_id = Some(network_id.into());
        self
    }

    pub fn in_subnet(mut self, subnet_id: impl Into<String>) -> Self {
        self.subnet_id = Some(subnet_id.into());
        self
    }

    pub fn attached_to(mut self, instance_id: impl Into<String>) -> Self {
        self.attached_to = Some(instance_id.into());
        self
    }
}

/// Tags applied to every created resource, in addition to `Name`.
pub type Tags = BTreeMap<String, String>;

/// A single ingress/egress rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub protocol: String,
    pub port: u16,
    pub remote_ip: String,
    #[serde(default = "default_direction")]
    pub direction: String,
}

fn default_direction() -> String {
    "ingress".to_string()
}

/// Creation parameters, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreateSpec {
    Network {
        name: String,
        cidr: String,
    },
    Subnet {
        name: String,
        network_id: String,
        cidr: String,
        availability_zone: String,
    },
    InternetGateway {
        name: String,
    },
    NatGateway {
        name: String,
        subnet_id: String,
        allocation_id: String,
    },
    RouteTable {
        name: String,
        network_id: String,
    },
    SecurityGroup {
        name: String,
        network_id: String,
        rules: Vec<SecurityRule>,
    },
    Instance {
        name: String,
        instance_type: String,
        image_id: String,
        key_name: String,
        subnet_id: String,
        security_group_id: String,
        private_ip: String,
    },
    Volume {
        name: String,
        availability_zone: String,
        size_gb: u32,
        volume_type: String,
    },
}

impl CreateSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            CreateSpec::Network { .. } => ResourceKind::Network,
            CreateSpec::Subnet { .. } => ResourceKind::Subnet,
            CreateSpec::InternetGateway { .. } => ResourceKind::InternetGateway,
            CreateSpec::NatGateway { .. } => ResourceKind::NatGateway,
            CreateSpec::RouteTable { .. } => ResourceKind::RouteTable,
            CreateSpec::SecurityGroup { .. } => ResourceKind::SecurityGroup,
            CreateSpec::Instance { .. } => ResourceKind::Instance,
            CreateSpec::Volume { .. } => ResourceKind::Volume,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CreateSpec::Network { name, .. }
            | CreateSpec::Subnet { name, .. }
            | CreateSpec::InternetGateway { name }
            | CreateSpec::NatGateway { name, .. }
            | CreateSpec::RouteTable { name, .. }
            | CreateSpec::SecurityGroup { name, .. }
            | CreateSpec::Instance { name, .. }
            | CreateSpec::Volume { name, .. } => name,
        }
    }
}

/// Links between two existing objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Association {
    GatewayToNetwork {
        gateway_id: String,
        network_id: String,
    },
    RouteTableToSubnet {
        route_table_id: String,
        subnet_id: String,
    },
    VolumeToInstance {
        volume_id: String,
        instance_id: String,
        device_name: String,
    },
}

/// Where a route sends its traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    InternetGateway(String),
    NatGateway(String),
}

/// An allocated public address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub public_ip: String,
    pub allocation_id: String,
    pub instance_id: Option<String>,
}

/// Raw provider failure. Resource context is attached by the caller.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Provider client for one cloud vendor.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Look up an object by its `Name` tag.
    async fn find_by_name(&self, kind: ResourceKind, name: &str)
        -> ProviderResult<Option<ResourceIdentity>>;

    /// Look up an object by provider id.
    async fn describe(&self, kind: ResourceKind, id: &str) -> ProviderResult<Option<ResourceIdentity>>;

    /// Create an object tagged with `Name` plus `tags`; returns its id.
    async fn create(&self, spec: &CreateSpec, tags: &Tags) -> ProviderResult<String>;

    async fn delete(&self, kind: ResourceKind, id: &str) -> ProviderResult<()>;

    async fn tag(&self, id: &str, key: &str, value: &str) -> ProviderResult<()>;

    /// Returns the association id, if the provider assigns one.
    async fn associate(&self, association: &Association) -> ProviderResult<String>;

    async fn disassociate(&self, association: &Association) -> ProviderResult<()>;

    /// The route table the provider created along with the network.
    async fn default_route_table(&self, network_id: &str) -> ProviderResult<ResourceIdentity>;

    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        target: &RouteTarget,
    ) -> ProviderResult<()>;

    /// Allocate a public address tagged with `name`; returns the address.
    async fn allocate_floating_ip(&self, name: &str) -> ProviderResult<String>;

    async fn find_floating_ip(&self, public_ip: &str) -> ProviderResult<Option<FloatingIp>>;

    async fn find_floating_ip_by_name(&self, name: &str) -> ProviderResult<Option<FloatingIp>>;

    async fn release_floating_ip(&self, allocation_id: &str) -> ProviderResult<()>;

    /// Map a flavor name onto a provider instance type.
    async fn resolve_instance_type(&self, flavor: &str) -> ProviderResult<Option<String>>;

    /// Map an image name onto a provider image id.
    async fn resolve_image(&self, image: &str) -> ProviderResult<Option<String>>;

    async fn keypair_exists(&self, name: &str) -> ProviderResult<bool>;
}
