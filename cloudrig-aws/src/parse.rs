//! `aws ec2 ... --output json` response shapes and their mapping onto
//! provider-neutral identities.

use cloudrig_core::provider::{FloatingIp, LifecycleState, ResourceIdentity};
use serde::Deserialize;

/// Map an EC2 state string onto the lifecycle enum.
pub fn state(s: &str) -> LifecycleState {
    match s {
        "pending" | "creating" => LifecycleState::Pending,
        "available" => LifecycleState::Available,
        "in-use" => LifecycleState::InUse,
        "attaching" => LifecycleState::Attaching,
        "attached" => LifecycleState::Attached,
        "detaching" => LifecycleState::Detaching,
        "detached" => LifecycleState::Detached,
        "running" => LifecycleState::Running,
        "stopping" => LifecycleState::Stopping,
        "stopped" => LifecycleState::Stopped,
        "deleting" | "shutting-down" => LifecycleState::Deleting,
        "deleted" | "terminated" => LifecycleState::Deleted,
        other => LifecycleState::Other(other.to_string()),
    }
}

/// Prefer live objects over ones that linger after deletion.
fn pick_live(mut found: Vec<ResourceIdentity>) -> Option<ResourceIdentity> {
    let live = found.iter().position(|r| !r.state.is_terminal());
    match live {
        Some(i) => Some(found.swap_remove(i)),
        None => found.into_iter().next(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vpc {
    pub vpc_id: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeVpcs {
    #[serde(default)]
    pub vpcs: Vec<Vpc>,
}

impl DescribeVpcs {
    pub fn identity(self) -> Option<ResourceIdentity> {
        self.vpcs
            .into_iter()
            .next()
            .map(|v| ResourceIdentity::new(v.vpc_id, state(&v.state)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeSubnets {
    #[serde(default)]
    pub subnets: Vec<Subnet>,
}

impl DescribeSubnets {
    pub fn identity(self) -> Option<ResourceIdentity> {
        self.subnets
            .into_iter()
            .next()
            .map(|s| ResourceIdentity::new(s.subnet_id, state(&s.state)).in_network(s.vpc_id))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GatewayAttachment {
    pub state: String,
    pub vpc_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InternetGateway {
    pub internet_gateway_id: String,
    #[serde(default)]
    pub attachments: Vec<GatewayAttachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInternetGateways {
    #[serde(default)]
    pub internet_gateways: Vec<InternetGateway>,
}

impl DescribeInternetGateways {
    /// The attachment state becomes the gateway state. EC2 reports a live
    /// attachment as `available`, which is kept as is.
    pub fn identity(self) -> Option<ResourceIdentity> {
        self.internet_gateways.into_iter().next().map(|gw| {
            match gw.attachments.into_iter().next() {
                Some(att) => ResourceIdentity::new(gw.internet_gateway_id, state(&att.state))
                    .in_network(att.vpc_id),
                None => ResourceIdentity::new(gw.internet_gateway_id, LifecycleState::Detached),
            }
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NatGateway {
    pub nat_gateway_id: String,
    pub state: String,
    pub subnet_id: Option<String>,
    pub vpc_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeNatGateways {
    #[serde(default)]
    pub nat_gateways: Vec<NatGateway>,
}

impl DescribeNatGateways {
    pub fn identity(self) -> Option<ResourceIdentity> {
        let found = self
            .nat_gateways
            .into_iter()
            .map(|n| {
                let mut id = ResourceIdentity::new(n.nat_gateway_id, state(&n.state));
                id.subnet_id = n.subnet_id;
                id.network_id = n.vpc_id;
                id
            })
            .collect();
        pick_live(found)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteTableAssociation {
    #[serde(default)]
    pub main: bool,
    pub subnet_id: Option<String>,
    pub route_table_association_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteTable {
    pub route_table_id: String,
    pub vpc_id: String,
    #[serde(default)]
    pub associations: Vec<RouteTableAssociation>,
}

impl RouteTable {
    pub fn identity(&self) -> ResourceIdentity {
        let mut id = ResourceIdentity::new(self.route_table_id.clone(), LifecycleState::Available)
            .in_network(self.vpc_id.clone());
        id.subnet_id = self
            .associations
            .iter()
            .find_map(|a| a.subnet_id.clone());
        id
    }

    /// Association id linking this table to `subnet_id`.
    pub fn association_with(&self, subnet_id: &str) -> Option<String> {
        self.associations
            .iter()
            .find(|a| a.subnet_id.as_deref() == Some(subnet_id))
            .and_then(|a| a.route_table_association_id.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeRouteTables {
    #[serde(default)]
    pub route_tables: Vec<RouteTable>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroup {
    pub group_id: String,
    pub vpc_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeSecurityGroups {
    #[serde(default)]
    pub security_groups: Vec<SecurityGroup>,
}

impl DescribeSecurityGroups {
    pub fn identity(self) -> Option<ResourceIdentity> {
        self.security_groups.into_iter().next().map(|g| {
            let mut id = ResourceIdentity::new(g.group_id, LifecycleState::Available);
            id.network_id = g.vpc_id;
            id
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceState {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub instance_id: String,
    pub state: InstanceState,
    pub subnet_id: Option<String>,
    pub vpc_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Reservation {
    #[serde(default)]
    pub instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInstances {
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

impl DescribeInstances {
    pub fn identity(self) -> Option<ResourceIdentity> {
        let found = self
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .map(|i| {
                let mut id = ResourceIdentity::new(i.instance_id, state(&i.state.name));
                id.subnet_id = i.subnet_id;
                id.network_id = i.vpc_id;
                id
            })
            .collect();
        pick_live(found)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeAttachment {
    pub instance_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub volume_id: String,
    pub state: String,
    #[serde(default)]
    pub attachments: Vec<VolumeAttachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeVolumes {
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl DescribeVolumes {
    pub fn identity(self) -> Option<ResourceIdentity> {
        self.volumes.into_iter().next().map(|v| {
            let mut id = ResourceIdentity::new(v.volume_id, state(&v.state));
            id.attached_to = v.attachments.into_iter().next().map(|a| a.instance_id);
            id
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Address {
    pub public_ip: String,
    pub allocation_id: String,
    pub instance_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeAddresses {
    #[serde(default)]
    pub addresses: Vec<Address>,
}

impl DescribeAddresses {
    pub fn floating_ip(self) -> Option<FloatingIp> {
        self.addresses.into_iter().next().map(|a| FloatingIp {
            public_ip: a.public_ip,
            allocation_id: a.allocation_id,
            instance_id: a.instance_id,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Image {
    pub image_id: String,
    #[serde(default)]
    pub creation_date: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeImages {
    #[serde(default)]
    pub images: Vec<Image>,
}

impl DescribeImages {
    /// Newest image wins when several share a name.
    pub fn newest(self) -> Option<String> {
        self.images
            .into_iter()
            .max_by(|a, b| a.creation_date.cmp(&b.creation_date))
            .map(|i| i.image_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceTypeInfo {
    pub instance_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInstanceTypes {
    #[serde(default)]
    pub instance_types: Vec<InstanceTypeInfo>,
}
