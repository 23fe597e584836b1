//! EC2 provider client for cloudrig.
//!
//! Every call shells out to `aws ec2 ... --output json`, so credentials,
//! region and profile resolution are whatever the installed CLI does.

mod cli;
pub mod parse;

use async_trait::async_trait;
use cloudrig_core::provider::{
    Association, CloudProvider, CreateSpec, FloatingIp, ProviderError, ProviderResult,
    ResourceIdentity, ResourceKind, RouteTarget, Tags,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

pub use cli::AwsCli;
use cli::{args, is_not_found, name_filter, tag_specification};
use parse::*;

/// [`CloudProvider`] backed by the `aws` command-line tool.
#[derive(Debug, Clone, Default)]
pub struct AwsCliProvider {
    cli: AwsCli,
}

fn id_at(value: &Value, pointer: &str, op: &str) -> ProviderResult<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::new(format!("aws ec2 {} returned no {}", op, pointer)))
}

impl AwsCliProvider {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    /// Describe call that treats a `*.NotFound` error as absence.
    async fn lookup<T: DeserializeOwned>(&self, op: &str, args: &[String]) -> ProviderResult<Option<T>> {
        match self.cli.json(op, args).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Describe one kind with either a name filter or an id argument.
    async fn describe_kind(
        &self,
        kind: ResourceKind,
        selector: Vec<String>,
    ) -> ProviderResult<Option<ResourceIdentity>> {
        let found = match kind {
            ResourceKind::Network => self
                .lookup::<DescribeVpcs>("describe-vpcs", &selector)
                .await?
                .and_then(DescribeVpcs::identity),
            ResourceKind::Subnet => self
                .lookup::<DescribeSubnets>("describe-subnets", &selector)
                .await?
                .and_then(DescribeSubnets::identity),
            ResourceKind::InternetGateway => self
                .lookup::<DescribeInternetGateways>("describe-internet-gateways", &selector)
                .await?
                .and_then(DescribeInternetGateways::identity),
            ResourceKind::NatGateway => self
                .lookup::<DescribeNatGateways>("describe-nat-gateways", &selector)
                .await?
                .and_then(DescribeNatGateways::identity),
            ResourceKind::RouteTable => self
                .lookup::<DescribeRouteTables>("describe-route-tables", &selector)
                .await?
                .and_then(|r| r.route_tables.first().map(RouteTable::identity)),
            ResourceKind::SecurityGroup => self
                .lookup::<DescribeSecurityGroups>("describe-security-groups", &selector)
                .await?
                .and_then(DescribeSecurityGroups::identity),
            ResourceKind::Instance => self
                .lookup::<DescribeInstances>("describe-instances", &selector)
                .await?
                .and_then(DescribeInstances::identity),
            ResourceKind::Volume => self
                .lookup::<DescribeVolumes>("describe-volumes", &selector)
                .await?
                .and_then(DescribeVolumes::identity),
            ResourceKind::FloatingIp => {
                return Err(ProviderError::new(
                    "floating ips are looked up by address, not by kind",
                ))
            }
        };
        Ok(found)
    }

    async fn authorize(&self, group_id: &str, spec: &CreateSpec) -> ProviderResult<()> {
        let CreateSpec::SecurityGroup { rules, .. } = spec else {
            return Ok(());
        };
        for rule in rules {
            let op = if rule.direction == "egress" {
                "authorize-security-group-egress"
            } else {
                "authorize-security-group-ingress"
            };
            let permission = format!(
                "IpProtocol={},FromPort={},ToPort={},IpRanges=[{{CidrIp={}}}]",
                rule.protocol, rule.port, rule.port, rule.remote_ip
            );
            self.cli
                .run(op, &args(["--group-id", group_id, "--ip-permissions", &permission]))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for AwsCliProvider {
    async fn find_by_name(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> ProviderResult<Option<ResourceIdentity>> {
        let selector = match kind {
            ResourceKind::SecurityGroup => {
                args(["--filters", &format!("Name=group-name,Values={}", name)])
            }
            // describe-nat-gateways spells the option in the singular
            ResourceKind::NatGateway => {
                args(["--filter", &format!("Name=tag:Name,Values={}", name)])
            }
            _ => name_filter(name),
        };
        self.describe_kind(kind, selector).await
    }

    async fn describe(&self, kind: ResourceKind, id: &str) -> ProviderResult<Option<ResourceIdentity>> {
        let flag = match kind {
            ResourceKind::Network => "--vpc-ids",
            ResourceKind::Subnet => "--subnet-ids",
            ResourceKind::InternetGateway => "--internet-gateway-ids",
            ResourceKind::NatGateway => "--nat-gateway-ids",
            ResourceKind::RouteTable => "--route-table-ids",
            ResourceKind::SecurityGroup => "--group-ids",
            ResourceKind::Instance => "--instance-ids",
            ResourceKind::Volume => "--volume-ids",
            ResourceKind::FloatingIp => "--allocation-ids",
        };
        self.describe_kind(kind, args([flag, id])).await
    }

    async fn create(&self, spec: &CreateSpec, tags: &Tags) -> ProviderResult<String> {
        let name = spec.name();
        let (op, resource_type, mut argv, pointer) = match spec {
            CreateSpec::Network { cidr, .. } => (
                "create-vpc",
                "vpc",
                args(["--cidr-block", cidr]),
                "/Vpc/VpcId",
            ),
            CreateSpec::Subnet {
                network_id,
                cidr,
                availability_zone,
                ..
            } => (
                "create-subnet",
                "subnet",
                args([
                    "--vpc-id",
                    network_id,
                    "--cidr-block",
                    cidr,
                    "--availability-zone",
                    availability_zone,
                ]),
                "/Subnet/SubnetId",
            ),
            CreateSpec::InternetGateway { .. } => (
                "create-internet-gateway",
                "internet-gateway",
                Vec::new(),
                "/InternetGateway/InternetGatewayId",
            ),
            CreateSpec::NatGateway {
                subnet_id,
                allocation_id,
                ..
            } => (
                "create-nat-gateway",
                "natgateway",
                args(["--subnet-id", subnet_id, "--allocation-id", allocation_id]),
                "/NatGateway/NatGatewayId",
            ),
            CreateSpec::RouteTable { network_id, .. } => (
                "create-route-table",
                "route-table",
                args(["--vpc-id", network_id]),
                "/RouteTable/RouteTableId",
            ),
            CreateSpec::SecurityGroup { network_id, .. } => (
                "create-security-group",
                "security-group",
                args([
                    "--group-name",
                    name,
                    "--description",
                    name,
                    "--vpc-id",
                    network_id,
                ]),
                "/GroupId",
            ),
            CreateSpec::Instance {
                instance_type,
                image_id,
                key_name,
                subnet_id,
                security_group_id,
                private_ip,
                ..
            } => (
                "run-instances",
                "instance",
                args([
                    "--image-id",
                    image_id,
                    "--instance-type",
                    instance_type,
                    "--key-name",
                    key_name,
                    "--subnet-id",
                    subnet_id,
                    "--security-group-ids",
                    security_group_id,
                    "--private-ip-address",
                    private_ip,
                    "--count",
                    "1",
                ]),
                "/Instances/0/InstanceId",
            ),
            CreateSpec::Volume {
                availability_zone,
                size_gb,
                volume_type,
                ..
            } => (
                "create-volume",
                "volume",
                args([
                    "--availability-zone",
                    availability_zone,
                    "--size",
                    &size_gb.to_string(),
                    "--volume-type",
                    volume_type,
                ]),
                "/VolumeId",
            ),
        };
        argv.push("--tag-specifications".to_string());
        argv.push(tag_specification(resource_type, name, tags));

        let created: Value = self.cli.json(op, &argv).await?;
        let id = id_at(&created, pointer, op)?;
        info!(kind = %spec.kind(), name, id = %id, "created");

        // A group left without its rules would be found and reused as is.
        if let Err(e) = self.authorize(&id, spec).await {
            warn!(name, id = %id, error = %e, "Rules not applied, deleting security group");
            if let Err(cleanup) = self.delete(spec.kind(), &id).await {
                warn!(name, id = %id, error = %cleanup, "Cannot delete security group");
            }
            return Err(e);
        }
        Ok(id)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> ProviderResult<()> {
        let (op, flag) = match kind {
            ResourceKind::Network => ("delete-vpc", "--vpc-id"),
            ResourceKind::Subnet => ("delete-subnet", "--subnet-id"),
            ResourceKind::InternetGateway => ("delete-internet-gateway", "--internet-gateway-id"),
            ResourceKind::NatGateway => ("delete-nat-gateway", "--nat-gateway-id"),
            ResourceKind::RouteTable => ("delete-route-table", "--route-table-id"),
            ResourceKind::SecurityGroup => ("delete-security-group", "--group-id"),
            ResourceKind::Instance => ("terminate-instances", "--instance-ids"),
            ResourceKind::Volume => ("delete-volume", "--volume-id"),
            ResourceKind::FloatingIp => ("release-address", "--allocation-id"),
        };
        self.cli.run(op, &args([flag, id])).await?;
        info!(kind = %kind, id, "deleted");
        Ok(())
    }

    async fn tag(&self, id: &str, key: &str, value: &str) -> ProviderResult<()> {
        let tag = format!("Key={},Value={}", key, value);
        self.cli
            .run("create-tags", &args(["--resources", id, "--tags", &tag]))
            .await?;
        Ok(())
    }

    async fn associate(&self, association: &Association) -> ProviderResult<String> {
        match association {
            Association::GatewayToNetwork {
                gateway_id,
                network_id,
            } => {
                self.cli
                    .run(
                        "attach-internet-gateway",
                        &args(["--internet-gateway-id", gateway_id, "--vpc-id", network_id]),
                    )
                    .await?;
                Ok(String::new())
            }
            Association::RouteTableToSubnet {
                route_table_id,
                subnet_id,
            } => {
                let op = "associate-route-table";
                let out: Value = self
                    .cli
                    .json(op, &args(["--route-table-id", route_table_id, "--subnet-id", subnet_id]))
                    .await?;
                id_at(&out, "/AssociationId", op)
            }
            Association::VolumeToInstance {
                volume_id,
                instance_id,
                device_name,
            } => {
                self.cli
                    .run(
                        "attach-volume",
                        &args([
                            "--volume-id",
                            volume_id,
                            "--instance-id",
                            instance_id,
                            "--device",
                            device_name,
                        ]),
                    )
                    .await?;
                Ok(String::new())
            }
        }
    }

    async fn disassociate(&self, association: &Association) -> ProviderResult<()> {
        match association {
            Association::GatewayToNetwork {
                gateway_id,
                network_id,
            } => {
                self.cli
                    .run(
                        "detach-internet-gateway",
                        &args(["--internet-gateway-id", gateway_id, "--vpc-id", network_id]),
                    )
                    .await?;
            }
            Association::RouteTableToSubnet {
                route_table_id,
                subnet_id,
            } => {
                let tables: DescribeRouteTables = self
                    .cli
                    .json("describe-route-tables", &args(["--route-table-ids", route_table_id]))
                    .await?;
                let assoc = tables
                    .route_tables
                    .iter()
                    .find_map(|t| t.association_with(subnet_id));
                if let Some(assoc) = assoc {
                    self.cli
                        .run("disassociate-route-table", &args(["--association-id", &assoc]))
                        .await?;
                }
            }
            Association::VolumeToInstance {
                volume_id,
                instance_id,
                ..
            } => {
                self.cli
                    .run(
                        "detach-volume",
                        &args(["--volume-id", volume_id, "--instance-id", instance_id]),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn default_route_table(&self, network_id: &str) -> ProviderResult<ResourceIdentity> {
        let tables: DescribeRouteTables = self
            .cli
            .json(
                "describe-route-tables",
                &args([
                    "--filters",
                    &format!("Name=vpc-id,Values={}", network_id),
                    "Name=association.main,Values=true",
                ]),
            )
            .await?;
        tables
            .route_tables
            .first()
            .map(RouteTable::identity)
            .ok_or_else(|| ProviderError::new(format!("network {} has no main route table", network_id)))
    }

    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        target: &RouteTarget,
    ) -> ProviderResult<()> {
        let (flag, target_id) = match target {
            RouteTarget::InternetGateway(id) => ("--gateway-id", id),
            RouteTarget::NatGateway(id) => ("--nat-gateway-id", id),
        };
        self.cli
            .run(
                "create-route",
                &args([
                    "--route-table-id",
                    route_table_id,
                    "--destination-cidr-block",
                    destination_cidr,
                    flag,
                    target_id,
                ]),
            )
            .await?;
        Ok(())
    }

    async fn allocate_floating_ip(&self, name: &str) -> ProviderResult<String> {
        let op = "allocate-address";
        let out: Value = self
            .cli
            .json(
                op,
                &args([
                    "--domain",
                    "vpc",
                    "--tag-specifications",
                    &tag_specification("elastic-ip", name, &Tags::new()),
                ]),
            )
            .await?;
        id_at(&out, "/PublicIp", op)
    }

    async fn find_floating_ip(&self, public_ip: &str) -> ProviderResult<Option<FloatingIp>> {
        let found: DescribeAddresses = self
            .cli
            .json(
                "describe-addresses",
                &args(["--filters", &format!("Name=public-ip,Values={}", public_ip)]),
            )
            .await?;
        Ok(found.floating_ip())
    }

    async fn find_floating_ip_by_name(&self, name: &str) -> ProviderResult<Option<FloatingIp>> {
        let found: DescribeAddresses = self.cli.json("describe-addresses", &name_filter(name)).await?;
        Ok(found.floating_ip())
    }

    async fn release_floating_ip(&self, allocation_id: &str) -> ProviderResult<()> {
        self.cli
            .run("release-address", &args(["--allocation-id", allocation_id]))
            .await?;
        Ok(())
    }

    async fn resolve_instance_type(&self, flavor: &str) -> ProviderResult<Option<String>> {
        let found = match self
            .cli
            .json::<DescribeInstanceTypes>("describe-instance-types", &args(["--instance-types", flavor]))
            .await
        {
            Ok(found) => found,
            Err(e) if e.message().contains("InvalidInstanceType") => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(found.instance_types.into_iter().next().map(|t| t.instance_type))
    }

    async fn resolve_image(&self, image: &str) -> ProviderResult<Option<String>> {
        let selector = if image.starts_with("ami-") {
            args(["--image-ids", image])
        } else {
            args(["--filters", &format!("Name=name,Values={}", image)])
        };
        let found = self.lookup::<DescribeImages>("describe-images", &selector).await?;
        Ok(found.and_then(DescribeImages::newest))
    }

    async fn keypair_exists(&self, name: &str) -> ProviderResult<bool> {
        match self.cli.run("describe-key-pairs", &args(["--key-names", name])).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
