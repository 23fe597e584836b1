//! Route table reconciler.
//!
//! A named table is created once, associated with its subnet, and given a
//! default route at creation time. Re-running `ensure` against an existing
//! table checks its associations but does not re-verify or repair the route.

use std::sync::Arc;

use async_trait::async_trait;

use super::{lookup, Reconciler};
use crate::error::{DeployError, ProviderContext, Result};
use crate::log::LogBuilder;
use crate::provider::{
    Association, CloudProvider, CreateSpec, ResourceIdentity, ResourceKind, RouteTarget, Tags,
};

/// Destination of the route every table gets.
pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";

pub struct RouteTableDesired {
    pub name: String,
    pub network_id: String,
    pub subnet_id: String,
    pub target: RouteTarget,
}

pub struct RouteTableReconciler {
    provider: Arc<dyn CloudProvider>,
    tags: Tags,
}

impl RouteTableReconciler {
    pub fn new(provider: Arc<dyn CloudProvider>, tags: Tags) -> Self {
        Self { provider, tags }
    }

    fn check_associations(
        name: &str,
        found: &ResourceIdentity,
        network_id: &str,
        subnet_id: &str,
    ) -> Result<()> {
        if let Some(net) = found.network_id.as_deref() {
            if net != network_id {
                return Err(DeployError::conflict(
                    ResourceKind::RouteTable,
                    name,
                    format!("network {}", network_id),
                    format!("network {}", net),
                ));
            }
        }
        if let Some(subnet) = found.subnet_id.as_deref() {
            if subnet != subnet_id {
                return Err(DeployError::conflict(
                    ResourceKind::RouteTable,
                    name,
                    format!("associated with subnet {}", subnet_id),
                    format!("associated with subnet {}", subnet),
                ));
            }
        }
        Ok(())
    }

    async fn associate_and_route(
        &self,
        name: &str,
        table_id: &str,
        subnet_id: &str,
        target: &RouteTarget,
        lb: &mut LogBuilder,
    ) -> Result<()> {
        let assoc = Association::RouteTableToSubnet {
            route_table_id: table_id.to_string(),
            subnet_id: subnet_id.to_string(),
        };
        let assoc_id = self
            .provider
            .associate(&assoc)
            .await
            .on(ResourceKind::RouteTable, name)?;
        lb.add(format!(
            "associated route table {} with subnet {}: {}",
            table_id, subnet_id, assoc_id
        ));

        self.provider
            .create_route(table_id, DEFAULT_ROUTE, target)
            .await
            .on(ResourceKind::RouteTable, name)?;
        lb.add(format!(
            "route table {} sends {} to {:?}",
            table_id, DEFAULT_ROUTE, target
        ));
        Ok(())
    }

    /// Reuse the network's main table for a subnet instead of creating one.
    ///
    /// The table gets tagged with `name` once its associations check out.
    pub async fn ensure_main(&self, desired: &RouteTableDesired, lb: &mut LogBuilder) -> Result<String> {
        let name = &desired.name;
        let table = self
            .provider
            .default_route_table(&desired.network_id)
            .await
            .on(ResourceKind::RouteTable, name)?;
        lb.add_object("default route table", &table);

        Self::check_associations(name, &table, &desired.network_id, &desired.subnet_id)?;

        self.provider
            .tag(&table.id, "Name", name)
            .await
            .on(ResourceKind::RouteTable, name)?;
        if table.subnet_id.is_none() {
            self.associate_and_route(name, &table.id, &desired.subnet_id, &desired.target, lb)
                .await?;
        } else {
            lb.add(format!(
                "default route table {} already associated with subnet {}",
                table.id, desired.subnet_id
            ));
        }
        Ok(table.id)
    }

    /// Delete a named table, refusing to touch one that lives in another network.
    pub async fn delete_in_network(
        &self,
        name: &str,
        network_id: &str,
        lb: &mut LogBuilder,
    ) -> Result<()> {
        let Some(found) = lookup(&self.provider, ResourceKind::RouteTable, name, lb).await? else {
            lb.add(format!("will not delete route table {}, nothing to delete", name));
            return Ok(());
        };
        if let Some(net) = found.network_id.as_deref() {
            if net != network_id {
                return Err(DeployError::conflict(
                    ResourceKind::RouteTable,
                    name,
                    format!("network {}", network_id),
                    format!("network {}", net),
                ));
            }
        }
        self.delete_found(name, &found, lb).await
    }

    async fn delete_found(&self, name: &str, found: &ResourceIdentity, lb: &mut LogBuilder) -> Result<()> {
        self.provider
            .delete(ResourceKind::RouteTable, &found.id)
            .await
            .on(ResourceKind::RouteTable, name)?;
        lb.add(format!("deleted route table {} ({})", name, found.id));
        Ok(())
    }
}

#[async_trait]
impl Reconciler for RouteTableReconciler {
    type Desired = RouteTableDesired;
    const KIND: ResourceKind = ResourceKind::RouteTable;

    async fn ensure(&self, desired: &RouteTableDesired, lb: &mut LogBuilder) -> Result<String> {
        let name = &desired.name;
        if let Some(found) = lookup(&self.provider, Self::KIND, name, lb).await? {
            Self::check_associations(name, &found, &desired.network_id, &desired.subnet_id)?;
            lb.add(format!("route table {} already exists: {}", name, found.id));
            return Ok(found.id);
        }

        let spec = CreateSpec::RouteTable {
            name: name.clone(),
            network_id: desired.network_id.clone(),
        };
        let id = self
            .provider
            .create(&spec, &self.tags)
            .await
            .on(Self::KIND, name)?;
        lb.add(format!(
            "created route table {} in network {}: {}",
            name, desired.network_id, id
        ));
        self.associate_and_route(name, &id, &desired.subnet_id, &desired.target, lb)
            .await?;
        Ok(id)
    }

    async fn delete(&self, name: &str, lb: &mut LogBuilder) -> Result<()> {
        let Some(found) = lookup(&self.provider, Self::KIND, name, lb).await? else {
            lb.add(format!("will not delete route table {}, nothing to delete", name));
            return Ok(());
        };
        self.delete_found(name, &found, lb).await
    }
}
