//! Internet gateway and NAT gateway reconcilers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{lookup, wait_for_state, wait_until_deleted, Reconciler};
use crate::error::{DeployError, ProviderContext, Result};
use crate::log::LogBuilder;
use crate::provider::{
    Association, CloudProvider, CreateSpec, LifecycleState, ResourceIdentity, ResourceKind, Tags,
};

pub struct InternetGatewayDesired {
    pub name: String,
    /// Network the gateway must be attached to.
    pub network_id: String,
}

pub struct InternetGatewayReconciler {
    provider: Arc<dyn CloudProvider>,
    tags: Tags,
}

/// Some providers report a live attachment as "available".
fn is_attached(gw: &ResourceIdentity) -> bool {
    gw.network_id.is_some()
        && matches!(
            gw.state,
            LifecycleState::Attached | LifecycleState::Attaching | LifecycleState::Available
        )
}

impl InternetGatewayReconciler {
    pub fn new(provider: Arc<dyn CloudProvider>, tags: Tags) -> Self {
        Self { provider, tags }
    }
}

#[async_trait]
impl Reconciler for InternetGatewayReconciler {
    type Desired = InternetGatewayDesired;
    const KIND: ResourceKind = ResourceKind::InternetGateway;

    async fn ensure(&self, desired: &InternetGatewayDesired, lb: &mut LogBuilder) -> Result<String> {
        let name = &desired.name;
        let existing = lookup(&self.provider, Self::KIND, name, lb).await?;

        let gw = match existing {
            Some(found) => {
                if is_attached(&found) {
                    let attached = found.network_id.as_deref().unwrap_or_default();
                    if attached != desired.network_id {
                        return Err(DeployError::conflict(
                            Self::KIND,
                            name,
                            format!("attached to network {}", desired.network_id),
                            format!("attached to network {}", attached),
                        ));
                    }
                    lb.add(format!(
                        "internet gateway {} ({}) already attached to {}",
                        name, found.id, attached
                    ));
                    return Ok(found.id);
                }
                found
            }
            None => {
                let spec = CreateSpec::InternetGateway { name: name.clone() };
                let id = self
                    .provider
                    .create(&spec, &self.tags)
                    .await
                    .on(Self::KIND, name)?;
                lb.add(format!("created internet gateway {}: {}", name, id));
                ResourceIdentity::new(id, LifecycleState::Detached)
            }
        };

        let attach = Association::GatewayToNetwork {
            gateway_id: gw.id.clone(),
            network_id: desired.network_id.clone(),
        };
        self.provider
            .associate(&attach)
            .await
            .on(Self::KIND, name)?;
        lb.add(format!(
            "attached internet gateway {} ({}) to network {}",
            name, gw.id, desired.network_id
        ));
        Ok(gw.id)
    }

    async fn delete(&self, name: &str, lb: &mut LogBuilder) -> Result<()> {
        let Some(found) = lookup(&self.provider, Self::KIND, name, lb).await? else {
            lb.add(format!(
                "will not delete internet gateway {}, nothing to delete",
                name
            ));
            return Ok(());
        };

        // Fails while the network still has mapped public addresses, so the
        // NAT gateway has to be fully gone first.
        if is_attached(&found) {
            let network_id = found.network_id.clone().unwrap_or_default();
            let detach = Association::GatewayToNetwork {
                gateway_id: found.id.clone(),
                network_id: network_id.clone(),
            };
            self.provider
                .disassociate(&detach)
                .await
                .on(Self::KIND, name)?;
            lb.add(format!(
                "detached internet gateway {} from network {}",
                found.id, network_id
            ));
        } else {
            lb.add(format!(
                "internet gateway {} was not attached, no need to detach",
                found.id
            ));
        }

        self.provider
            .delete(Self::KIND, &found.id)
            .await
            .on(Self::KIND, name)?;
        lb.add(format!("deleted internet gateway {} ({})", name, found.id));
        Ok(())
    }
}

pub struct NatGatewayDesired {
    pub name: String,
    /// Public subnet the gateway lives in.
    pub subnet_id: String,
    /// Allocation id of its public address.
    pub allocation_id: String,
}

pub struct NatGatewayReconciler {
    provider: Arc<dyn CloudProvider>,
    tags: Tags,
    create_timeout: Duration,
    delete_timeout: Duration,
}

impl NatGatewayReconciler {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        tags: Tags,
        create_timeout: Duration,
        delete_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            tags,
            create_timeout,
            delete_timeout,
        }
    }
}

#[async_trait]
impl Reconciler for NatGatewayReconciler {
    type Desired = NatGatewayDesired;
    const KIND: ResourceKind = ResourceKind::NatGateway;

    async fn ensure(&self, desired: &NatGatewayDesired, lb: &mut LogBuilder) -> Result<String> {
        let name = &desired.name;
        match lookup(&self.provider, Self::KIND, name, lb).await? {
            Some(found) if found.state != LifecycleState::Deleted => {
                if found.state != LifecycleState::Available {
                    return Err(DeployError::conflict(
                        Self::KIND,
                        name,
                        "state available",
                        format!("state {}", found.state),
                    ));
                }
                if let Some(subnet) = found.subnet_id.as_deref() {
                    if subnet != desired.subnet_id {
                        return Err(DeployError::conflict(
                            Self::KIND,
                            name,
                            format!("subnet {}", desired.subnet_id),
                            format!("subnet {}", subnet),
                        ));
                    }
                }
                lb.add(format!("nat gateway {} already available: {}", name, found.id));
                Ok(found.id)
            }
            _ => {
                let spec = CreateSpec::NatGateway {
                    name: name.clone(),
                    subnet_id: desired.subnet_id.clone(),
                    allocation_id: desired.allocation_id.clone(),
                };
                let id = self
                    .provider
                    .create(&spec, &self.tags)
                    .await
                    .on(Self::KIND, name)?;
                lb.add(format!(
                    "created nat gateway {} in subnet {}: {}",
                    name, desired.subnet_id, id
                ));
                wait_for_state(
                    &self.provider,
                    Self::KIND,
                    &id,
                    name,
                    |s| *s == LifecycleState::Available,
                    self.create_timeout,
                    lb,
                )
                .await?;
                Ok(id)
            }
        }
    }

    async fn delete(&self, name: &str, lb: &mut LogBuilder) -> Result<()> {
        let found = lookup(&self.provider, Self::KIND, name, lb).await?;
        let Some(found) = found.filter(|f| f.state != LifecycleState::Deleted) else {
            lb.add(format!("will not delete nat gateway {}, nothing to delete", name));
            return Ok(());
        };

        if found.state != LifecycleState::Deleting {
            self.provider
                .delete(Self::KIND, &found.id)
                .await
                .on(Self::KIND, name)?;
            lb.add(format!("deleting nat gateway {} ({})", name, found.id));
        }
        wait_until_deleted(
            &self.provider,
            Self::KIND,
            &found.id,
            name,
            self.delete_timeout,
            lb,
        )
        .await
    }
}
