//! Network (VPC) and subnet reconcilers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{lookup, wait_for_state, Reconciler};
use crate::error::{DeployError, ProviderContext, Result};
use crate::log::LogBuilder;
use crate::provider::{CloudProvider, CreateSpec, LifecycleState, ResourceKind, Tags};

pub struct NetworkDesired {
    pub name: String,
    pub cidr: String,
}

pub struct NetworkReconciler {
    provider: Arc<dyn CloudProvider>,
    tags: Tags,
    create_timeout: Duration,
}

impl NetworkReconciler {
    pub fn new(provider: Arc<dyn CloudProvider>, tags: Tags, create_timeout: Duration) -> Self {
        Self {
            provider,
            tags,
            create_timeout,
        }
    }
}

#[async_trait]
impl Reconciler for NetworkReconciler {
    type Desired = NetworkDesired;
    const KIND: ResourceKind = ResourceKind::Network;

    async fn ensure(&self, desired: &NetworkDesired, lb: &mut LogBuilder) -> Result<String> {
        if let Some(found) = lookup(&self.provider, Self::KIND, &desired.name, lb).await? {
            lb.add(format!("network {} already exists: {}", desired.name, found.id));
            return Ok(found.id);
        }

        let spec = CreateSpec::Network {
            name: desired.name.clone(),
            cidr: desired.cidr.clone(),
        };
        let id = self
            .provider
            .create(&spec, &self.tags)
            .await
            .on(Self::KIND, &desired.name)?;
        lb.add(format!("created network {} ({}): {}", desired.name, desired.cidr, id));
        wait_for_state(
            &self.provider,
            Self::KIND,
            &id,
            &desired.name,
            |s| *s == LifecycleState::Available,
            self.create_timeout,
            lb,
        )
        .await?;
        Ok(id)
    }

    async fn delete(&self, name: &str, lb: &mut LogBuilder) -> Result<()> {
        let Some(found) = lookup(&self.provider, Self::KIND, name, lb).await? else {
            lb.add(format!("will not delete network {}, nothing to delete", name));
            return Ok(());
        };
        self.provider
            .delete(Self::KIND, &found.id)
            .await
            .on(Self::KIND, name)?;
        lb.add(format!("deleted network {} ({})", name, found.id));
        Ok(())
    }
}

pub struct SubnetDesired {
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    pub availability_zone: String,
}

pub struct SubnetReconciler {
    provider: Arc<dyn CloudProvider>,
    tags: Tags,
}

impl SubnetReconciler {
    pub fn new(provider: Arc<dyn CloudProvider>, tags: Tags) -> Self {
        Self { provider, tags }
    }
}

#[async_trait]
impl Reconciler for SubnetReconciler {
    type Desired = SubnetDesired;
    const KIND: ResourceKind = ResourceKind::Subnet;

    async fn ensure(&self, desired: &SubnetDesired, lb: &mut LogBuilder) -> Result<String> {
        if let Some(found) = lookup(&self.provider, Self::KIND, &desired.name, lb).await? {
            if found.network_id.as_deref() != Some(desired.network_id.as_str()) {
                return Err(DeployError::conflict(
                    Self::KIND,
                    &desired.name,
                    format!("network {}", desired.network_id),
                    format!("network {}", found.network_id.as_deref().unwrap_or("<none>")),
                ));
            }
            lb.add(format!("subnet {} already exists: {}", desired.name, found.id));
            return Ok(found.id);
        }

        let spec = CreateSpec::Subnet {
            name: desired.name.clone(),
            network_id: desired.network_id.clone(),
            cidr: desired.cidr.clone(),
            availability_zone: desired.availability_zone.clone(),
        };
        let id = self
            .provider
            .create(&spec, &self.tags)
            .await
            .on(Self::KIND, &desired.name)?;
        lb.add(format!(
            "created subnet {} ({} in {}): {}",
            desired.name, desired.cidr, desired.availability_zone, id
        ));
        Ok(id)
    }

    async fn delete(&self, name: &str, lb: &mut LogBuilder) -> Result<()> {
        let Some(found) = lookup(&self.provider, Self::KIND, name, lb).await? else {
            lb.add(format!("will not delete subnet {}, nothing to delete", name));
            return Ok(());
        };
        self.provider
            .delete(Self::KIND, &found.id)
            .await
            .on(Self::KIND, name)?;
        lb.add(format!("deleted subnet {} ({})", name, found.id));
        Ok(())
    }
}
