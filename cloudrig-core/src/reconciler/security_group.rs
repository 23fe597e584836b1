//! Security group reconciler.

use std::sync::Arc;

use async_trait::async_trait;

use super::{lookup, Reconciler};
use crate::error::{DeployError, ProviderContext, Result};
use crate::log::LogBuilder;
use crate::provider::{CloudProvider, CreateSpec, ResourceKind, SecurityRule, Tags};

pub struct SecurityGroupDesired {
    pub name: String,
    pub network_id: String,
    pub rules: Vec<SecurityRule>,
}

pub struct SecurityGroupReconciler {
    provider: Arc<dyn CloudProvider>,
    tags: Tags,
}

impl SecurityGroupReconciler {
    pub fn new(provider: Arc<dyn CloudProvider>, tags: Tags) -> Self {
        Self { provider, tags }
    }
}

#[async_trait]
impl Reconciler for SecurityGroupReconciler {
    type Desired = SecurityGroupDesired;
    const KIND: ResourceKind = ResourceKind::SecurityGroup;

    async fn ensure(&self, desired: &SecurityGroupDesired, lb: &mut LogBuilder) -> Result<String> {
        let name = &desired.name;
        if let Some(found) = lookup(&self.provider, Self::KIND, name, lb).await? {
            if found.network_id.as_deref() != Some(desired.network_id.as_str()) {
                return Err(DeployError::conflict(
                    Self::KIND,
                    name,
                    format!("network {}", desired.network_id),
                    format!("network {}", found.network_id.as_deref().unwrap_or("<none>")),
                ));
            }
            lb.add(format!("security group {} already exists: {}", name, found.id));
            return Ok(found.id);
        }

        let spec = CreateSpec::SecurityGroup {
            name: name.clone(),
            network_id: desired.network_id.clone(),
            rules: desired.rules.clone(),
        };
        let id = self
            .provider
            .create(&spec, &self.tags)
            .await
            .on(Self::KIND, name)?;
        lb.add(format!(
            "created security group {} with {} rules: {}",
            name,
            desired.rules.len(),
            id
        ));
        Ok(id)
    }

    async fn delete(&self, name: &str, lb: &mut LogBuilder) -> Result<()> {
        let Some(found) = lookup(&self.provider, Self::KIND, name, lb).await? else {
            lb.add(format!("will not delete security group {}, nothing to delete", name));
            return Ok(());
        };
        self.provider
            .delete(Self::KIND, &found.id)
            .await
            .on(Self::KIND, name)?;
        lb.add(format!("deleted security group {} ({})", name, found.id));
        Ok(())
    }
}
