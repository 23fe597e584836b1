//! Compute instance reconciler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{lookup, require, wait_for_state, wait_until_deleted, Reconciler};
use crate::error::{DeployError, ProviderContext, Result};
use crate::log::LogBuilder;
use crate::provider::{CloudProvider, CreateSpec, LifecycleState, ResourceKind, Tags};

pub struct InstanceDesired {
    pub name: String,
    pub instance_type: String,
    pub image_id: String,
    pub key_name: String,
    pub subnet_name: String,
    pub security_group_name: String,
    pub private_ip: String,
}

pub struct InstanceReconciler {
    provider: Arc<dyn CloudProvider>,
    tags: Tags,
    create_timeout: Duration,
    delete_timeout: Duration,
}

impl InstanceReconciler {
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
impl Reconciler for InstanceReconciler {
    type Desired = InstanceDesired;
    const KIND: ResourceKind = ResourceKind::Instance;

    async fn ensure(&self, desired: &InstanceDesired, lb: &mut LogBuilder) -> Result<String> {
        let name = &desired.name;
        let subnet = require(&self.provider, ResourceKind::Subnet, &desired.subnet_name, lb).await?;

        let existing = lookup(&self.provider, Self::KIND, name, lb).await?;
        if let Some(found) = existing.filter(|f| !f.state.is_terminal()) {
            if let Some(actual) = found.subnet_id.as_deref() {
                if actual != subnet.id {
                    return Err(DeployError::conflict(
                        Self::KIND,
                        name,
                        format!("subnet {}", subnet.id),
                        format!("subnet {}", actual),
                    ));
                }
            }
            lb.add(format!("instance {} already exists: {} ({})", name, found.id, found.state));
            return Ok(found.id);
        }

        let sg = require(
            &self.provider,
            ResourceKind::SecurityGroup,
            &desired.security_group_name,
            lb,
        )
        .await?;

        let spec = CreateSpec::Instance {
            name: name.clone(),
            instance_type: desired.instance_type.clone(),
            image_id: desired.image_id.clone(),
            key_name: desired.key_name.clone(),
            subnet_id: subnet.id.clone(),
            security_group_id: sg.id.clone(),
            private_ip: desired.private_ip.clone(),
        };
        let id = self
            .provider
            .create(&spec, &self.tags)
            .await
            .on(Self::KIND, name)?;
        lb.add(format!(
            "created instance {} ({} from {}) at {}: {}",
            name, desired.instance_type, desired.image_id, desired.private_ip, id
        ));
        wait_for_state(
            &self.provider,
            Self::KIND,
            &id,
            name,
            |s| *s == LifecycleState::Running,
            self.create_timeout,
            lb,
        )
        .await?;
        Ok(id)
    }

    async fn delete(&self, name: &str, lb: &mut LogBuilder) -> Result<()> {
        let found = lookup(&self.provider, Self::KIND, name, lb).await?;
        let Some(found) = found.filter(|f| f.state != LifecycleState::Deleted) else {
            lb.add(format!("will not delete instance {}, nothing to delete", name));
            return Ok(());
        };
        if found.state != LifecycleState::Deleting {
            self.provider
                .delete(Self::KIND, &found.id)
                .await
                .on(Self::KIND, name)?;
            lb.add(format!("terminating instance {} ({})", name, found.id));
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
