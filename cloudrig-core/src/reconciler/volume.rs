//! Block volume reconciler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{lookup, require, wait_for_state, Reconciler};
use crate::error::{DeployError, ProviderContext, Result};
use crate::log::LogBuilder;
use crate::provider::{Association, CloudProvider, CreateSpec, LifecycleState, ResourceKind, Tags};

pub struct VolumeDesired {
    pub name: String,
    pub availability_zone: String,
    pub size_gb: u32,
    pub volume_type: String,
}

pub struct VolumeReconciler {
    provider: Arc<dyn CloudProvider>,
    tags: Tags,
    create_timeout: Duration,
    attach_timeout: Duration,
}

fn is_in_use(s: &LifecycleState) -> bool {
    matches!(s, LifecycleState::InUse | LifecycleState::Attached)
}

impl VolumeReconciler {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        tags: Tags,
        create_timeout: Duration,
        attach_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            tags,
            create_timeout,
            attach_timeout,
        }
    }

    /// Attach a volume to an instance, both looked up by name.
    ///
    /// No-op when already attached to that instance; a volume attached
    /// elsewhere is a conflict.
    pub async fn attach(
        &self,
        volume_name: &str,
        instance_name: &str,
        device_name: &str,
        lb: &mut LogBuilder,
    ) -> Result<String> {
        let volume = require(&self.provider, ResourceKind::Volume, volume_name, lb).await?;
        let instance = require(&self.provider, ResourceKind::Instance, instance_name, lb).await?;

        match volume.attached_to.as_deref() {
            Some(attached) if attached == instance.id => {
                lb.add(format!(
                    "volume {} ({}) already attached to instance {} ({})",
                    volume_name, volume.id, instance_name, instance.id
                ));
                return Ok(volume.id);
            }
            Some(attached) => {
                return Err(DeployError::conflict(
                    ResourceKind::Volume,
                    volume_name,
                    format!("attached to instance {}", instance.id),
                    format!("attached to instance {}", attached),
                ));
            }
            None => {}
        }

        let assoc = Association::VolumeToInstance {
            volume_id: volume.id.clone(),
            instance_id: instance.id.clone(),
            device_name: device_name.to_string(),
        };
        self.provider
            .associate(&assoc)
            .await
            .on(ResourceKind::Volume, volume_name)?;
        lb.add(format!(
            "attaching volume {} ({}) to instance {} as {}",
            volume_name, volume.id, instance.id, device_name
        ));
        wait_for_state(
            &self.provider,
            ResourceKind::Volume,
            &volume.id,
            volume_name,
            is_in_use,
            self.attach_timeout,
            lb,
        )
        .await?;
        Ok(volume.id)
    }
}

#[async_trait]
impl Reconciler for VolumeReconciler {
    type Desired = VolumeDesired;
    const KIND: ResourceKind = ResourceKind::Volume;

    async fn ensure(&self, desired: &VolumeDesired, lb: &mut LogBuilder) -> Result<String> {
        let name = &desired.name;
        if let Some(found) = lookup(&self.provider, Self::KIND, name, lb).await? {
            lb.add(format!("volume {} already exists: {} ({})", name, found.id, found.state));
            return Ok(found.id);
        }

        let spec = CreateSpec::Volume {
            name: name.clone(),
            availability_zone: desired.availability_zone.clone(),
            size_gb: desired.size_gb,
            volume_type: desired.volume_type.clone(),
        };
        let id = self
            .provider
            .create(&spec, &self.tags)
            .await
            .on(Self::KIND, name)?;
        lb.add(format!(
            "created volume {} ({}GB {} in {}): {}",
            name, desired.size_gb, desired.volume_type, desired.availability_zone, id
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

    async fn delete(&self, name: &str, lb: &mut LogBuilder) -> Result<()> {
        let Some(found) = lookup(&self.provider, Self::KIND, name, lb).await? else {
            lb.add(format!("will not delete volume {}, nothing to delete", name));
            return Ok(());
        };
        if let Some(instance) = found.attached_to.as_deref() {
            return Err(DeployError::conflict(
                Self::KIND,
                name,
                "detached",
                format!("attached to instance {}", instance),
            ));
        }
        self.provider
            .delete(Self::KIND, &found.id)
            .await
            .on(Self::KIND, name)?;
        lb.add(format!("deleted volume {} ({})", name, found.id));
        Ok(())
    }
}
