//! Floating (public) address allocation.
//!
//! Addresses are found by their `Name` tag when allocating and by the
//! recorded address when releasing.

use std::sync::Arc;

use crate::error::{DeployError, ProviderContext, Result};
use crate::log::LogBuilder;
use crate::provider::{CloudProvider, ResourceKind};

pub struct FloatingIpReconciler {
    provider: Arc<dyn CloudProvider>,
}

impl FloatingIpReconciler {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self { provider }
    }

    /// Allocate an address tagged `name` unless one already exists.
    pub async fn ensure(&self, name: &str, lb: &mut LogBuilder) -> Result<String> {
        let found = self
            .provider
            .find_floating_ip_by_name(name)
            .await
            .on(ResourceKind::FloatingIp, name)?;
        lb.add_object(&format!("find floating ip {}", name), &found);
        if let Some(ip) = found {
            lb.add(format!("floating ip {} already allocated: {}", name, ip.public_ip));
            return Ok(ip.public_ip);
        }

        let public_ip = self
            .provider
            .allocate_floating_ip(name)
            .await
            .on(ResourceKind::FloatingIp, name)?;
        lb.add(format!("allocated floating ip {}: {}", name, public_ip));
        Ok(public_ip)
    }

    /// Allocation id of the address tagged `name`; required by NAT gateways.
    pub async fn allocation_id(&self, name: &str, lb: &mut LogBuilder) -> Result<String> {
        let found = self
            .provider
            .find_floating_ip_by_name(name)
            .await
            .on(ResourceKind::FloatingIp, name)?;
        lb.add_object(&format!("find floating ip {}", name), &found);
        found
            .map(|ip| ip.allocation_id)
            .ok_or_else(|| DeployError::missing(ResourceKind::FloatingIp, name))
    }

    /// Release a recorded address. An unknown allocation is a no-op.
    pub async fn release(&self, public_ip: &str, desc: &str, lb: &mut LogBuilder) -> Result<()> {
        if public_ip.is_empty() {
            return Err(DeployError::Invalid(format!(
                "no {} floating ip recorded, nothing to release",
                desc
            )));
        }
        let found = self
            .provider
            .find_floating_ip(public_ip)
            .await
            .on(ResourceKind::FloatingIp, desc)?;
        lb.add_object(&format!("find floating ip {}", public_ip), &found);
        let Some(ip) = found else {
            lb.add(format!(
                "will not release {} floating ip {}, nothing to release",
                desc, public_ip
            ));
            return Ok(());
        };
        self.provider
            .release_floating_ip(&ip.allocation_id)
            .await
            .on(ResourceKind::FloatingIp, desc)?;
        lb.add(format!("released {} floating ip {}", desc, public_ip));
        Ok(())
    }
}
