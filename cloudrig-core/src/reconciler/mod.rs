//! Reconcilers for cloud resource kinds.
//!
//! Each reconciler looks a resource up by name and either creates it, checks
//! that the existing one is associated the way the desired state implies, or
//! leaves it alone. Dependency order between kinds is hand-coded by the
//! workflows, not derived here.

pub mod floating_ip;
pub mod gateway;
pub mod instance;
pub mod network;
pub mod route_table;
pub mod security_group;
pub mod volume;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::converge::{Check, Poller};
use crate::error::{DeployError, ProviderContext, Result};
use crate::log::LogBuilder;
use crate::provider::{CloudProvider, LifecycleState, ResourceIdentity, ResourceKind};

/// Trait for resource reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Desired state of one resource.
    type Desired: Send + Sync;

    const KIND: ResourceKind;

    /// Bring the resource to the desired state and return its provider id.
    ///
    /// An existing, correctly associated resource is returned untouched.
    async fn ensure(&self, desired: &Self::Desired, lb: &mut LogBuilder) -> Result<String>;

    /// Delete by name. Absence is logged, not an error.
    async fn delete(&self, name: &str, lb: &mut LogBuilder) -> Result<()>;
}

/// Look a resource up by name, logging what was found.
pub(crate) async fn lookup(
    provider: &Arc<dyn CloudProvider>,
    kind: ResourceKind,
    name: &str,
    lb: &mut LogBuilder,
) -> Result<Option<ResourceIdentity>> {
    let found = provider.find_by_name(kind, name).await.on(kind, name)?;
    lb.add_object(&format!("find {} {}", kind, name), &found);
    Ok(found)
}

/// Look up a resource another step depends on; absence is an error.
pub(crate) async fn require(
    provider: &Arc<dyn CloudProvider>,
    kind: ResourceKind,
    name: &str,
    lb: &mut LogBuilder,
) -> Result<ResourceIdentity> {
    lookup(provider, kind, name, lb)
        .await?
        .ok_or_else(|| DeployError::missing(kind, name))
}

/// Poll a resource until its state satisfies `accept`.
///
/// A resource that disappears or ends up in a terminal state it was not
/// waiting for fails the wait.
pub(crate) async fn wait_for_state(
    provider: &Arc<dyn CloudProvider>,
    kind: ResourceKind,
    id: &str,
    name: &str,
    accept: fn(&LifecycleState) -> bool,
    timeout: Duration,
    lb: &mut LogBuilder,
) -> Result<ResourceIdentity> {
    let poller = Poller::new(format!("{} {} ({})", kind, name, id)).timeout(timeout);
    let identity = poller
        .wait(|| async move {
            match provider.describe(kind, id).await.on(kind, name) {
                Ok(Some(found)) if accept(&found.state) => Check::Ready(found),
                Ok(Some(found)) if found.state.is_terminal() => Check::Failed(DeployError::conflict(
                    kind,
                    name,
                    "a live resource",
                    format!("state {}", found.state),
                )),
                Ok(Some(found)) => Check::Pending(found.state.to_string()),
                Ok(None) => Check::Failed(DeployError::missing(kind, name)),
                Err(e) => Check::Failed(e),
            }
        })
        .await?;
    lb.add(format!("{} {} ({}) is {}", kind, name, id, identity.state));
    Ok(identity)
}

/// Poll until a deleted resource is gone or reported deleted.
pub(crate) async fn wait_until_deleted(
    provider: &Arc<dyn CloudProvider>,
    kind: ResourceKind,
    id: &str,
    name: &str,
    timeout: Duration,
    lb: &mut LogBuilder,
) -> Result<()> {
    Poller::new(format!("deletion of {} {} ({})", kind, name, id))
        .timeout(timeout)
        .wait(|| async move {
            match provider.describe(kind, id).await.on(kind, name) {
                Ok(None) => Check::Ready(()),
                Ok(Some(found)) if found.state == LifecycleState::Deleted => Check::Ready(()),
                Ok(Some(found)) => Check::Pending(found.state.to_string()),
                Err(e) => Check::Failed(e),
            }
        })
        .await?;
    lb.add(format!("{} {} ({}) deleted", kind, name, id));
    Ok(())
}
