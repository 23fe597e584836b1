//! cloudrig orchestration engine.
//!
//! Brings a cluster's cloud resources to a desired state through idempotent
//! reconcilers, fans per-target work out through a bounded and throttled
//! dispatcher, and waits for eventually consistent state with a poller.

pub mod converge;
pub mod dispatch;
pub mod error;
pub mod log;
pub mod project;
pub mod provider;
pub mod reconciler;
pub mod remote;
pub mod select;
pub mod workflow;

pub use dispatch::{ConsoleSink, Dispatcher, DispatcherConfig, OutputSink, Report};
pub use error::{DeployError, Result};
pub use project::Project;
pub use provider::CloudProvider;
pub use remote::RemoteExecutor;
pub use workflow::{DeployContext, Workflow};
