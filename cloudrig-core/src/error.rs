//! Error taxonomy shared by reconcilers, the dispatcher and the poller.
//!
//! "Not found" is not an error here: lookups return `Option` and absence
//! either triggers a create or makes a delete a no-op.

use std::time::Duration;

use thiserror::Error;

use crate::project::ProjectError;
use crate::provider::{ProviderError, ResourceKind};
use crate::remote::ExecError;
use crate::select::SelectionError;

/// Errors surfaced by cloudrig workflows.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The resource exists but is associated with something other than
    /// what the desired state implies. Nothing was mutated.
    #[error("conflict on {kind} {name}: expected {expected}, found {actual}")]
    Conflict {
        kind: ResourceKind,
        name: String,
        expected: String,
        actual: String,
    },

    /// A resource that another step depends on does not exist.
    #[error("{kind} {name} not found")]
    Missing { kind: ResourceKind, name: String },

    #[error("{kind} {name}: {source}")]
    Provider {
        kind: ResourceKind,
        name: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("giving up waiting for {what} after {:.1}s", elapsed.as_secs_f64())]
    Timeout { what: String, elapsed: Duration },

    #[error("unknown status output while waiting for {what}")]
    UnknownOutput { what: String, output: String },

    #[error("remote execution on {host} failed: {source}")]
    Remote {
        host: String,
        #[source]
        source: ExecError,
    },

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error("{0}")]
    Invalid(String),
}

impl DeployError {
    pub fn conflict(
        kind: ResourceKind,
        name: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        DeployError::Conflict {
            kind,
            name: name.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn missing(kind: ResourceKind, name: impl Into<String>) -> Self {
        DeployError::Missing {
            kind,
            name: name.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DeployError::Conflict { .. })
    }
}

/// Attaches resource context to a raw provider failure.
pub trait ProviderContext<T> {
    fn on(self, kind: ResourceKind, name: &str) -> Result<T>;
}

impl<T> ProviderContext<T> for std::result::Result<T, ProviderError> {
    fn on(self, kind: ResourceKind, name: &str) -> Result<T> {
        self.map_err(|source| DeployError::Provider {
            kind,
            name: name.to_string(),
            source,
        })
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
