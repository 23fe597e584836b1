//! Convergence polling.
//!
//! [`Poller::wait`] keeps calling a status check until it reports success or
//! a hard failure, sleeping a fixed interval between indeterminate results
//! and giving up once the elapsed time exceeds the budget.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::remote::ExecError;

/// Outcome of one status check.
#[derive(Debug)]
pub enum Check<T> {
    Ready(T),
    /// Not there yet; keep polling.
    Pending(String),
    Failed(DeployError),
}

/// Retry-until-condition-or-timeout loop.
#[derive(Debug, Clone)]
pub struct Poller {
    what: String,
    interval: Duration,
    timeout: Duration,
}

impl Poller {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            interval: Self::DEFAULT_INTERVAL,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn wait<T, F, Fut>(&self, mut check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Check<T>>,
    {
        let started = Instant::now();
        loop {
            match check().await {
                Check::Ready(value) => return Ok(value),
                Check::Failed(err) => return Err(err),
                Check::Pending(observed) => {
                    debug!(what = %self.what, observed = %observed, "Not converged yet");
                }
            }

            let elapsed = started.elapsed();
            if elapsed > self.timeout {
                return Err(DeployError::Timeout {
                    what: self.what.clone(),
                    elapsed,
                });
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Command run on one ring member to observe the ring.
pub const RING_STATUS_COMMAND: &str = "nodetool describecluster;nodetool status";

const RING_SECTION_MARKER: &str = "Normal/Leaving/Joining/Moving";

/// Output fragments seen while a member is still starting.
const RING_TRANSIENT_MARKERS: [&str; 3] = [
    "nodetool: Failed to connect",
    "InstanceNotFoundException",
    "Has this node finished starting up",
];

/// `UN  <ip>` followed by whitespace or the end of the output, so that
/// `10.5.0.1` is not satisfied by `10.5.0.11`.
fn member_up(output: &str, ip: &str) -> bool {
    let marker = format!("UN  {}", ip);
    output.match_indices(&marker).any(|(at, _)| {
        output[at + marker.len()..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace)
    })
}

/// Classify ring status output against the expected member addresses.
///
/// Every member must show up as `UN` (up/normal). Substring matching over
/// tool output; brittle across tool versions.
pub fn classify_ring_status(
    host: &str,
    status: std::result::Result<String, ExecError>,
    members: &[String],
) -> Check<String> {
    let (output, exec_err) = match status {
        Ok(out) => (out, None),
        Err(e) => (e.output().to_string(), Some(e)),
    };

    if exec_err.is_none() && output.contains(RING_SECTION_MARKER) {
        let up = members
            .iter()
            .filter(|ip| member_up(&output, ip))
            .count();
        if up == members.len() {
            return Check::Ready(output);
        }
        return Check::Pending(format!("{} of {} members up/normal", up, members.len()));
    }

    if RING_TRANSIENT_MARKERS.iter().any(|m| output.contains(m)) {
        return Check::Pending("ring member still starting".to_string());
    }

    match exec_err {
        Some(source) => Check::Failed(DeployError::Remote {
            host: host.to_string(),
            source,
        }),
        None => Check::Failed(DeployError::UnknownOutput {
            what: "cluster ring".to_string(),
            output,
        }),
    }
}
