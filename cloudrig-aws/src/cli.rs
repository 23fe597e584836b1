//! Thin wrapper around the `aws` command-line tool.

use cloudrig_core::provider::{ProviderError, ProviderResult, Tags};
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::debug;

/// Invokes `aws ec2 <op> ...` and decodes its JSON output.
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    region: Option<String>,
    profile: Option<String>,
}

impl Default for AwsCli {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl AwsCli {
    pub fn new(region: Option<String>, profile: Option<String>) -> Self {
        Self {
            program: "aws".to_string(),
            region,
            profile,
        }
    }

    /// Use another executable in place of `aws`.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, op: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("ec2").arg(op).args(args).args(["--output", "json"]);
        if let Some(region) = &self.region {
            cmd.args(["--region", region.as_str()]);
        }
        if let Some(profile) = &self.profile {
            cmd.args(["--profile", profile.as_str()]);
        }
        cmd
    }

    /// Run an operation and return its raw stdout.
    pub async fn run(&self, op: &str, args: &[String]) -> ProviderResult<String> {
        debug!(op, ?args, "aws ec2");
        let output = self
            .command(op, args)
            .output()
            .await
            .map_err(|e| ProviderError::new(format!("failed to run aws ec2 {}: {}", op, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::new(format!(
                "aws ec2 {} failed: {}",
                op,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run an operation and decode its JSON response.
    pub async fn json<T: DeserializeOwned>(&self, op: &str, args: &[String]) -> ProviderResult<T> {
        let stdout = self.run(op, args).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| ProviderError::new(format!("cannot parse aws ec2 {} output: {}", op, e)))
    }
}

/// `aws` reports a missing id as an `*.NotFound` error code.
pub fn is_not_found(err: &ProviderError) -> bool {
    err.message().contains(".NotFound") || err.message().contains("NotFoundException")
}

/// Build argument vectors without repeating `.to_string()` everywhere.
pub fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn name_filter(name: &str) -> Vec<String> {
    args(["--filters", &format!("Name=tag:Name,Values={}", name)])
}

/// `--tag-specifications` value carrying `Name` plus the deployment tags.
pub fn tag_specification(resource_type: &str, name: &str, tags: &Tags) -> String {
    let mut pairs = vec![format!("{{Key=Name,Value={}}}", name)];
    pairs.extend(
        tags.iter()
            .filter(|(k, _)| k.as_str() != "Name")
            .map(|(k, v)| format!("{{Key={},Value={}}}", k, v)),
    );
    format!("ResourceType={},Tags=[{}]", resource_type, pairs.join(","))
}
