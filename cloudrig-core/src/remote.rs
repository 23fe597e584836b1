//! Remote execution interface.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// Environment passed to remote commands and scripts.
pub type Env = BTreeMap<String, String>;

/// Remote execution failure. Keeps whatever output was captured, so callers
/// can still look at it.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("cannot start remote session: {0}")]
    Spawn(String),

    #[error("exit status {status}")]
    Failed { status: i32, output: String },

    #[error("cannot read script {path}: {reason}")]
    Script { path: String, reason: String },
}

impl ExecError {
    pub fn output(&self) -> &str {
        match self {
            ExecError::Failed { output, .. } => output,
            _ => "",
        }
    }
}

/// Runs a command or a script body on a named host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, host: &str, body: &str, env: &Env, verbose: bool) -> Result<String, ExecError>;

    /// Run script files in order, stopping at the first failure.
    ///
    /// Output of all scripts that ran is concatenated.
    async fn run_scripts(
        &self,
        host: &str,
        scripts: &[String],
        env: &Env,
        verbose: bool,
    ) -> Result<String, ExecError> {
        let mut combined = String::new();
        for path in scripts {
            let body = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ExecError::Script {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            match self.run(host, &body, env, verbose).await {
                Ok(out) => combined.push_str(&out),
                Err(ExecError::Failed { status, output }) => {
                    combined.push_str(&output);
                    return Err(ExecError::Failed {
                        status,
                        output: combined,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(combined)
    }
}
