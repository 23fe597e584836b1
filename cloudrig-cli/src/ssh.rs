//! Remote execution over `ssh`.
//!
//! Hosts without a public address are reached through the bastion with a
//! jump (`-J`). Script bodies are piped to `bash -s` on the target, after a
//! block of `export` lines carrying the environment.

use std::process::Stdio;

use async_trait::async_trait;
use cloudrig_core::project::SshConfigDef;
use cloudrig_core::remote::{Env, ExecError, RemoteExecutor};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

pub struct SshExecutor {
    user: String,
    port: u16,
    private_key_path: String,
    bastion: Option<String>,
}

impl SshExecutor {
    pub fn new(config: &SshConfigDef) -> Self {
        let bastion = Some(config.external_ip_address.clone()).filter(|ip| !ip.is_empty());
        Self {
            user: config.user.clone(),
            port: config.port,
            private_key_path: config.private_key_path.clone(),
            bastion,
        }
    }

    fn ssh_args(&self, host: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-i".to_string(),
            self.private_key_path.clone(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(bastion) = self.bastion.as_deref().filter(|b| *b != host) {
            args.push("-J".to_string());
            args.push(format!("{}@{}:{}", self.user, bastion, self.port));
        }
        args.push(format!("{}@{}", self.user, host));
        args.push("bash".to_string());
        args.push("-s".to_string());
        args
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Text written to the remote shell's stdin.
fn script_input(body: &str, env: &Env) -> Result<String, ExecError> {
    let mut input = String::new();
    for (key, value) in env {
        if !is_env_name(key) {
            return Err(ExecError::Spawn(format!(
                "invalid environment variable name {:?}",
                key
            )));
        }
        input.push_str(&format!("export {}={}\n", key, shell_quote(value)));
    }
    input.push_str(body);
    if !body.ends_with('\n') {
        input.push('\n');
    }
    Ok(input)
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, body: &str, env: &Env, verbose: bool) -> Result<String, ExecError> {
        let input = script_input(body, env)?;
        let args = self.ssh_args(host);
        debug!(host, ?args, "ssh");

        let mut child = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("ssh {}: {}", host, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| ExecError::Spawn(format!("ssh {}: {}", host, e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::Spawn(format!("ssh {}: {}", host, e)))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if verbose {
            for line in combined.lines() {
                debug!(host, "{}", line);
            }
        }

        if !output.status.success() {
            return Err(ExecError::Failed {
                status: output.status.code().unwrap_or(-1),
                output: combined,
            });
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(bastion: &str) -> SshConfigDef {
        SshConfigDef {
            external_ip_address: bastion.to_string(),
            bastion_external_ip_address_name: "bastion_ip".to_string(),
            port: 22,
            user: "ubuntu".to_string(),
            private_key_path: "/keys/root.pem".to_string(),
        }
    }

    #[test]
    fn test_private_host_jumps_through_bastion() {
        let ssh = SshExecutor::new(&config("54.1.2.3"));
        let args = ssh.ssh_args("10.5.0.11");
        let jump = args.iter().position(|a| a == "-J").unwrap();
        assert_eq!(args[jump + 1], "ubuntu@54.1.2.3:22");
        assert_eq!(&args[args.len() - 3..], ["ubuntu@10.5.0.11", "bash", "-s"]);
    }

    #[test]
    fn test_bastion_itself_is_reached_directly() {
        let ssh = SshExecutor::new(&config("54.1.2.3"));
        assert!(!ssh.ssh_args("54.1.2.3").contains(&"-J".to_string()));

        let no_bastion = SshExecutor::new(&config(""));
        assert!(!no_bastion.ssh_args("10.5.0.11").contains(&"-J".to_string()));
    }

    #[test]
    fn test_script_input_exports_env() {
        let mut env = Env::new();
        env.insert("CLUSTER".into(), "ring one".into());
        env.insert("SEEDS".into(), "it's".into());
        let input = script_input("nodetool status", &env).unwrap();
        assert_eq!(
            input,
            "export CLUSTER='ring one'\nexport SEEDS='it'\\''s'\nnodetool status\n"
        );
    }

    #[test]
    fn test_script_input_rejects_bad_env_names() {
        for bad in ["", "1ST", "A-B", "X;rm -rf /", "A B"] {
            let mut env = Env::new();
            env.insert(bad.to_string(), "v".into());
            assert!(
                matches!(script_input("true", &env), Err(ExecError::Spawn(_))),
                "{bad:?} accepted"
            );
        }
        let mut env = Env::new();
        env.insert("_CASSANDRA_SEEDS2".into(), "v".into());
        assert!(script_input("true", &env).is_ok());
    }
}
