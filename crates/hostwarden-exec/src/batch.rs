//! Non-interactive ssh backend for key and agent authentication.

use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;

use hostwarden_core::types::CommandResult;

use crate::backend::{finish, SshTarget};
use crate::config::ExecConfig;
use crate::error::{ExecError, Result};

/// Runs `ssh -o BatchMode=yes`, so a credential prompt fails the command
/// instead of hanging it.
#[derive(Debug, Clone)]
pub struct BatchBackend {
    ssh_path: String,
    connect_timeout_secs: Option<u64>,
}

impl BatchBackend {
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            ssh_path: config.ssh_path.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }

    /// Arguments passed to ssh for `command` on `target`.
    pub fn args(&self, target: &SshTarget, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            target.port.to_string(),
        ];
        if target.accept_new_host_key {
            args.push("-o".to_string());
            args.push("StrictHostKeyChecking=accept-new".to_string());
        }
        if let Some(secs) = self.connect_timeout_secs {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={secs}"));
        }
        if let Some(key) = target.credential.key_path() {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(target.destination());
        args.push(command.to_string());
        args
    }

    pub async fn execute(&self, target: &SshTarget, command: &str) -> Result<CommandResult> {
        let start = Instant::now();
        let output = Command::new(&self.ssh_path)
            .args(self.args(target, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecError::Launch {
                program: self.ssh_path.clone(),
                source,
            })?;

        tracing::debug!(
            host = %target.host,
            port = target.port,
            status = ?output.status.code(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch ssh finished"
        );

        finish(output)
    }
}
