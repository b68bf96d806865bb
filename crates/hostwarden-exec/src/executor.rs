//! Remote execution entry points.

use std::time::Instant;

use async_trait::async_trait;

use hostwarden_core::types::{CommandResult, Device, DeviceAction};

use crate::backend::{Backend, SshTarget};
use crate::command::{sudo_wrap, sudo_wrap_redacted};
use crate::config::ExecConfig;
use crate::error::Result;

/// Runs privileged actions on a device.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `action` under sudo, answering sudo with `sudo_password` when
    /// one is given.
    async fn run_action(
        &self,
        device: &Device,
        action: DeviceAction,
        sudo_password: Option<&str>,
    ) -> Result<CommandResult>;
}

/// Executes commands over ssh, choosing the backend per credential.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    config: ExecConfig,
}

impl SshExecutor {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub async fn execute(&self, target: &SshTarget, command: &str) -> Result<CommandResult> {
        let backend = Backend::select(&self.config, &target.credential);
        let start = Instant::now();
        let result = backend.execute(target, command).await;

        match &result {
            Ok(r) => tracing::debug!(
                host = %target.host,
                port = target.port,
                backend = ?backend.kind(),
                exit_code = r.exit_code,
                duration_ms = start.elapsed().as_millis() as u64,
                "Remote command succeeded"
            ),
            Err(e) => tracing::info!(
                host = %target.host,
                port = target.port,
                backend = ?backend.kind(),
                error = %e,
                duration_ms = start.elapsed().as_millis() as u64,
                "Remote command failed"
            ),
        }
        result
    }

    pub async fn execute_device(&self, device: &Device, command: &str) -> Result<CommandResult> {
        self.execute(&SshTarget::from_device(device), command).await
    }

    pub async fn shutdown(&self, device: &Device, sudo_password: Option<&str>) -> Result<CommandResult> {
        self.run_action(device, DeviceAction::Shutdown, sudo_password)
            .await
    }

    pub async fn restart(&self, device: &Device, sudo_password: Option<&str>) -> Result<CommandResult> {
        self.run_action(device, DeviceAction::Restart, sudo_password)
            .await
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run_action(
        &self,
        device: &Device,
        action: DeviceAction,
        sudo_password: Option<&str>,
    ) -> Result<CommandResult> {
        let base = action.base_command();
        tracing::info!(
            device = %device.name,
            host = %device.host,
            action = %action,
            command = %sudo_wrap_redacted(base, sudo_password),
            "Running privileged action"
        );
        self.execute_device(device, &sudo_wrap(base, sudo_password))
            .await
    }
}
