//! Sudo password escalation.
//!
//! A privileged action that fails because sudo wanted a password parks an
//! `EscalationRequest` until the operator supplies one. The action is then
//! retried exactly once with that password; a failed retry is reported and
//! the flow returns to idle instead of asking again.

use std::sync::Arc;

use hostwarden_core::types::{CommandResult, Device, DeviceAction, EscalationRequest};
use hostwarden_registry::{DeviceRegistry, RegistryError};

use crate::error::{EscalationError, ExecError};
use crate::executor::RemoteExecutor;

/// Whether failed command output means sudo asked for a password.
///
/// Matches "sudo: a password is required" and "[sudo] password for ...".
/// Localized or customized sudo prompts are not recognized.
pub fn needs_sudo_password(output: &str) -> bool {
    let text = output.to_lowercase();
    text.contains("sudo") && text.contains("password")
}

/// Where the flow is.
#[derive(Debug, Clone, Default)]
pub enum EscalationState {
    #[default]
    Idle,
    AwaitingCredential(EscalationRequest),
    Retrying(EscalationRequest),
}

/// Result of running an action through the flow.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Completed(CommandResult),
    /// Sudo needs a password; submit one with `submit_credential`.
    NeedsCredential(EscalationRequest),
}

pub struct EscalationFlow {
    executor: Arc<dyn RemoteExecutor>,
    registry: Arc<dyn DeviceRegistry>,
    state: EscalationState,
}

impl EscalationFlow {
    pub fn new(executor: Arc<dyn RemoteExecutor>, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self {
            executor,
            registry,
            state: EscalationState::Idle,
        }
    }

    pub fn state(&self) -> &EscalationState {
        &self.state
    }

    /// The request waiting for a credential, if any.
    pub fn pending(&self) -> Option<&EscalationRequest> {
        match &self.state {
            EscalationState::AwaitingCredential(request) => Some(request),
            _ => None,
        }
    }

    /// Run `action`, answering sudo with the device's stored password.
    ///
    /// A sudo password failure replaces any request already pending.
    pub async fn run_action(
        &mut self,
        device: &Device,
        action: DeviceAction,
    ) -> Result<ActionOutcome, ExecError> {
        let result = self
            .executor
            .run_action(device, action, device.sudo_password())
            .await;

        match result {
            Ok(result) => Ok(ActionOutcome::Completed(result)),
            Err(e) if needs_sudo_password(&e.output()) => {
                if let Some(previous) = self.pending() {
                    tracing::info!(
                        replaced = %previous.id,
                        device = %previous.device.name,
                        "Pending sudo request superseded"
                    );
                }
                let request = EscalationRequest::new(device.clone(), action);
                tracing::info!(
                    request_id = %request.id,
                    device = %device.name,
                    action = %action,
                    "Sudo password required"
                );
                self.state = EscalationState::AwaitingCredential(request.clone());
                Ok(ActionOutcome::NeedsCredential(request))
            }
            Err(e) => Err(e),
        }
    }

    /// Retry the pending action with `password`.
    ///
    /// With `persist`, the password is saved on the device first. The
    /// device's auth mode is left as it was.
    pub async fn submit_credential(
        &mut self,
        password: &str,
        persist: bool,
    ) -> Result<CommandResult, EscalationError> {
        let request = match std::mem::take(&mut self.state) {
            EscalationState::AwaitingCredential(request) => request,
            other => {
                self.state = other;
                return Err(EscalationError::NoPendingRequest);
            }
        };
        self.state = EscalationState::Retrying(request.clone());

        let device = if persist {
            match self.persist_password(&request, password) {
                Ok(device) => device,
                Err(e) => {
                    self.state = EscalationState::Idle;
                    return Err(e.into());
                }
            }
        } else {
            request.device.clone()
        };

        let result = self
            .executor
            .run_action(&device, request.action, Some(password))
            .await;
        self.state = EscalationState::Idle;

        match result {
            Ok(result) => {
                tracing::info!(
                    request_id = %request.id,
                    device = %device.name,
                    action = %request.action,
                    "Escalated action succeeded"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request.id,
                    device = %device.name,
                    action = %request.action,
                    error = %e,
                    "Escalated action failed"
                );
                Err(EscalationError::Retry(e))
            }
        }
    }

    /// Save `password` on the stored copy of the device, which may have
    /// changed since the request was parked.
    fn persist_password(
        &self,
        request: &EscalationRequest,
        password: &str,
    ) -> Result<Device, RegistryError> {
        let mut device = self.registry.get(request.device.id)?;
        device.password = Some(password.to_string());
        self.registry.upsert(&device)?;
        tracing::info!(device = %device.name, "Sudo password saved");
        Ok(device)
    }

    /// Drop the pending request without retrying.
    pub fn cancel(&mut self) -> Option<EscalationRequest> {
        match std::mem::take(&mut self.state) {
            EscalationState::AwaitingCredential(request) => Some(request),
            other => {
                self.state = other;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sudo_password_signatures() {
        assert!(needs_sudo_password("sudo: a password is required\n"));
        assert!(needs_sudo_password("[sudo] password for admin: "));
        assert!(needs_sudo_password("SUDO: A PASSWORD IS REQUIRED"));
    }

    #[test]
    fn other_failures_do_not_escalate() {
        assert!(!needs_sudo_password("admin@nas: Permission denied (publickey)."));
        assert!(!needs_sudo_password("sudo: shutdown: command not found"));
        assert!(!needs_sudo_password("Password change required"));
        assert!(!needs_sudo_password(""));
    }
}
