//! Execution backends and their selection.
//!
//! Each backend turns (target, command) into a `CommandResult` or an
//! `ExecError`. The variant is picked from the credential: a non-empty
//! password selects a password-capable backend, anything else runs ssh in
//! batch mode with keys or the agent.

use std::process::Output;

use hostwarden_core::types::{CommandResult, Credential, Device};

use crate::batch::BatchBackend;
use crate::config::ExecConfig;
use crate::error::{ExecError, Result};
use crate::scripted::ScriptedBackend;

#[cfg(feature = "native-ssh")]
use crate::native::NativeBackend;

/// Connection parameters for one remote host.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub accept_new_host_key: bool,
}

impl SshTarget {
    pub fn from_device(device: &Device) -> Self {
        Self {
            host: device.host.clone(),
            port: device.port,
            username: device.username.clone(),
            credential: device.credential(),
            accept_new_host_key: device.accept_new_host_key,
        }
    }

    /// `user@host` destination argument.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

/// Which backend variant handled a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Batch,
    Scripted,
    Native,
}

/// A selected execution backend.
#[derive(Debug, Clone)]
pub enum Backend {
    Batch(BatchBackend),
    Scripted(ScriptedBackend),
    #[cfg(feature = "native-ssh")]
    Native(NativeBackend),
}

impl Backend {
    /// Pick the backend for `credential`.
    pub fn select(config: &ExecConfig, credential: &Credential) -> Self {
        if credential.password().is_none() {
            return Self::Batch(BatchBackend::new(config));
        }

        Self::native(config).unwrap_or_else(|| Self::Scripted(ScriptedBackend::new(config)))
    }

    #[cfg(feature = "native-ssh")]
    fn native(config: &ExecConfig) -> Option<Self> {
        config
            .prefer_native
            .then(|| Self::Native(NativeBackend::new(config)))
    }

    #[cfg(not(feature = "native-ssh"))]
    fn native(_config: &ExecConfig) -> Option<Self> {
        None
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Batch(_) => BackendKind::Batch,
            Self::Scripted(_) => BackendKind::Scripted,
            #[cfg(feature = "native-ssh")]
            Self::Native(_) => BackendKind::Native,
        }
    }

    pub async fn execute(&self, target: &SshTarget, command: &str) -> Result<CommandResult> {
        match self {
            Self::Batch(b) => b.execute(target, command).await,
            Self::Scripted(b) => b.execute(target, command).await,
            #[cfg(feature = "native-ssh")]
            Self::Native(b) => b.execute(target, command).await,
        }
    }
}

/// Standard output followed by standard error.
pub(crate) fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/// Map a finished ssh process to the execute contract.
pub(crate) fn finish(output: Output) -> Result<CommandResult> {
    let text = combined_output(&output);
    // No exit code means the process was killed by a signal.
    let code = output.status.code().unwrap_or(-1);
    if output.status.success() {
        Ok(CommandResult {
            output: text,
            exit_code: code,
        })
    } else {
        Err(ExecError::CommandFailed { code, output: text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn key_credential_selects_batch() {
        let config = ExecConfig::default();
        let backend = Backend::select(&config, &Credential::Key { path: None });
        assert_eq!(backend.kind(), BackendKind::Batch);

        let backend = Backend::select(
            &config,
            &Credential::Key {
                path: Some(PathBuf::from("/home/me/.ssh/id_ed25519")),
            },
        );
        assert_eq!(backend.kind(), BackendKind::Batch);
    }

    #[test]
    fn empty_password_falls_back_to_batch() {
        let backend = Backend::select(&ExecConfig::default(), &Credential::Password(String::new()));
        assert_eq!(backend.kind(), BackendKind::Batch);
    }

    #[test]
    fn password_selects_scripted() {
        let backend = Backend::select(
            &ExecConfig::default(),
            &Credential::Password("hunter2".to_string()),
        );
        assert_eq!(backend.kind(), BackendKind::Scripted);
    }

    #[cfg(feature = "native-ssh")]
    #[test]
    fn prefer_native_selects_native_for_passwords() {
        let config = ExecConfig {
            prefer_native: true,
            ..Default::default()
        };
        let backend = Backend::select(&config, &Credential::Password("hunter2".to_string()));
        assert_eq!(backend.kind(), BackendKind::Native);
    }

    #[test]
    fn target_from_device() {
        let mut device = hostwarden_core::types::Device::new("nas", "10.0.0.5", "admin");
        device.port = 2222;
        device.accept_new_host_key = true;
        let target = SshTarget::from_device(&device);
        assert_eq!(target.destination(), "admin@10.0.0.5");
        assert_eq!(target.port, 2222);
        assert!(target.accept_new_host_key);
        assert_eq!(target.credential, Credential::Key { path: None });
    }
}
