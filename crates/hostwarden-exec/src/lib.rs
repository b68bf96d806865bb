//! hostwarden-exec: Remote command execution over SSH.
//!
//! - Backend selection between batch ssh (keys/agent), an `expect`-driven
//!   password dialogue, and an optional in-process libssh2 session
//! - Sudo wrapping for the shutdown and restart actions
//! - Trust-on-first-use host key scanning and fingerprints
//! - The sudo password escalation and retry flow

pub mod backend;
pub mod batch;
pub mod command;
pub mod config;
pub mod error;
pub mod escalation;
pub mod executor;
pub mod hostkey;
#[cfg(feature = "native-ssh")]
pub mod native;
pub mod scripted;

pub use backend::{Backend, BackendKind, SshTarget};
pub use config::ExecConfig;
pub use error::{EscalationError, ExecError, HostKeyError, Result};
pub use escalation::{needs_sudo_password, ActionOutcome, EscalationFlow, EscalationState};
pub use executor::{RemoteExecutor, SshExecutor};
pub use hostkey::{fingerprint_sha256, HostKeyScanner};
