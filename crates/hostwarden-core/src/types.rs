//! Core domain types shared by discovery, polling and remote execution.
//!
//! `Device` is the only persisted entity (owned by the registry); every other
//! type here is ephemeral and owned by the operation that produced it.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WardenError;

/// Default SSH port for new devices and subnet scans.
pub const DEFAULT_SSH_PORT: u16 = 22;

// ── Device ────────────────────────────────────────────────────────

/// Unique identifier for a managed device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last known reachability of a device.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

impl DeviceStatus {
    /// Human-readable label shown to operators.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Reachable => "Online",
            Self::Unreachable => "Offline",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A remote machine managed over SSH.
///
/// `use_password_auth` selects which credential is active. A password may
/// still be stored while key auth is selected; it is then only used to
/// answer sudo prompts.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub use_password_auth: bool,
    #[serde(default)]
    pub ssh_key_path: Option<String>,
    #[serde(default)]
    pub accept_new_host_key: bool,
    #[serde(default)]
    pub status: DeviceStatus,
}

impl Device {
    /// Create a key-authenticated device on the default SSH port.
    pub fn new(name: &str, host: &str, username: &str) -> Self {
        Self {
            id: DeviceId::new(),
            name: name.to_string(),
            host: host.to_string(),
            port: DEFAULT_SSH_PORT,
            username: username.to_string(),
            password: None,
            use_password_auth: false,
            ssh_key_path: None,
            accept_new_host_key: false,
            status: DeviceStatus::Unknown,
        }
    }

    /// The credential selected by the auth-mode flag.
    pub fn credential(&self) -> Credential {
        if self.use_password_auth {
            Credential::Password(self.password.clone().unwrap_or_default())
        } else {
            Credential::Key {
                path: self
                    .ssh_key_path
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
            }
        }
    }

    /// Stored password, if one is set and non-empty.
    pub fn sudo_password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Check the fields a connection cannot be attempted without.
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.name.trim().is_empty() {
            return Err(WardenError::InvalidDevice("name is empty".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(WardenError::InvalidDevice("host is empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(WardenError::InvalidDevice("username is empty".to_string()));
        }
        if self.port == 0 {
            return Err(WardenError::InvalidDevice("port must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("use_password_auth", &self.use_password_auth)
            .field("ssh_key_path", &self.ssh_key_path)
            .field("accept_new_host_key", &self.accept_new_host_key)
            .field("status", &self.status)
            .finish()
    }
}

/// The active authentication credential for a connection.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    /// Key file, or the SSH agent / default identities when `path` is `None`.
    Key { path: Option<PathBuf> },
}

impl Credential {
    /// Non-empty password, if this is password auth.
    pub fn password(&self) -> Option<&str> {
        match self {
            Self::Password(p) if !p.is_empty() => Some(p),
            _ => None,
        }
    }

    pub fn key_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Key { path } => path.as_ref(),
            Self::Password(_) => None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::Key { path } => f.debug_struct("Key").field("path", path).finish(),
        }
    }
}

// ── Discovery ─────────────────────────────────────────────────────

/// Where a discovery candidate came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoverySource {
    Advertisement,
    SubnetScan,
}

/// Dedup identity of a candidate: normalized host plus port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateKey {
    pub host: String,
    pub port: u16,
}

impl CandidateKey {
    /// Strips one trailing DNS root dot and lowercases the host.
    pub fn new(host: &str, port: u16) -> Self {
        let host = host.trim();
        let host = host.strip_suffix('.').unwrap_or(host);
        Self {
            host: host.to_lowercase(),
            port,
        }
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A host found on the local network that may be added as a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredCandidate {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub ip: Option<IpAddr>,
    pub source: DiscoverySource,
    pub latency_ms: Option<u64>,
}

impl DiscoveredCandidate {
    pub fn key(&self) -> CandidateKey {
        CandidateKey::new(&self.host, self.port)
    }

    /// Fill fields this candidate is missing from `other`.
    ///
    /// Fields already set are never overwritten, so refining is idempotent.
    /// Returns true if anything changed.
    pub fn refine(&mut self, other: &DiscoveredCandidate) -> bool {
        let mut changed = false;
        if self.ip.is_none() && other.ip.is_some() {
            self.ip = other.ip;
            changed = true;
        }
        if self.latency_ms.is_none() && other.latency_ms.is_some() {
            self.latency_ms = other.latency_ms;
            changed = true;
        }
        if self.name.is_empty() && !other.name.is_empty() {
            self.name = other.name.clone();
            changed = true;
        }
        changed
    }
}

// ── Host keys ─────────────────────────────────────────────────────

/// A public host key returned by a trust scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostKey {
    /// Algorithm name, e.g. `ssh-ed25519`.
    pub key_type: String,
    /// Raw key material as it appeared on the wire (base64).
    pub key_base64: String,
    /// `SHA256:<base64-no-padding>` of the decoded key bytes.
    pub fingerprint: String,
}

// ── Commands ──────────────────────────────────────────────────────

/// Output of a remote command that exited successfully.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    /// Standard output followed by standard error.
    pub output: String,
    pub exit_code: i32,
}

/// Privileged administrative actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAction {
    Shutdown,
    Restart,
}

impl DeviceAction {
    /// The command run under sudo for this action.
    pub fn base_command(&self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown -h now",
            Self::Restart => "shutdown -r now",
        }
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => f.write_str("shutdown"),
            Self::Restart => f.write_str("restart"),
        }
    }
}

/// A failed action waiting for the operator to supply a sudo password.
#[derive(Debug, Clone)]
pub struct EscalationRequest {
    pub id: Uuid,
    pub device: Device,
    pub action: DeviceAction,
    pub created_at: DateTime<Utc>,
}

impl EscalationRequest {
    pub fn new(device: Device, action: DeviceAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            device,
            action,
            created_at: Utc::now(),
        }
    }
}
