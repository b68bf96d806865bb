//! Configuration for remote execution and host-key scanning.

use std::time::Duration;

use serde::Deserialize;

/// Execution configuration.
///
/// Loaded from `hostwarden.toml` `[exec]` section or `HOSTWARDEN_EXEC__`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecConfig {
    /// OpenSSH client binary.
    #[serde(default = "default_ssh_path")]
    pub ssh_path: String,

    /// `expect` interpreter driving password dialogues.
    #[serde(default = "default_expect_path")]
    pub expect_path: String,

    /// Host key scanner binary.
    #[serde(default = "default_keyscan_path")]
    pub keyscan_path: String,

    /// Per-connection timeout handed to the key scanner, in seconds.
    #[serde(default = "default_keyscan_timeout")]
    pub keyscan_timeout_secs: u64,

    /// Upper bound on one scripted password dialogue, in seconds.
    #[serde(default = "default_dialogue_timeout")]
    pub dialogue_timeout_secs: u64,

    /// `ConnectTimeout` passed to ssh, if set.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Use the native SSH library for password auth when it is compiled in.
    #[serde(default)]
    pub prefer_native: bool,
}

impl ExecConfig {
    pub fn keyscan_timeout(&self) -> Duration {
        Duration::from_secs(self.keyscan_timeout_secs)
    }

    pub fn dialogue_timeout(&self) -> Duration {
        Duration::from_secs(self.dialogue_timeout_secs)
    }
}

fn default_ssh_path() -> String {
    "ssh".to_string()
}

fn default_expect_path() -> String {
    "expect".to_string()
}

fn default_keyscan_path() -> String {
    "ssh-keyscan".to_string()
}

fn default_keyscan_timeout() -> u64 {
    5
}

fn default_dialogue_timeout() -> u64 {
    30
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            ssh_path: default_ssh_path(),
            expect_path: default_expect_path(),
            keyscan_path: default_keyscan_path(),
            keyscan_timeout_secs: default_keyscan_timeout(),
            dialogue_timeout_secs: default_dialogue_timeout(),
            connect_timeout_secs: None,
            prefer_native: false,
        }
    }
}
