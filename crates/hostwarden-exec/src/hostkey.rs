//! Host key trust-on-first-use scanning.
//!
//! Collects a host's public keys with `ssh-keyscan` and fingerprints them
//! the way OpenSSH prints them (`SHA256:` + unpadded base64), so the
//! operator can confirm the host before it is saved or first connected to.

use std::process::Stdio;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};
use tokio::process::Command;

use hostwarden_core::probe::probe;
use hostwarden_core::types::HostKey;

use crate::config::ExecConfig;
use crate::error::HostKeyError;

/// Key types requested from the scanner.
pub const KEY_TYPES: &str = "rsa,ecdsa,ed25519";

/// Slack given to the scanner process past its own per-host timeout.
const PROCESS_GRACE: Duration = Duration::from_secs(2);

/// `SHA256:<base64-no-padding>` of raw key bytes.
pub fn fingerprint_sha256(key: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(key)))
}

/// Parse `host keytype base64 [comment]` lines.
///
/// Comment lines, short lines and lines whose key does not decode are
/// skipped.
pub fn parse_keyscan_output(text: &str) -> Vec<HostKey> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let _host = parts.next()?;
            let key_type = parts.next()?;
            let key_base64 = parts.next()?;
            let raw = STANDARD.decode(key_base64).ok()?;
            Some(HostKey {
                key_type: key_type.to_string(),
                key_base64: key_base64.to_string(),
                fingerprint: fingerprint_sha256(&raw),
            })
        })
        .collect()
}

/// Runs the external key scanner against one host.
#[derive(Debug, Clone)]
pub struct HostKeyScanner {
    keyscan_path: String,
    timeout: Duration,
}

impl HostKeyScanner {
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            keyscan_path: config.keyscan_path.clone(),
            timeout: config.keyscan_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Scan `host:port` for RSA, ECDSA and Ed25519 keys.
    ///
    /// An unreachable host or a scanner error is `ScanFailed`; a clean run
    /// that yields no usable key is `NoKeysFound`.
    pub async fn scan(&self, host: &str, port: u16) -> Result<Vec<HostKey>, HostKeyError> {
        if !probe(host, port, self.timeout).await.is_reachable() {
            tracing::info!(host = %host, port, "Host key scan target unreachable");
            return Err(HostKeyError::ScanFailed(format!(
                "{host}:{port} is unreachable"
            )));
        }

        let timeout_secs = self.timeout.as_secs().max(1);
        let mut cmd = Command::new(&self.keyscan_path);
        cmd.arg("-T")
            .arg(timeout_secs.to_string())
            .arg("-p")
            .arg(port.to_string())
            .arg("-t")
            .arg(KEY_TYPES)
            .arg(host)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limit = Duration::from_secs(timeout_secs) + PROCESS_GRACE;
        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(HostKeyError::ScanFailed(format!(
                    "failed to run {}: {e}",
                    self.keyscan_path
                )))
            }
            Err(_) => {
                return Err(HostKeyError::ScanFailed(format!(
                    "timed out after {}s",
                    limit.as_secs()
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() && stdout.trim().is_empty() {
            return Err(HostKeyError::ScanFailed(failure_reason(&stderr)));
        }

        let keys = parse_keyscan_output(&stdout);
        if keys.is_empty() {
            // ssh-keyscan exits 0 on connection failures and only says so on
            // stderr; banner lines there start with '#'.
            let errors: Vec<&str> = stderr
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .collect();
            if !errors.is_empty() {
                return Err(HostKeyError::ScanFailed(errors.join("; ")));
            }
            return Err(HostKeyError::NoKeysFound);
        }

        tracing::info!(host = %host, port, keys = keys.len(), "Host keys scanned");
        Ok(keys)
    }
}

fn failure_reason(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        "ssh-keyscan failed".to_string()
    } else {
        trimmed.to_string()
    }
}
