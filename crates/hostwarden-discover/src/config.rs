//! Configuration for discovery and status polling.

use std::time::Duration;

use serde::Deserialize;

/// Top-level discover configuration.
///
/// Loaded from `hostwarden.toml` `[discover]` section or
/// `HOSTWARDEN_DISCOVER__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverConfig {
    /// Timeout of a status-poll probe, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Per-host timeout during a subnet scan, in milliseconds.
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,

    /// Port probed during a subnet scan.
    #[serde(default = "default_scan_port")]
    pub scan_port: u16,

    /// Cap on the number of addresses probed per subnet scan.
    #[serde(default)]
    pub max_hosts: Option<usize>,

    /// Interval between status polling passes, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum probes in flight during one polling pass.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_probes: usize,

    /// Advertised service type browsed for SSH hosts.
    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// Timeout for resolving an advertised host name to addresses.
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
}

impl DiscoverConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

fn default_probe_timeout_ms() -> u64 {
    2500
}

fn default_scan_timeout_ms() -> u64 {
    900
}

fn default_scan_port() -> u16 {
    22
}

fn default_poll_interval() -> u64 {
    15
}

fn default_max_concurrent() -> usize {
    16
}

fn default_service_type() -> String {
    "_ssh._tcp.local.".to_string()
}

fn default_resolve_timeout_ms() -> u64 {
    5000
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            scan_timeout_ms: default_scan_timeout_ms(),
            scan_port: default_scan_port(),
            max_hosts: None,
            poll_interval_secs: default_poll_interval(),
            max_concurrent_probes: default_max_concurrent(),
            service_type: default_service_type(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
        }
    }
}
