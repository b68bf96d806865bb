//! hostwarden-registry: persistent device records.
//!
//! The registry is a keyed record store consumed by polling, the trust
//! workflow and the escalation flow. Devices are listed sorted by name,
//! case-insensitively; the only uniqueness constraint is the device id.

pub mod store;

use std::path::PathBuf;

use serde::Deserialize;

pub use store::{DeviceRegistry, JsonDeviceRegistry, MemoryRegistry, RegistryError};

/// Registry configuration (`[registry]` section).
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Path of the JSON registry file.
    #[serde(default = "default_path")]
    pub path: PathBuf,
}

fn default_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hostwarden")
        .join("devices.json")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_ends_with_registry_file() {
        let config = RegistryConfig::default();
        assert!(config.path.ends_with("hostwarden/devices.json"));
    }
}
