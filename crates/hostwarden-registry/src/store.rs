//! Device storage: trait plus JSON-file-backed and in-memory implementations.
//!
//! The JSON store keeps the whole registry in a single file, read on every
//! call and rewritten on every mutation:
//! ```text
//! {data_dir}/hostwarden/devices.json
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use hostwarden_core::types::{Device, DeviceId, DeviceStatus};

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Device not found: {0}")]
    NotFound(DeviceId),

    #[error("Registry lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Trait for device registry backends.
pub trait DeviceRegistry: Send + Sync {
    /// All devices, sorted case-insensitively by name.
    fn list_all(&self) -> Result<Vec<Device>, RegistryError>;

    /// Retrieve a device by id.
    fn get(&self, id: DeviceId) -> Result<Device, RegistryError>;

    /// Insert or replace a device, keyed by id.
    fn upsert(&self, device: &Device) -> Result<(), RegistryError>;

    /// Delete a device. Deleting an unknown id is not an error.
    fn delete(&self, id: DeviceId) -> Result<(), RegistryError>;

    /// Update only the status of an existing device.
    fn update_status(&self, id: DeviceId, status: DeviceStatus) -> Result<(), RegistryError>;

    /// Look a device up by id string or by exact (case-insensitive) name.
    fn find(&self, id_or_name: &str) -> Result<Option<Device>, RegistryError> {
        let devices = self.list_all()?;
        let found = devices.into_iter().find(|d| {
            d.id.0.to_string() == id_or_name || d.name.eq_ignore_ascii_case(id_or_name)
        });
        Ok(found)
    }
}

fn sorted(devices: impl Iterator<Item = Device>) -> Vec<Device> {
    let mut list: Vec<Device> = devices.collect();
    list.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.0.cmp(&b.id.0))
    });
    list
}

/// Volatile registry, used by tests and one-shot runs.
#[derive(Default)]
pub struct MemoryRegistry {
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let map = devices.into_iter().map(|d| (d.id, d)).collect();
        Self {
            devices: RwLock::new(map),
        }
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn list_all(&self) -> Result<Vec<Device>, RegistryError> {
        let guard = self.devices.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(sorted(guard.values().cloned()))
    }

    fn get(&self, id: DeviceId) -> Result<Device, RegistryError> {
        let guard = self.devices.read().map_err(|_| RegistryError::Poisoned)?;
        guard.get(&id).cloned().ok_or(RegistryError::NotFound(id))
    }

    fn upsert(&self, device: &Device) -> Result<(), RegistryError> {
        let mut guard = self.devices.write().map_err(|_| RegistryError::Poisoned)?;
        guard.insert(device.id, device.clone());
        Ok(())
    }

    fn delete(&self, id: DeviceId) -> Result<(), RegistryError> {
        let mut guard = self.devices.write().map_err(|_| RegistryError::Poisoned)?;
        guard.remove(&id);
        Ok(())
    }

    fn update_status(&self, id: DeviceId, status: DeviceStatus) -> Result<(), RegistryError> {
        let mut guard = self.devices.write().map_err(|_| RegistryError::Poisoned)?;
        let device = guard.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        device.status = status;
        Ok(())
    }
}

/// File-backed registry storing all devices in one JSON document.
///
/// The file is the source of truth: every call re-reads it, so several
/// processes can share one registry. Mutations are read-modify-write under
/// an in-process lock and replace the file atomically.
pub struct JsonDeviceRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonDeviceRegistry {
    /// Open the registry at `path`, creating parent directories.
    /// A missing file is an empty registry.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let registry = Self {
            path,
            lock: Mutex::new(()),
        };
        let count = registry.load()?.len();
        tracing::debug!(path = %registry.path.display(), count, "Registry opened");
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<DeviceId, Device>, RegistryError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        if json.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let devices: Vec<Device> = serde_json::from_str(&json)?;
        Ok(devices.into_iter().map(|d| (d.id, d)).collect())
    }

    /// Write the full registry, replacing the file atomically.
    fn flush(&self, devices: &HashMap<DeviceId, Device>) -> Result<(), RegistryError> {
        let list = sorted(devices.values().cloned());
        let json = serde_json::to_string_pretty(&list)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn locked(&self) -> Result<MutexGuard<'_, ()>, RegistryError> {
        self.lock.lock().map_err(|_| RegistryError::Poisoned)
    }
}

impl DeviceRegistry for JsonDeviceRegistry {
    fn list_all(&self) -> Result<Vec<Device>, RegistryError> {
        let _guard = self.locked()?;
        Ok(sorted(self.load()?.into_values()))
    }

    fn get(&self, id: DeviceId) -> Result<Device, RegistryError> {
        let _guard = self.locked()?;
        self.load()?.remove(&id).ok_or(RegistryError::NotFound(id))
    }

    fn upsert(&self, device: &Device) -> Result<(), RegistryError> {
        let _guard = self.locked()?;
        let mut devices = self.load()?;
        devices.insert(device.id, device.clone());
        self.flush(&devices)?;
        tracing::debug!(device_id = %device.id, name = %device.name, "Device saved");
        Ok(())
    }

    fn delete(&self, id: DeviceId) -> Result<(), RegistryError> {
        let _guard = self.locked()?;
        let mut devices = self.load()?;
        if devices.remove(&id).is_some() {
            self.flush(&devices)?;
            tracing::debug!(device_id = %id, "Device deleted");
        }
        Ok(())
    }

    fn update_status(&self, id: DeviceId, status: DeviceStatus) -> Result<(), RegistryError> {
        let _guard = self.locked()?;
        let mut devices = self.load()?;
        let device = devices.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        if device.status != status {
            device.status = status;
            self.flush(&devices)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str) -> Device {
        Device::new(name, "192.168.1.20", "pi")
    }

    #[test]
    fn save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");

        let mut d = device("Garage Pi");
        d.password = Some("pw".to_string());
        d.accept_new_host_key = true;
        {
            let registry = JsonDeviceRegistry::open(&path).unwrap();
            registry.upsert(&d).unwrap();
        }

        let registry = JsonDeviceRegistry::open(&path).unwrap();
        let loaded = registry.get(d.id).unwrap();
        assert_eq!(loaded, d);
    }

    #[test]
    fn list_sorts_case_insensitively() {
        let registry = MemoryRegistry::new();
        for name in ["zeta", "Alpha", "beta"] {
            registry.upsert(&device(name)).unwrap();
        }
        let names: Vec<String> = registry
            .list_all()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "beta", "zeta"]);
    }

    #[test]
    fn upsert_replaces_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonDeviceRegistry::open(dir.path().join("devices.json")).unwrap();
        let mut d = device("nas");
        registry.upsert(&d).unwrap();
        d.host = "192.168.1.99".to_string();
        registry.upsert(&d).unwrap();

        let all = registry.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].host, "192.168.1.99");
    }

    #[test]
    fn update_status_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let d = device("nas");
        {
            let registry = JsonDeviceRegistry::open(&path).unwrap();
            registry.upsert(&d).unwrap();
            registry.update_status(d.id, DeviceStatus::Reachable).unwrap();
        }
        let registry = JsonDeviceRegistry::open(&path).unwrap();
        assert_eq!(registry.get(d.id).unwrap().status, DeviceStatus::Reachable);
    }

    #[test]
    fn update_status_of_unknown_device_fails() {
        let registry = MemoryRegistry::new();
        let result = registry.update_status(DeviceId::new(), DeviceStatus::Reachable);
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn delete_removes_device() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonDeviceRegistry::open(dir.path().join("devices.json")).unwrap();
        let d = device("nas");
        registry.upsert(&d).unwrap();
        registry.delete(d.id).unwrap();
        assert!(registry.list_all().unwrap().is_empty());
        // Idempotent.
        registry.delete(d.id).unwrap();
    }

    #[test]
    fn find_by_name_or_id() {
        let d = device("Office-Server");
        let registry = MemoryRegistry::with_devices([d.clone()]);
        assert_eq!(registry.find("office-server").unwrap(), Some(d.clone()));
        assert_eq!(registry.find(&d.id.to_string()).unwrap(), Some(d));
        assert_eq!(registry.find("missing").unwrap(), None);
    }

    #[test]
    fn second_handle_sees_and_keeps_other_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let nas = device("nas");
        let poller = JsonDeviceRegistry::open(&path).unwrap();
        poller.upsert(&nas).unwrap();

        let cli = JsonDeviceRegistry::open(&path).unwrap();
        let pi = device("garage-pi");
        cli.upsert(&pi).unwrap();

        poller.update_status(nas.id, DeviceStatus::Reachable).unwrap();

        let names: Vec<String> = poller.list_all().unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["garage-pi", "nas"]);
        let reopened = JsonDeviceRegistry::open(&path).unwrap();
        assert_eq!(reopened.list_all().unwrap().len(), 2);
        assert_eq!(reopened.get(nas.id).unwrap().status, DeviceStatus::Reachable);

        cli.delete(pi.id).unwrap();
        poller.update_status(nas.id, DeviceStatus::Unreachable).unwrap();
        assert!(matches!(reopened.get(pi.id), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn missing_file_is_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonDeviceRegistry::open(dir.path().join("nested/devices.json")).unwrap();
        assert!(registry.list_all().unwrap().is_empty());
    }
}
