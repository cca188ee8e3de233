//! Device discovery and caching.
//!
//! Backends register by key; the registry instantiates them lazily, caches
//! the instance, and answers name-based selection for the harness front end.
//! The in-memory simulator is always registered, so the harness has a
//! working device even on hosts with no compute hardware.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::backend::{Backend, Device, DeviceDescriptor};
use crate::error::{DeviceNotFoundSnafu, Result};
use crate::simulator::SimulatorBackend;

/// Factory producing a backend instance on first use.
pub type BackendFactory = Arc<dyn Fn() -> Result<Arc<dyn Backend>> + Send + Sync>;

/// Registry of backend factories with instance caching.
///
/// Uses double-checked locking: a read lock answers the common cached case,
/// a write lock covers first instantiation.
pub struct DeviceRegistry {
    /// Registration order decides enumeration order, so keep a Vec.
    factories: RwLock<Vec<(String, BackendFactory)>>,
    backends: RwLock<HashMap<String, Arc<dyn Backend>>>,
}

impl DeviceRegistry {
    /// Create a registry with the built-in simulator registered.
    pub fn new() -> Self {
        let registry =
            Self { factories: RwLock::new(Vec::new()), backends: RwLock::new(HashMap::new()) };

        registry.register_factory("simulator", Arc::new(|| Ok(Arc::new(SimulatorBackend::new()) as Arc<dyn Backend>)));

        registry
    }

    /// Register a backend factory under a key. Keys are case-insensitive;
    /// re-registering a key replaces the factory and drops any cached
    /// instance.
    pub fn register_factory(&self, key: &str, factory: BackendFactory) {
        let key = key.to_lowercase();
        let mut factories = self.factories.write();
        self.backends.write().remove(&key);
        if let Some(slot) = factories.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = factory;
        } else {
            factories.push((key, factory));
        }
    }

    /// Descriptors of every registered device, in registration order.
    ///
    /// Instantiates backends as a side effect; factories that fail are
    /// skipped with a warning rather than poisoning enumeration.
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        let keys: Vec<String> = self.factories.read().iter().map(|(k, _)| k.clone()).collect();
        keys.iter()
            .filter_map(|key| match self.backend(key) {
                Ok(backend) => Some(backend.descriptor().clone()),
                Err(error) => {
                    tracing::warn!(device = %key, %error, "device factory failed, skipping");
                    None
                }
            })
            .collect()
    }

    /// Select a device by name.
    ///
    /// Matching is a case-insensitive substring test against the registry
    /// key and the backend's reported device name, taking the first match
    /// in registration order.
    pub fn select(&self, name: &str) -> Result<Device> {
        let needle = name.to_lowercase();
        let keys: Vec<String> = self.factories.read().iter().map(|(k, _)| k.clone()).collect();

        for key in &keys {
            if key.contains(&needle) {
                return Ok(Device::new(self.backend(key)?));
            }
        }
        for key in &keys {
            let backend = self.backend(key)?;
            if backend.descriptor().name.to_lowercase().contains(&needle) {
                return Ok(Device::new(backend));
            }
        }

        DeviceNotFoundSnafu { name: name.to_string(), available: keys }.fail()
    }

    fn backend(&self, key: &str) -> Result<Arc<dyn Backend>> {
        // Fast path: cached instance.
        if let Some(backend) = self.backends.read().get(key) {
            return Ok(Arc::clone(backend));
        }

        let mut backends = self.backends.write();
        // Another thread may have instantiated while we waited.
        if let Some(backend) = backends.get(key) {
            return Ok(Arc::clone(backend));
        }

        let factory = {
            let factories = self.factories.read();
            factories.iter().find(|(k, _)| k == key).map(|(_, f)| Arc::clone(f))
        };
        let Some(factory) = factory else {
            let available: Vec<String> = self.factories.read().iter().map(|(k, _)| k.clone()).collect();
            return DeviceNotFoundSnafu { name: key.to_string(), available }.fail();
        };

        let backend = factory()?;
        backends.insert(key.to_string(), Arc::clone(&backend));
        Ok(backend)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global registry, lazily initialized with the built-in simulator.
static REGISTRY: Lazy<DeviceRegistry> = Lazy::new(DeviceRegistry::new);

pub fn registry() -> &'static DeviceRegistry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeviceType;

    #[test]
    fn simulator_is_registered_by_default() {
        let registry = DeviceRegistry::new();
        let devices = registry.list_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_type, DeviceType::Simulator);
    }

    #[test]
    fn select_matches_key_substring_case_insensitively() {
        let registry = DeviceRegistry::new();
        let device = registry.select("SIM").expect("should match 'simulator'");
        assert_eq!(device.descriptor().device_type, DeviceType::Simulator);
    }

    #[test]
    fn select_matches_backend_name() {
        let registry = DeviceRegistry::new();
        registry.register_factory(
            "gpu0",
            Arc::new(|| Ok(Arc::new(SimulatorBackend::with_name("Oclgrind 18.3")) as Arc<dyn Backend>)),
        );

        let device = registry.select("oclgrind").expect("should match by device name");
        assert_eq!(device.name(), "Oclgrind 18.3");
    }

    #[test]
    fn unknown_device_lists_what_is_available() {
        let registry = DeviceRegistry::new();
        let err = registry.select("does-not-exist").expect_err("no such device");
        match err {
            crate::error::Error::DeviceNotFound { available, .. } => {
                assert!(available.contains(&"simulator".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn backend_instances_are_cached_and_shared() {
        let registry = DeviceRegistry::new();
        let a = registry.select("simulator").expect("select");
        let b = registry.select("simulator").expect("select");
        assert!(std::ptr::eq(a.descriptor(), b.descriptor()));
    }
}
