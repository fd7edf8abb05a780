//! Interface registry.
//!
//! Maps interface identity (name, driver-assigned index) to a handle so
//! events and commands can be resolved to a logical interface. Virtual
//! interface create/delete tolerate driver state drift: creating an
//! existing name and deleting an unknown one are both logged no-op
//! successes.

use std::collections::HashMap;
use std::sync::Mutex;

use super::error::{Error, Result};

/// Maximum interface name length (trailing NUL excluded).
pub const IFNAMSIZ: usize = 16;

/// Opaque handle to a registered interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceHandle(i32);

/// A registered interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Interface name.
    pub name: String,
    /// Driver-assigned interface index.
    pub ifindex: i32,
    /// Created through the HAL (swept by `cleanup_dynamic`).
    pub dynamic: bool,
}

struct RegistryInner {
    by_index: HashMap<i32, InterfaceInfo>,
    /// Next synthetic index handed to HAL-created virtual interfaces.
    next_synthetic: i32,
}

/// Thread-safe interface table owned by the HAL session.
pub struct InterfaceRegistry {
    inner: Mutex<RegistryInner>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                by_index: HashMap::new(),
                next_synthetic: 1,
            }),
        }
    }

    /// Register a discovered interface, replacing any entry with the
    /// same index.
    pub fn register(&self, name: &str, ifindex: i32) -> Result<InterfaceHandle> {
        if name.is_empty() || name.len() > IFNAMSIZ {
            return Err(Error::InvalidMessage(format!(
                "interface name '{}' exceeds {} bytes",
                name, IFNAMSIZ
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        let info = InterfaceInfo {
            name: name.to_string(),
            ifindex,
            dynamic: false,
        };
        if inner.by_index.insert(ifindex, info).is_some() {
            tracing::debug!(name, ifindex, "replaced interface registration");
        }
        Ok(InterfaceHandle(ifindex))
    }

    /// Resolve a handle back to its interface.
    pub fn resolve(&self, handle: InterfaceHandle) -> Result<InterfaceInfo> {
        self.inner
            .lock()
            .unwrap()
            .by_index
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| Error::InterfaceNotFound {
                name: format!("ifindex {}", handle.0),
            })
    }

    /// Look up an interface by name.
    pub fn resolve_by_name(&self, name: &str) -> Option<InterfaceInfo> {
        self.inner
            .lock()
            .unwrap()
            .by_index
            .values()
            .find(|info| info.name == name)
            .cloned()
    }

    /// Create a virtual interface entry.
    ///
    /// Creating an already-existing name succeeds without a second
    /// entry; the driver and HAL views are allowed to drift.
    pub fn create_virtual(&self, name: &str) -> Result<InterfaceHandle> {
        if name.is_empty() || name.len() > IFNAMSIZ {
            return Err(Error::InvalidMessage(format!(
                "interface name '{}' exceeds {} bytes",
                name, IFNAMSIZ
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.by_index.values().find(|info| info.name == name) {
            tracing::debug!(name, "virtual interface already exists");
            return Ok(InterfaceHandle(existing.ifindex));
        }

        while inner.by_index.contains_key(&inner.next_synthetic) {
            inner.next_synthetic += 1;
        }
        let ifindex = inner.next_synthetic;
        inner.next_synthetic += 1;
        inner.by_index.insert(
            ifindex,
            InterfaceInfo {
                name: name.to_string(),
                ifindex,
                dynamic: true,
            },
        );
        tracing::debug!(name, ifindex, "created virtual interface");
        Ok(InterfaceHandle(ifindex))
    }

    /// Delete a virtual interface entry. Unknown names succeed.
    pub fn delete_virtual(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner
            .by_index
            .values()
            .find(|info| info.name == name)
            .map(|info| info.ifindex);
        match index {
            Some(ifindex) => {
                inner.by_index.remove(&ifindex);
                tracing::debug!(name, ifindex, "deleted virtual interface");
            }
            None => tracing::debug!(name, "delete of unknown virtual interface"),
        }
        Ok(())
    }

    /// Remove every interface created through the HAL.
    pub fn cleanup_dynamic(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.by_index.retain(|_, info| !info.dynamic);
    }

    /// All registered interfaces.
    pub fn list(&self) -> Vec<InterfaceInfo> {
        self.inner.lock().unwrap().by_index.values().cloned().collect()
    }

    /// Number of registered interfaces.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_index.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry (HAL teardown).
    pub fn unregister_all(&self) {
        self.inner.lock().unwrap().by_index.clear();
    }
}

impl Default for InterfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let registry = InterfaceRegistry::new();
        let handle = registry.register("wlan0", 3).unwrap();
        let info = registry.resolve(handle).unwrap();
        assert_eq!(info.name, "wlan0");
        assert_eq!(info.ifindex, 3);
        assert!(!info.dynamic);
    }

    #[test]
    fn test_resolve_unknown_handle() {
        let registry = InterfaceRegistry::new();
        let handle = registry.register("wlan0", 3).unwrap();
        registry.unregister_all();
        assert!(registry.resolve(handle).is_err());
    }

    #[test]
    fn test_create_twice_is_idempotent() {
        let registry = InterfaceRegistry::new();
        let first = registry.create_virtual("wlan1").unwrap();
        let second = registry.create_virtual("wlan1").unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_delete_unknown_is_ok() {
        let registry = InterfaceRegistry::new();
        registry.delete_virtual("wlan9").unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cleanup_dynamic_spares_discovered() {
        let registry = InterfaceRegistry::new();
        registry.register("wlan0", 3).unwrap();
        registry.create_virtual("wlan1").unwrap();
        registry.create_virtual("wifi-aware0").unwrap();

        registry.cleanup_dynamic();
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve_by_name("wlan0").is_some());
        assert!(registry.resolve_by_name("wlan1").is_none());
    }

    #[test]
    fn test_synthetic_index_skips_registered() {
        let registry = InterfaceRegistry::new();
        registry.register("wlan0", 1).unwrap();
        let handle = registry.create_virtual("wlan1").unwrap();
        let info = registry.resolve(handle).unwrap();
        assert_ne!(info.ifindex, 1);
    }

    #[test]
    fn test_overlong_name_rejected() {
        let registry = InterfaceRegistry::new();
        assert!(registry.register("a-name-way-beyond-ifnamsiz", 9).is_err());
        assert!(registry.create_virtual("").is_err());
    }
}
