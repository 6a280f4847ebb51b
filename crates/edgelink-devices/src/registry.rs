/*!
 * Device registry for EdgeLink.
 *
 * The registry holds the descriptor set an adapter was built with. It is
 * read-only after construction, so it needs no synchronization; reconfiguring
 * means building a new adapter.
 */
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::descriptor::{parse_descriptors_toml, DeviceDescriptor};
use crate::error::{DeviceError, Result};

/// Ordered, immutable set of device descriptors keyed by name
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    /// Descriptors in configuration order
    devices: Vec<DeviceDescriptor>,
    /// Position of each device in `devices`
    index: HashMap<String, usize>,
}

impl DeviceRegistry {
    /// Build a registry from an already materialised descriptor list.
    ///
    /// Fails if two descriptors share a name.
    pub fn new(devices: Vec<DeviceDescriptor>) -> Result<Self> {
        let mut index = HashMap::with_capacity(devices.len());
        for (position, device) in devices.iter().enumerate() {
            if index.insert(device.name.clone(), position).is_some() {
                return Err(DeviceError::Registry(format!(
                    "device name '{}' is used more than once",
                    device.name
                )));
            }
        }
        debug!("Registry built with {} devices", devices.len());
        Ok(Self { devices, index })
    }

    /// Build a registry from a TOML document of `[[devices]]` tables
    pub fn from_toml(document: &str) -> Result<Self> {
        Self::new(parse_descriptors_toml(document)?)
    }

    /// Get a descriptor by device name
    pub fn get(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.index.get(name).map(|&position| &self.devices[position])
    }

    /// All descriptors, in configuration order
    pub fn all(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Enabled descriptors, in configuration order
    pub fn enabled(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter().filter(|d| d.enabled)
    }

    /// Device names, in configuration order
    pub fn names(&self) -> Vec<&str> {
        self.devices.iter().map(|d| d.name.as_str()).collect()
    }

    /// Distinct protocol tags used by the registry, lower-cased
    pub fn protocols(&self) -> HashSet<String> {
        self.devices.iter().map(|d| d.protocol.to_lowercase()).collect()
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry holds no devices
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Check whether a device is registered
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}

/// A registry shared between an adapter and its device workers
pub type SharedDeviceRegistry = Arc<DeviceRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor::new("boiler", "modbus", 1000),
            DeviceDescriptor::new("conveyor", "canbus", 200).enabled(false),
            DeviceDescriptor::new("mixer", "Modbus", 500),
        ]
    }

    #[test]
    fn test_lookup_and_order() {
        let registry = DeviceRegistry::new(sample()).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names(), vec!["boiler", "conveyor", "mixer"]);
        assert_eq!(registry.get("mixer").unwrap().poll_interval_ms, 500);
        assert!(registry.get("pump").is_none());
        assert!(registry.contains("conveyor"));

        let enabled: Vec<_> = registry.enabled().map(|d| d.name.as_str()).collect();
        assert_eq!(enabled, vec!["boiler", "mixer"]);

        let protocols = registry.protocols();
        assert_eq!(protocols.len(), 2);
        assert!(protocols.contains("modbus"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut devices = sample();
        devices.push(DeviceDescriptor::new("boiler", "modbus", 10));
        let err = DeviceRegistry::new(devices).unwrap_err();
        assert!(matches!(err, DeviceError::Registry(ref m) if m.contains("boiler")));
    }

    #[test]
    fn test_empty_registry() {
        let registry = DeviceRegistry::new(Vec::new()).unwrap();
        assert!(registry.is_empty());
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_from_toml() {
        let registry = DeviceRegistry::from_toml(
            r#"
            [[devices]]
            name = "a"
            protocol = "opcua"
            poll_interval_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(registry.names(), vec!["a"]);
    }
}
