/*!
 * Device and data point descriptors.
 *
 * A [`DeviceDescriptor`] is the static configuration of one field device. It is
 * immutable for the lifetime of an adapter run; changing it means building a
 * new adapter.
 */
use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use edgelink_core::types::{Metadata, Value};
use edgelink_core::utils::millis_to_duration;

use crate::error::{DeviceError, Result};

/// Protocol-specific connection parameters, opaque to the framework
pub type ConnectionParams = HashMap<String, Value>;

/// Linear scaling applied to raw numeric readings: `raw * factor + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    /// Multiplicative factor
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Additive offset
    #[serde(default)]
    pub offset: f64,
}

fn default_factor() -> f64 {
    1.0
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            factor: 1.0,
            offset: 0.0,
        }
    }
}

impl Scaling {
    /// Create a scaling rule
    pub fn new(factor: f64, offset: f64) -> Self {
        Self { factor, offset }
    }

    /// Apply the rule to a raw value. Non-numeric values pass through untouched.
    pub fn apply(&self, raw: Value) -> Value {
        match raw.as_float() {
            Some(x) if raw.is_numeric() => Value::Float(x * self.factor + self.offset),
            _ => raw,
        }
    }
}

/// Describes one measurement a device exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPointDescriptor {
    /// Point name (tag)
    pub name: String,
    /// Protocol-specific address (register, CAN id, NodeId)
    #[serde(default)]
    pub address: Option<String>,
    /// Engineering unit
    #[serde(default)]
    pub unit: Option<String>,
    /// Optional scaling of raw values
    #[serde(default)]
    pub scaling: Option<Scaling>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl DataPointDescriptor {
    /// Create a point with only a name
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            address: None,
            unit: None,
            scaling: None,
            metadata: Metadata::new(),
        }
    }

    /// Set the protocol address
    pub fn with_address<S: Into<String>>(mut self, address: S) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the engineering unit
    pub fn with_unit<S: Into<String>>(mut self, unit: S) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the scaling rule
    pub fn with_scaling(mut self, factor: f64, offset: f64) -> Self {
        self.scaling = Some(Scaling::new(factor, offset));
        self
    }

    /// The address, or a configuration error naming the point
    pub fn require_address(&self) -> Result<&str> {
        match self.address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => Ok(address),
            _ => Err(DeviceError::config(format!(
                "data point '{}' has no address",
                self.name
            ))),
        }
    }
}

/// The static configuration of one manageable device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique name within an adapter instance
    pub name: String,
    /// Protocol tag ("modbus", "canbus", "opcua", ...)
    pub protocol: String,
    /// Whether the adapter should manage the device at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Protocol-specific connection parameters
    #[serde(default)]
    pub connection_params: ConnectionParams,
    /// Configured data points, in emission order
    #[serde(default)]
    pub data_points: Vec<DataPointDescriptor>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_enabled() -> bool {
    true
}

impl DeviceDescriptor {
    /// Create an enabled descriptor with no parameters or points
    pub fn new<N: Into<String>, P: Into<String>>(name: N, protocol: P, poll_interval_ms: u64) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.into(),
            enabled: true,
            poll_interval_ms,
            connection_params: ConnectionParams::new(),
            data_points: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// Add a connection parameter
    pub fn with_param<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.connection_params.insert(key.into(), value.into());
        self
    }

    /// Add a data point
    pub fn with_point(mut self, point: DataPointDescriptor) -> Self {
        self.data_points.push(point);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the enabled flag
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        millis_to_duration(self.poll_interval_ms)
    }

    /// Gets a raw connection parameter
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.connection_params.get(key)
    }

    /// Gets a string parameter; numbers and booleans are rendered as text
    pub fn param_string(&self, key: &str) -> Option<String> {
        match self.param(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Gets an integer parameter; numeric strings are accepted
    pub fn param_integer(&self, key: &str) -> Option<i64> {
        self.param(key).and_then(Value::as_integer)
    }

    /// Gets an integer parameter bounded to `range`, or a configuration error
    pub fn param_in_range(
        &self,
        key: &str,
        range: std::ops::RangeInclusive<i64>,
    ) -> Result<Option<i64>> {
        match self.param(key) {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => match raw.as_integer() {
                Some(v) if range.contains(&v) => Ok(Some(v)),
                _ => Err(DeviceError::config(format!(
                    "parameter '{}' must be an integer in {}..={}, got {}",
                    key,
                    range.start(),
                    range.end(),
                    raw
                ))),
            },
        }
    }

    /// Structural checks every protocol shares: a name, a positive poll
    /// interval and uniquely named data points.
    pub fn validate_common(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DeviceError::config("device name must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(DeviceError::config(format!(
                "device '{}' must have a positive poll_interval_ms",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for point in &self.data_points {
            if point.name.trim().is_empty() {
                return Err(DeviceError::config(format!(
                    "device '{}' has a data point without a name",
                    self.name
                )));
            }
            if !seen.insert(point.name.as_str()) {
                return Err(DeviceError::config(format!(
                    "device '{}' declares data point '{}' twice",
                    self.name, point.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DescriptorDocument {
    #[serde(default)]
    devices: Vec<DeviceDescriptor>,
}

/// Materialise a descriptor list from a TOML document of `[[devices]]` tables
pub fn parse_descriptors_toml(document: &str) -> Result<Vec<DeviceDescriptor>> {
    let parsed: DescriptorDocument = toml::from_str(document)
        .map_err(|e| DeviceError::config(format!("invalid descriptor document: {}", e)))?;
    Ok(parsed.devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling_apply() {
        let scaling = Scaling::new(0.5, -40.0);
        assert_eq!(scaling.apply(Value::Integer(650)), Value::Float(285.0));
        assert_eq!(scaling.apply(Value::Bool(true)), Value::Bool(true));
        assert_eq!(scaling.apply(Value::from("n/a")), Value::from("n/a"));
    }

    #[test]
    fn test_param_accessors() {
        let d = DeviceDescriptor::new("plc1", "modbus", 500)
            .with_param("host", "10.0.0.5")
            .with_param("port", "502")
            .with_param("unit_id", 300);

        assert_eq!(d.param_string("host").as_deref(), Some("10.0.0.5"));
        assert_eq!(d.param_integer("port"), Some(502));
        assert_eq!(d.param_string("port").as_deref(), Some("502"));
        assert_eq!(d.param_in_range("port", 1..=65535).unwrap(), Some(502));
        assert!(d.param_in_range("unit_id", 0..=247).is_err());
        assert_eq!(d.param_in_range("missing", 0..=1).unwrap(), None);
        assert_eq!(d.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_validate_common() {
        let ok = DeviceDescriptor::new("a", "modbus", 100)
            .with_point(DataPointDescriptor::new("t"))
            .with_point(DataPointDescriptor::new("p"));
        assert!(ok.validate_common().is_ok());

        let zero = DeviceDescriptor::new("a", "modbus", 0);
        assert!(matches!(zero.validate_common(), Err(DeviceError::Config(_))));

        let dup = DeviceDescriptor::new("a", "modbus", 100)
            .with_point(DataPointDescriptor::new("t"))
            .with_point(DataPointDescriptor::new("t"));
        assert!(dup.validate_common().is_err());
    }

    #[test]
    fn test_require_address() {
        assert!(DataPointDescriptor::new("t").require_address().is_err());
        assert!(DataPointDescriptor::new("t").with_address("  ").require_address().is_err());
        assert_eq!(
            DataPointDescriptor::new("t").with_address("hr:10").require_address().unwrap(),
            "hr:10"
        );
    }

    #[test]
    fn test_parse_descriptors_toml() {
        let doc = r#"
            [[devices]]
            name = "boiler"
            protocol = "modbus"
            poll_interval_ms = 1000

            [devices.connection_params]
            host = "192.168.1.20"
            port = 502

            [[devices.data_points]]
            name = "temperature"
            address = "hr:100"
            unit = "degC"
            scaling = { factor = 0.1 }

            [[devices]]
            name = "spare"
            protocol = "canbus"
            enabled = false
            poll_interval_ms = 250
        "#;

        let devices = parse_descriptors_toml(doc).unwrap();
        assert_eq!(devices.len(), 2);

        let boiler = &devices[0];
        assert!(boiler.enabled);
        assert_eq!(boiler.param_integer("port"), Some(502));
        assert_eq!(boiler.data_points[0].unit.as_deref(), Some("degC"));
        assert_eq!(boiler.data_points[0].scaling, Some(Scaling::new(0.1, 0.0)));

        assert!(!devices[1].enabled);
        assert!(devices[1].data_points.is_empty());
    }

    #[test]
    fn test_parse_descriptors_toml_rejects_missing_fields() {
        let doc = r#"
            [[devices]]
            name = "no-protocol"
            poll_interval_ms = 10
        "#;
        assert!(matches!(parse_descriptors_toml(doc), Err(DeviceError::Config(_))));
    }
}
