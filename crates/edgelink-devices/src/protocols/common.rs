/*!
 * Plumbing shared by the protocol plugins.
 */
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

use edgelink_core::clock::SharedClock;

use crate::datapoint::DataPoint;
use crate::descriptor::DeviceDescriptor;
use crate::error::{DeviceError, Result};
use crate::protocol::{ConnectionHandle, Endpoint, SharedTransport};

/// Per-device table of open connections over one transport.
///
/// The lock only guards the handle map and is never held across an await.
#[derive(Debug)]
pub struct ConnectionTable {
    protocol: &'static str,
    transport: SharedTransport,
    clock: SharedClock,
    handles: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionTable {
    /// Create an empty table
    pub fn new(protocol: &'static str, transport: SharedTransport, clock: SharedClock) -> Self {
        Self {
            protocol,
            transport,
            clock,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Protocol tag of the owning plugin
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// Open a connection for `descriptor` and remember its handle.
    ///
    /// Re-opening an already open device replaces the previous handle.
    pub async fn open(&self, descriptor: &DeviceDescriptor, endpoint: Endpoint) -> Result<ConnectionHandle> {
        debug!("Opening {} for device {}", endpoint, descriptor.name);
        self.transport
            .open(&endpoint)
            .await
            .map_err(DeviceError::into_connect)?;

        let handle = ConnectionHandle::new(descriptor.name.as_str(), endpoint, self.clock.now());
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor.name.clone(), handle.clone());
        info!("Device {} connected via {}", descriptor.name, handle.endpoint);
        Ok(handle)
    }

    /// Close a device's connection. Unknown devices are ignored.
    pub async fn close(&self, device_name: &str) -> Result<()> {
        let handle = self
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_name);

        match handle {
            Some(handle) => {
                debug!("Closing {} for device {}", handle.endpoint, device_name);
                self.transport
                    .close(&handle.endpoint)
                    .await
                    .map_err(DeviceError::into_disconnect)
            }
            None => Ok(()),
        }
    }

    /// Read raw values for `addresses` and assemble one GOOD point per
    /// configured data point, applying each point's scaling.
    pub async fn read(
        &self,
        device_name: &str,
        descriptor: &DeviceDescriptor,
        addresses: &[String],
    ) -> Result<Vec<DataPoint>> {
        let endpoint = self
            .handle(device_name)
            .map(|h| h.endpoint)
            .ok_or_else(|| DeviceError::NotConnected(device_name.to_string()))?;

        let values = self
            .transport
            .read(&endpoint, addresses)
            .await
            .map_err(DeviceError::into_read)?;

        if values.len() != descriptor.data_points.len() {
            return Err(DeviceError::read(format!(
                "expected {} values from {}, got {}",
                descriptor.data_points.len(),
                endpoint,
                values.len()
            )));
        }

        let timestamp = self.clock.now();
        Ok(descriptor
            .data_points
            .iter()
            .zip(values)
            .map(|(point, raw)| {
                let value = match &point.scaling {
                    Some(scaling) => scaling.apply(raw),
                    None => raw,
                };
                DataPoint::good(
                    device_name,
                    point.name.as_str(),
                    value,
                    point.unit.clone(),
                    timestamp,
                )
            })
            .collect())
    }

    /// The handle of an open device
    pub fn handle(&self, device_name: &str) -> Option<ConnectionHandle> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_name)
            .cloned()
    }

    /// Whether a device has an open connection
    pub fn is_open(&self, device_name: &str) -> bool {
        self.handle(device_name).is_some()
    }

    /// Number of open connections
    pub fn open_count(&self) -> usize {
        self.handles.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Parse a data point address for every configured point, in order
pub fn parse_addresses<T, F>(descriptor: &DeviceDescriptor, parse: F) -> Result<Vec<T>>
where
    F: Fn(&str) -> Result<T>,
{
    descriptor
        .data_points
        .iter()
        .map(|point| {
            let raw = point.require_address()?;
            parse(raw).map_err(|e| {
                DeviceError::config(format!(
                    "device '{}' point '{}': {}",
                    descriptor.name,
                    point.name,
                    e.detail()
                ))
            })
        })
        .collect()
}

/// Reject a descriptor whose protocol tag belongs to another plugin
pub fn check_protocol(descriptor: &DeviceDescriptor, protocol: &str) -> Result<()> {
    if descriptor.protocol.trim().eq_ignore_ascii_case(protocol) {
        Ok(())
    } else {
        Err(DeviceError::UnsupportedProtocol(format!(
            "device '{}' uses protocol '{}', expected '{}'",
            descriptor.name, descriptor.protocol, protocol
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoint::Quality;
    use crate::descriptor::DataPointDescriptor;
    use crate::protocols::simulated::SimulatedTransport;
    use edgelink_core::clock::SystemClock;
    use edgelink_core::types::Value;
    use std::sync::Arc;

    fn table(transport: Arc<SimulatedTransport>) -> ConnectionTable {
        ConnectionTable::new("modbus", transport, SystemClock::shared())
    }

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor::new("boiler", "modbus", 1000)
            .with_point(
                DataPointDescriptor::new("temperature")
                    .with_address("hr:1")
                    .with_scaling(0.5, 0.0),
            )
            .with_point(DataPointDescriptor::new("state").with_address("co:2"))
    }

    #[tokio::test]
    async fn test_open_read_close() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.set_value("hr:1", Value::Integer(50));
        transport.set_value("co:2", Value::Bool(true));
        let table = table(transport.clone());
        let d = descriptor();
        let addresses = vec!["hr:1".to_string(), "co:2".to_string()];

        let handle = table.open(&d, Endpoint::new("modbus", "sim:502")).await.unwrap();
        assert_eq!(handle.device_name, "boiler");
        assert!(table.is_open("boiler"));

        let points = table.read("boiler", &d, &addresses).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value(), &Value::Float(25.0));
        assert_eq!(points[1].value(), &Value::Bool(true));
        assert!(points.iter().all(|p| p.quality() == Quality::Good));

        table.close("boiler").await.unwrap();
        assert_eq!(table.open_count(), 0);
        table.close("boiler").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_without_open_is_not_connected() {
        let table = table(Arc::new(SimulatedTransport::new()));
        let err = table.read("boiler", &descriptor(), &[]).await.unwrap_err();
        assert!(matches!(err, DeviceError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_failures_are_relabelled() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.refuse_connections("connection refused");
        let table = table(transport.clone());
        let err = table
            .open(&descriptor(), Endpoint::new("modbus", "sim:502"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Connect(ref m) if m == "connection refused"));
    }

    #[test]
    fn test_parse_addresses_reports_point() {
        let d = DeviceDescriptor::new("x", "modbus", 10)
            .with_point(DataPointDescriptor::new("bad").with_address("zz"));
        let err = parse_addresses(&d, |a: &str| {
            a.parse::<u16>().map_err(|e| DeviceError::config(e.to_string()))
        })
        .unwrap_err();
        assert!(err.detail().contains("point 'bad'"));
    }

    #[test]
    fn test_check_protocol() {
        let d = DeviceDescriptor::new("x", "OPCUA", 10);
        assert!(check_protocol(&d, "opcua").is_ok());
        assert!(matches!(
            check_protocol(&d, "modbus"),
            Err(DeviceError::UnsupportedProtocol(_))
        ));
    }
}
