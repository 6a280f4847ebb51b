/*!
 * CAN-bus plugin.
 *
 * A device is a set of frames seen on one interface. Each data point address
 * names a CAN id, in hex (`0x18FEF100`) or decimal, optionally followed by the
 * byte offset of the signal inside the frame (`0x101:2`).
 */
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use edgelink_core::clock::{SharedClock, SystemClock};

use crate::datapoint::DataPoint;
use crate::descriptor::DeviceDescriptor;
use crate::error::{DeviceError, Result};
use crate::protocol::{ConnectionHandle, Endpoint, ProtocolPlugin, SharedTransport};
use crate::protocols::common::{check_protocol, parse_addresses, ConnectionTable};

/// Protocol tag served by [`CanPlugin`]
pub const PROTOCOL: &str = "canbus";

/// Largest 29-bit extended identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Largest 11-bit standard identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Bitrates accepted for the `bitrate` parameter
pub const STANDARD_BITRATES: [i64; 9] = [
    10_000, 20_000, 50_000, 100_000, 125_000, 250_000, 500_000, 800_000, 1_000_000,
];

/// A parsed CAN data point address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanAddress {
    /// Frame identifier
    pub id: u32,
    /// Byte offset of the signal within the frame payload
    pub byte_offset: u8,
}

impl CanAddress {
    /// Whether the id needs the 29-bit extended frame format
    pub fn is_extended(&self) -> bool {
        self.id > MAX_STANDARD_ID
    }
}

impl FromStr for CanAddress {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (id, offset) = match s.split_once(':') {
            Some((id, offset)) => (id.trim(), Some(offset.trim())),
            None => (s, None),
        };

        let parsed = match id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => id.parse::<u32>(),
        };
        let id = match parsed {
            Ok(v) if v <= MAX_EXTENDED_ID => v,
            _ => {
                return Err(DeviceError::config(format!(
                    "'{}' is not a CAN id in 0..=0x1FFFFFFF",
                    id
                )))
            }
        };

        let byte_offset = match offset {
            None => 0,
            Some(raw) => match raw.parse::<u8>() {
                Ok(v) if v <= 7 => v,
                _ => {
                    return Err(DeviceError::config(format!(
                        "byte offset '{}' must be in 0..=7",
                        raw
                    )))
                }
            },
        };

        Ok(Self { id, byte_offset })
    }
}

impl fmt::Display for CanAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#X}:{}", self.id, self.byte_offset)
    }
}

/// SocketCAN-style plugin
#[derive(Debug)]
pub struct CanPlugin {
    table: ConnectionTable,
}

impl CanPlugin {
    /// Create a plugin over `transport`
    pub fn new(transport: SharedTransport) -> Self {
        Self::with_clock(transport, SystemClock::shared())
    }

    /// Create a plugin stamping points with `clock`
    pub fn with_clock(transport: SharedTransport, clock: SharedClock) -> Self {
        Self {
            table: ConnectionTable::new(PROTOCOL, transport, clock),
        }
    }

    /// The connection table
    pub fn connections(&self) -> &ConnectionTable {
        &self.table
    }

    fn endpoint(descriptor: &DeviceDescriptor) -> Result<Endpoint> {
        let interface = descriptor
            .param_string("interface")
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .ok_or_else(|| {
                DeviceError::config(format!("device '{}' needs an 'interface'", descriptor.name))
            })?;

        let mut endpoint = Endpoint::new(PROTOCOL, interface);
        if descriptor.param("bitrate").is_some() {
            match descriptor.param_integer("bitrate") {
                Some(rate) if STANDARD_BITRATES.contains(&rate) => {
                    endpoint = endpoint.with_option("bitrate", rate);
                }
                _ => {
                    return Err(DeviceError::config(format!(
                        "device '{}' has an unsupported bitrate",
                        descriptor.name
                    )))
                }
            }
        }
        Ok(endpoint)
    }

    fn addresses(descriptor: &DeviceDescriptor) -> Result<Vec<String>> {
        Ok(parse_addresses(descriptor, CanAddress::from_str)?
            .into_iter()
            .map(|a| a.to_string())
            .collect())
    }
}

#[async_trait]
impl ProtocolPlugin for CanPlugin {
    fn protocol_name(&self) -> &str {
        PROTOCOL
    }

    fn validate_device_config(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        check_protocol(descriptor, PROTOCOL)?;
        Self::endpoint(descriptor)?;
        Self::addresses(descriptor)?;
        Ok(())
    }

    async fn connect_device(&self, descriptor: &DeviceDescriptor) -> Result<ConnectionHandle> {
        let endpoint = Self::endpoint(descriptor)?;
        self.table.open(descriptor, endpoint).await
    }

    async fn disconnect_device(&self, device_name: &str) -> Result<()> {
        self.table.close(device_name).await
    }

    async fn read_device_data(
        &self,
        device_name: &str,
        descriptor: &DeviceDescriptor,
    ) -> Result<Vec<DataPoint>> {
        let addresses = Self::addresses(descriptor)?;
        self.table.read(device_name, descriptor, &addresses).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DataPointDescriptor;
    use crate::protocols::simulated::SimulatedTransport;
    use edgelink_core::types::Value;
    use std::sync::Arc;

    #[test]
    fn test_can_address_parsing() {
        let a: CanAddress = "0x18FEF100".parse().unwrap();
        assert_eq!(a.id, 0x18FE_F100);
        assert!(a.is_extended());
        assert_eq!(a.byte_offset, 0);

        let a: CanAddress = "257:3".parse().unwrap();
        assert_eq!(a, CanAddress { id: 0x101, byte_offset: 3 });
        assert!(!a.is_extended());
        assert_eq!(a.to_string(), "0x101:3");

        assert!("0x20000000".parse::<CanAddress>().is_err());
        assert!("0x101:8".parse::<CanAddress>().is_err());
        assert!("engine".parse::<CanAddress>().is_err());
    }

    #[test]
    fn test_validation() {
        let plugin = CanPlugin::new(Arc::new(SimulatedTransport::new()));
        let ok = DeviceDescriptor::new("ecu", "canbus", 100)
            .with_param("interface", "can0")
            .with_param("bitrate", 500_000)
            .with_point(DataPointDescriptor::new("rpm").with_address("0x0CF00400:3"));
        assert!(plugin.validate_device_config(&ok).is_ok());

        let no_iface = DeviceDescriptor::new("ecu", "canbus", 100);
        assert!(plugin.validate_device_config(&no_iface).is_err());

        let odd_rate = ok.clone().with_param("bitrate", 123_456);
        assert!(plugin.validate_device_config(&odd_rate).is_err());
    }

    #[tokio::test]
    async fn test_read_uses_normalised_addresses() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.set_value("0x101:2", 42);
        let plugin = CanPlugin::new(transport);
        let device = DeviceDescriptor::new("ecu", "canbus", 100)
            .with_param("interface", "can0")
            .with_point(DataPointDescriptor::new("speed").with_address("257:2"));

        plugin.connect_device(&device).await.unwrap();
        assert!(plugin.connections().is_open("ecu"));
        let points = plugin.read_device_data("ecu", &device).await.unwrap();
        assert_eq!(points[0].value(), &Value::Integer(42));

        plugin.disconnect_device("ecu").await.unwrap();
        assert_eq!(plugin.connections().open_count(), 0);
    }
}
