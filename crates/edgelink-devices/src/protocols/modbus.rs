/*!
 * Modbus plugin.
 *
 * Devices are reached either over TCP (`host` + `port`) or over a serial line
 * (`serial_port`). Data point addresses are register numbers, optionally
 * prefixed with the register table: `hr:` holding (the default), `ir:` input,
 * `co:` coil, `di:` discrete input.
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

/// Protocol tag served by [`ModbusPlugin`]
pub const PROTOCOL: &str = "modbus";

/// Default Modbus TCP port
pub const DEFAULT_PORT: i64 = 502;

/// Default unit (slave) id
pub const DEFAULT_UNIT_ID: i64 = 1;

/// Modbus register table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    /// Read/write 16-bit registers
    Holding,
    /// Read-only 16-bit registers
    Input,
    /// Read/write bits
    Coil,
    /// Read-only bits
    DiscreteInput,
}

impl RegisterKind {
    fn prefix(self) -> &'static str {
        match self {
            RegisterKind::Holding => "hr",
            RegisterKind::Input => "ir",
            RegisterKind::Coil => "co",
            RegisterKind::DiscreteInput => "di",
        }
    }
}

/// A parsed data point address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterAddress {
    /// Register table
    pub kind: RegisterKind,
    /// Register number
    pub register: u16,
}

impl FromStr for RegisterAddress {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (kind, number) = match s.split_once(':') {
            Some((prefix, number)) => {
                let kind = match prefix.to_ascii_lowercase().as_str() {
                    "hr" => RegisterKind::Holding,
                    "ir" => RegisterKind::Input,
                    "co" => RegisterKind::Coil,
                    "di" => RegisterKind::DiscreteInput,
                    other => {
                        return Err(DeviceError::config(format!(
                            "unknown register table '{}'",
                            other
                        )))
                    }
                };
                (kind, number)
            }
            None => (RegisterKind::Holding, s),
        };
        let register = number.trim().parse::<u16>().map_err(|_| {
            DeviceError::config(format!("register '{}' is not a number in 0..=65535", number))
        })?;
        Ok(Self { kind, register })
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.register)
    }
}

/// Modbus TCP/RTU plugin
#[derive(Debug)]
pub struct ModbusPlugin {
    table: ConnectionTable,
}

impl ModbusPlugin {
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
        let unit_id = descriptor
            .param_in_range("unit_id", 0..=247)?
            .unwrap_or(DEFAULT_UNIT_ID);

        if let Some(serial) = descriptor.param_string("serial_port") {
            if serial.trim().is_empty() {
                return Err(DeviceError::config("serial_port must not be empty"));
            }
            let mut endpoint = Endpoint::new(PROTOCOL, serial.trim()).with_option("unit_id", unit_id);
            if let Some(baud) = descriptor.param_in_range("baud_rate", 1..=4_000_000)? {
                endpoint = endpoint.with_option("baud_rate", baud);
            }
            return Ok(endpoint);
        }

        let host = descriptor
            .param_string("host")
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| {
                DeviceError::config(format!(
                    "device '{}' needs either 'host' or 'serial_port'",
                    descriptor.name
                ))
            })?;
        let port = descriptor
            .param_in_range("port", 1..=65535)?
            .unwrap_or(DEFAULT_PORT);

        Ok(Endpoint::new(PROTOCOL, format!("{}:{}", host.trim(), port)).with_option("unit_id", unit_id))
    }

    fn addresses(descriptor: &DeviceDescriptor) -> Result<Vec<String>> {
        Ok(parse_addresses(descriptor, RegisterAddress::from_str)?
            .into_iter()
            .map(|a| a.to_string())
            .collect())
    }
}

#[async_trait]
impl ProtocolPlugin for ModbusPlugin {
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
