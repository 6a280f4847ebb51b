/*!
 * OPC-UA plugin.
 *
 * Data point addresses are NodeIds in the standard text form
 * `ns=<namespace>;<kind>=<identifier>` where kind is `s` (string), `i`
 * (numeric), `g` (guid) or `b` (opaque). The namespace part is optional and
 * defaults to 0.
 */
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use uuid::Uuid;

use edgelink_core::clock::{SharedClock, SystemClock};

use crate::datapoint::DataPoint;
use crate::descriptor::DeviceDescriptor;
use crate::error::{DeviceError, Result};
use crate::protocol::{ConnectionHandle, Endpoint, ProtocolPlugin, SharedTransport};
use crate::protocols::common::{check_protocol, parse_addresses, ConnectionTable};

/// Protocol tag served by [`OpcUaPlugin`]
pub const PROTOCOL: &str = "opcua";

const URL_SCHEME: &str = "opc.tcp://";

/// Message security mode requested from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// No signing or encryption
    None,
    /// Messages are signed
    Sign,
    /// Messages are signed and encrypted
    SignAndEncrypt,
}

impl FromStr for SecurityMode {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "None" => Ok(SecurityMode::None),
            "Sign" => Ok(SecurityMode::Sign),
            "SignAndEncrypt" => Ok(SecurityMode::SignAndEncrypt),
            other => Err(DeviceError::config(format!(
                "security_mode '{}' must be None, Sign or SignAndEncrypt",
                other
            ))),
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SecurityMode::None => "None",
            SecurityMode::Sign => "Sign",
            SecurityMode::SignAndEncrypt => "SignAndEncrypt",
        };
        f.write_str(s)
    }
}

/// NodeId identifier part
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// `i=`
    Numeric(u32),
    /// `s=`
    String(String),
    /// `g=`
    Guid(Uuid),
    /// `b=`
    Opaque(String),
}

/// A parsed OPC-UA NodeId
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    /// Namespace index
    pub namespace: u16,
    /// Identifier within the namespace
    pub identifier: Identifier,
}

impl FromStr for NodeId {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, rest) = rest
                    .split_once(';')
                    .ok_or_else(|| DeviceError::config(format!("NodeId '{}' lacks ';'", s)))?;
                let ns = ns
                    .parse::<u16>()
                    .map_err(|_| DeviceError::config(format!("bad namespace in NodeId '{}'", s)))?;
                (ns, rest)
            }
            None => (0, s),
        };

        let (kind, value) = rest
            .split_once('=')
            .ok_or_else(|| DeviceError::config(format!("NodeId '{}' lacks an identifier", s)))?;
        if value.is_empty() {
            return Err(DeviceError::config(format!("NodeId '{}' has an empty identifier", s)));
        }

        let identifier = match kind {
            "i" => Identifier::Numeric(
                value
                    .parse()
                    .map_err(|_| DeviceError::config(format!("bad numeric NodeId '{}'", s)))?,
            ),
            "s" => Identifier::String(value.to_string()),
            "g" => Identifier::Guid(
                Uuid::parse_str(value)
                    .map_err(|_| DeviceError::config(format!("bad guid NodeId '{}'", s)))?,
            ),
            "b" => Identifier::Opaque(value.to_string()),
            other => {
                return Err(DeviceError::config(format!(
                    "unknown NodeId identifier type '{}'",
                    other
                )))
            }
        };

        Ok(Self { namespace, identifier })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};", self.namespace)?;
        match &self.identifier {
            Identifier::Numeric(v) => write!(f, "i={}", v),
            Identifier::String(v) => write!(f, "s={}", v),
            Identifier::Guid(v) => write!(f, "g={}", v),
            Identifier::Opaque(v) => write!(f, "b={}", v),
        }
    }
}

/// OPC-UA client plugin
#[derive(Debug)]
pub struct OpcUaPlugin {
    table: ConnectionTable,
}

impl OpcUaPlugin {
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
        let url = descriptor
            .param_string("endpoint_url")
            .map(|u| u.trim().to_string())
            .filter(|u| u.len() > URL_SCHEME.len() && u.starts_with(URL_SCHEME))
            .ok_or_else(|| {
                DeviceError::config(format!(
                    "device '{}' needs an 'endpoint_url' starting with {}",
                    descriptor.name, URL_SCHEME
                ))
            })?;

        let security = match descriptor.param_string("security_mode") {
            Some(mode) => mode.parse::<SecurityMode>()?,
            None => SecurityMode::None,
        };

        Ok(Endpoint::new(PROTOCOL, url).with_option("security_mode", security))
    }

    fn addresses(descriptor: &DeviceDescriptor) -> Result<Vec<String>> {
        Ok(parse_addresses(descriptor, NodeId::from_str)?
            .into_iter()
            .map(|n| n.to_string())
            .collect())
    }
}

#[async_trait]
impl ProtocolPlugin for OpcUaPlugin {
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
