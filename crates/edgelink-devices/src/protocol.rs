/*!
 * Protocol plugin contract for EdgeLink.
 *
 * The adapter is polymorphic over [`ProtocolPlugin`]; it never sees a concrete
 * protocol type. Plugins in turn talk to the wire through a [`FieldTransport`],
 * which is where register maps, CAN frames and OPC-UA sessions live.
 */
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use edgelink_core::types::{Id, Value};

use crate::datapoint::DataPoint;
use crate::descriptor::DeviceDescriptor;
use crate::error::Result;

/// Where a transport should connect to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Protocol tag of the owning plugin
    pub protocol: String,
    /// Transport address ("10.0.0.5:502", "can0", "opc.tcp://...")
    pub address: String,
    /// Protocol-specific options
    pub options: BTreeMap<String, String>,
}

impl Endpoint {
    /// Create an endpoint without options
    pub fn new<P: Into<String>, A: Into<String>>(protocol: P, address: A) -> Self {
        Self {
            protocol: protocol.into(),
            address: address.into(),
            options: BTreeMap::new(),
        }
    }

    /// Add an option
    pub fn with_option<K: Into<String>, V: ToString>(mut self, key: K, value: V) -> Self {
        self.options.insert(key.into(), value.to_string());
        self
    }

    /// Gets an option
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.address)
    }
}

/// An open connection to one device, as returned by a plugin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionHandle {
    /// Unique id of this connection
    pub id: Id,
    /// Device the connection belongs to
    pub device_name: String,
    /// Protocol tag
    pub protocol: String,
    /// Transport endpoint
    pub endpoint: Endpoint,
    /// When the connection was established
    pub connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    /// Create a handle for a freshly opened connection
    pub fn new<D: Into<String>>(device_name: D, endpoint: Endpoint, connected_at: DateTime<Utc>) -> Self {
        Self {
            id: Id::new(),
            device_name: device_name.into(),
            protocol: endpoint.protocol.clone(),
            endpoint,
            connected_at,
        }
    }
}

/// Wire-level access to field devices.
///
/// Values are returned in the order of the requested addresses.
#[async_trait]
pub trait FieldTransport: Send + Sync + Debug {
    /// Open the transport to an endpoint
    async fn open(&self, endpoint: &Endpoint) -> Result<()>;

    /// Read raw values for the given protocol addresses
    async fn read(&self, endpoint: &Endpoint, addresses: &[String]) -> Result<Vec<Value>>;

    /// Close the transport to an endpoint
    async fn close(&self, endpoint: &Endpoint) -> Result<()>;
}

/// A shareable transport
pub type SharedTransport = Arc<dyn FieldTransport>;

/// The capability set every protocol implements.
///
/// Connect and read failures send the device into backoff; validation
/// failures are fatal to the device for the run; disconnect failures are only
/// logged by the caller.
#[async_trait]
pub trait ProtocolPlugin: Send + Sync + Debug {
    /// The protocol tag this plugin serves
    fn protocol_name(&self) -> &str;

    /// Whether the plugin serves a descriptor's protocol tag
    fn handles(&self, protocol: &str) -> bool {
        self.protocol_name().eq_ignore_ascii_case(protocol.trim())
    }

    /// Adapter-level readiness, run once per `start()`
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Check that a descriptor is structurally valid for this protocol
    fn validate_device_config(&self, descriptor: &DeviceDescriptor) -> Result<()>;

    /// Open a connection to the device
    async fn connect_device(&self, descriptor: &DeviceDescriptor) -> Result<ConnectionHandle>;

    /// Close the connection to the device; closing an unknown device is not an error
    async fn disconnect_device(&self, device_name: &str) -> Result<()>;

    /// Read every configured data point of the device
    async fn read_device_data(
        &self,
        device_name: &str,
        descriptor: &DeviceDescriptor,
    ) -> Result<Vec<DataPoint>>;
}

/// A shareable protocol plugin
pub type SharedPlugin = Arc<dyn ProtocolPlugin>;
