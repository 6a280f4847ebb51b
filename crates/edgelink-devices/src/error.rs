/*!
 * Error type for device and protocol operations.
 */
use thiserror::Error;

use edgelink_core::error::Error as CoreError;

/// Error type for device operations
///
/// The first four variants are the per-device failure taxonomy: a `Config`
/// error is fatal to one device, `Connect` and `Read` errors send the device
/// into backoff, and `Disconnect` errors are only ever logged.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The descriptor is structurally invalid for the protocol
    #[error("Configuration error: {0}")]
    Config(String),

    /// Establishing the connection failed
    #[error("Connect failed: {0}")]
    Connect(String),

    /// A read cycle failed
    #[error("Read failed: {0}")]
    Read(String),

    /// Tearing down the connection failed
    #[error("Disconnect failed: {0}")]
    Disconnect(String),

    /// The device has no open connection
    #[error("Device not open: {0}")]
    NotConnected(String),

    /// No plugin handles this protocol
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// The descriptor set could not be turned into a registry
    #[error("Registry error: {0}")]
    Registry(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// Create a new configuration error
    pub fn config<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Config(msg.as_ref().to_string())
    }

    /// Create a new connect error
    pub fn connect<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Connect(msg.as_ref().to_string())
    }

    /// Create a new read error
    pub fn read<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Read(msg.as_ref().to_string())
    }

    /// Create a new disconnect error
    pub fn disconnect<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Disconnect(msg.as_ref().to_string())
    }

    /// The underlying failure message, without the variant prefix.
    ///
    /// Quality classification works on this text so that the wording of a
    /// variant's display prefix can never change the resulting quality code.
    pub fn detail(&self) -> String {
        match self {
            DeviceError::Config(msg)
            | DeviceError::Connect(msg)
            | DeviceError::Read(msg)
            | DeviceError::Disconnect(msg)
            | DeviceError::UnsupportedProtocol(msg)
            | DeviceError::Registry(msg) => msg.clone(),
            DeviceError::NotConnected(device) => format!("device {} is not open", device),
            DeviceError::Core(e) => e.to_string(),
        }
    }

    /// Re-label any error raised while connecting as a connect error
    pub fn into_connect(self) -> Self {
        match self {
            DeviceError::Connect(_) | DeviceError::Config(_) => self,
            other => DeviceError::Connect(other.detail()),
        }
    }

    /// Re-label any error raised while reading as a read error
    pub fn into_read(self) -> Self {
        match self {
            DeviceError::Read(_) | DeviceError::NotConnected(_) => self,
            other => DeviceError::Read(other.detail()),
        }
    }

    /// Re-label any error raised while disconnecting as a disconnect error
    pub fn into_disconnect(self) -> Self {
        match self {
            DeviceError::Disconnect(_) => self,
            other => DeviceError::Disconnect(other.detail()),
        }
    }
}
