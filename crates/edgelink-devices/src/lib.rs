/*!
 * EdgeLink Devices
 *
 * This crate provides the device model shared by every protocol: descriptors,
 * the device registry, quality-tagged data points, the protocol plugin
 * contract and the Modbus, CAN-bus and OPC-UA plugins.
 */

#![warn(missing_docs)]

// Re-export core types
pub use edgelink_core::prelude;

pub mod datapoint;
pub mod descriptor;
pub mod error;
pub mod protocol;
pub mod protocols;
pub mod quality;
pub mod registry;

pub use datapoint::{DataPoint, Quality, QualityCode};
pub use descriptor::{DataPointDescriptor, DeviceDescriptor, Scaling};
pub use error::{DeviceError, Result};
pub use protocol::{
    ConnectionHandle, Endpoint, FieldTransport, ProtocolPlugin, SharedPlugin, SharedTransport,
};
pub use quality::{classify_error, classify_message, QualityTagger};
pub use registry::{DeviceRegistry, SharedDeviceRegistry};

/// EdgeLink devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> std::result::Result<(), edgelink_core::error::Error> {
    tracing::info!(
        "EdgeLink Devices {} initialized, protocols: {}",
        VERSION,
        available_protocols().join(", ")
    );
    Ok(())
}

/// Information about available protocols
pub fn available_protocols() -> Vec<&'static str> {
    let mut names = Vec::new();

    #[cfg(feature = "modbus")]
    names.push(crate::protocols::modbus::PROTOCOL);

    #[cfg(feature = "canbus")]
    names.push(crate::protocols::canbus::PROTOCOL);

    #[cfg(feature = "opcua")]
    names.push(crate::protocols::opcua::PROTOCOL);

    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_protocols() {
        let protocols = available_protocols();
        assert_eq!(protocols, vec!["modbus", "canbus", "opcua"]);
        assert!(init().is_ok());
    }
}
