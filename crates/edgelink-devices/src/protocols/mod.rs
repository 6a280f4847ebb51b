/*!
 * Protocol plugin implementations.
 */

pub mod common;

#[cfg(feature = "modbus")]
pub mod modbus;

#[cfg(feature = "canbus")]
pub mod canbus;

#[cfg(feature = "opcua")]
pub mod opcua;

#[cfg(any(test, feature = "simulated"))]
pub mod simulated;
