/*!
 * EdgeLink Engine
 *
 * This crate provides the protocol adapter: the per-device connection state
 * machine, poll scheduling, exponential backoff with jitter and the event
 * surface consumers subscribe to.
 */

#![warn(missing_docs)]

// Re-export core types
pub use edgelink_core::prelude;

pub mod adapter;
pub mod backoff;
pub mod error;
pub mod events;
pub mod poller;
pub mod state;
mod worker;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use adapter::{AdapterSettings, ProtocolAdapter, ProtocolAdapterBuilder};
pub use backoff::BackoffPolicy;
pub use error::{Error, Result};
pub use events::{AdapterEvent, AdapterEventBus};
pub use poller::{PollOutcome, Poller};
pub use state::{ConnectionState, ConnectionStateMachine, DeviceStatus, LinkState, RetryPlan};
pub use worker::SharedMachine;

/// EdgeLink engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine
pub fn init() -> Result<()> {
    tracing::info!("EdgeLink Engine {} initialized", VERSION);
    Ok(())
}
