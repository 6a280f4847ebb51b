/*!
 * Prelude module for EdgeLink Core.
 *
 * This module re-exports commonly used types and functions from the EdgeLink Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Id, Metadata, Value};

// Re-export event types
pub use crate::event::{EventBus, EventReceiver};

// Re-export clock types
pub use crate::clock::{deadline, Clock, FixedClock, SharedClock, SystemClock};

// Re-export config types
pub use crate::config::{AdapterConfig, BackoffConfig, Config, ConfigBuilder, SharedConfig};

// Re-export utility functions
pub use crate::utils::{catch_panic, millis_to_duration, nonzero_millis};

// Re-export logging macros
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
