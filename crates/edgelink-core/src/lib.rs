/*!
 * EdgeLink Core
 *
 * This crate provides the ambient functionality shared by the EdgeLink crates:
 * errors, layered configuration, logging, the typed event bus, the clock
 * abstraction and small async helpers.
 */

#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use anyhow;
    pub use chrono;
    pub use futures;
    pub use serde;
    pub use tokio;
    pub use tracing;
    pub use uuid;
}

/// EdgeLink core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization: installs the default tracing subscriber
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("EdgeLink Core {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
