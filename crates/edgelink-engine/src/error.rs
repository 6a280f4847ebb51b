/*!
 * Error types for the EdgeLink engine crate.
 *
 * Per-device failures never surface here: they become events and BAD-quality
 * data. Only adapter-level failures reach the caller of `start()`.
 */
use thiserror::Error;

/// Error type for EdgeLink engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// Adapter-level failure; aborts `start()`
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// A link state change the state machine does not allow
    #[error("State machine error: {0}")]
    StateMachine(String),

    /// Invalid adapter configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device error
    #[error("Device error: {0}")]
    Device(#[from] edgelink_devices::DeviceError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] edgelink_core::error::Error),
}

/// Result type for EdgeLink engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new adapter error
    pub fn adapter<S: AsRef<str>>(msg: S) -> Self {
        Error::Adapter(msg.as_ref().to_string())
    }

    /// Create a new state machine error
    pub fn state_machine<S: AsRef<str>>(msg: S) -> Self {
        Error::StateMachine(msg.as_ref().to_string())
    }

    /// Create a new configuration error
    pub fn config<S: AsRef<str>>(msg: S) -> Self {
        Error::Config(msg.as_ref().to_string())
    }
}
