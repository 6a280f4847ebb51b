/*!
 * Per-device connection state machine.
 *
 * ```text
 * Uninitialized -> Connecting -> Connected -> RetryScheduled -> Connecting -> ...
 *                      |                                        any -> Stopped
 *                      +-> Faulted (descriptor rejected)
 * ```
 *
 * Each device owns one machine; its bookkeeping is only changed through the
 * transition methods below.
 */
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use edgelink_devices::DeviceDescriptor;

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};

/// Link state of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    /// Not yet started, or disabled
    Uninitialized,
    /// A connect attempt is in flight
    Connecting,
    /// Connected and polling
    Connected,
    /// Waiting for the next connect attempt
    RetryScheduled,
    /// The adapter stopped
    Stopped,
    /// The descriptor was rejected; no attempts this run
    Faulted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Uninitialized => "UNINITIALIZED",
            LinkState::Connecting => "CONNECTING",
            LinkState::Connected => "CONNECTED",
            LinkState::RetryScheduled => "RETRY_SCHEDULED",
            LinkState::Stopped => "STOPPED",
            LinkState::Faulted => "FAULTED",
        };
        f.write_str(s)
    }
}

/// Connection bookkeeping of one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    /// Whether the device is connected
    pub connected: bool,
    /// When the last connect attempt started
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Failures since the last success
    pub consecutive_error_count: u32,
    /// Nominal delay of the most recent retry, or the initial delay
    pub current_backoff_delay_ms: u64,
}

/// Read-only projection of a device's state for consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    /// Device name
    pub device_name: String,
    /// Protocol tag
    pub protocol: String,
    /// Whether the adapter manages the device
    pub enabled: bool,
    /// Current link state
    pub state: LinkState,
    /// Whether the device is connected
    pub connected: bool,
    /// When the last successful poll completed
    pub last_poll_at: Option<DateTime<Utc>>,
    /// Failures since the last success
    pub error_count: u32,
    /// Most recent error message
    pub last_error: Option<String>,
    /// Nominal delay of the most recent retry, or the initial delay
    pub current_backoff_delay_ms: u64,
}

/// A retry decided by a failure transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    /// Consecutive failure count, starting at 1
    pub attempt: u32,
    /// Un-jittered delay for this attempt
    pub nominal_delay_ms: u64,
}

/// The state machine of one device
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    device_name: String,
    protocol: String,
    enabled: bool,
    state: LinkState,
    connection: ConnectionState,
    last_poll_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    policy: BackoffPolicy,
}

impl ConnectionStateMachine {
    /// Create an uninitialized machine for a device
    pub fn new(descriptor: &DeviceDescriptor, policy: BackoffPolicy) -> Self {
        Self {
            device_name: descriptor.name.clone(),
            protocol: descriptor.protocol.clone(),
            enabled: descriptor.enabled,
            state: LinkState::Uninitialized,
            connection: ConnectionState {
                connected: false,
                last_attempt_at: None,
                consecutive_error_count: 0,
                current_backoff_delay_ms: policy.initial_delay_ms(),
            },
            last_poll_at: None,
            last_error: None,
            policy,
        }
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Connection bookkeeping
    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    /// Whether the device is connected
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// `Uninitialized | RetryScheduled -> Connecting`
    pub fn begin_connect(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard(&[LinkState::Uninitialized, LinkState::RetryScheduled], LinkState::Connecting)?;
        self.state = LinkState::Connecting;
        self.connection.last_attempt_at = Some(now);
        Ok(())
    }

    /// `Connecting -> Connected`, resetting the failure counters
    pub fn connected(&mut self) -> Result<()> {
        self.guard(&[LinkState::Connecting], LinkState::Connected)?;
        self.state = LinkState::Connected;
        self.connection.connected = true;
        self.reset_counters();
        Ok(())
    }

    /// Record a successful poll of a connected device
    pub fn poll_succeeded(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != LinkState::Connected {
            return Err(Error::state_machine(format!(
                "{}: poll recorded while {}",
                self.device_name, self.state
            )));
        }
        self.last_poll_at = Some(now);
        self.reset_counters();
        Ok(())
    }

    /// `Connecting | Connected -> RetryScheduled` after a connect or read failure
    pub fn failed<S: Into<String>>(&mut self, error: S) -> Result<RetryPlan> {
        self.guard(&[LinkState::Connecting, LinkState::Connected], LinkState::RetryScheduled)?;
        self.state = LinkState::RetryScheduled;
        self.connection.connected = false;
        self.connection.consecutive_error_count =
            self.connection.consecutive_error_count.saturating_add(1);
        let attempt = self.connection.consecutive_error_count;
        let nominal_delay_ms = self.policy.nominal_delay_ms(attempt);
        self.connection.current_backoff_delay_ms = nominal_delay_ms;
        self.last_error = Some(error.into());
        Ok(RetryPlan {
            attempt,
            nominal_delay_ms,
        })
    }

    /// Any state except `Stopped` -> `Faulted` when the descriptor is rejected
    pub fn fault<S: Into<String>>(&mut self, error: S) -> Result<()> {
        if self.state == LinkState::Stopped {
            return Err(Error::state_machine(format!(
                "{}: cannot fault a stopped device",
                self.device_name
            )));
        }
        self.state = LinkState::Faulted;
        self.connection.connected = false;
        self.connection.consecutive_error_count =
            self.connection.consecutive_error_count.saturating_add(1);
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Any state -> `Stopped`
    pub fn stop(&mut self) {
        self.state = LinkState::Stopped;
        self.connection.connected = false;
    }

    /// The consumer-facing projection
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            device_name: self.device_name.clone(),
            protocol: self.protocol.clone(),
            enabled: self.enabled,
            state: self.state,
            connected: self.connection.connected,
            last_poll_at: self.last_poll_at,
            error_count: self.connection.consecutive_error_count,
            last_error: self.last_error.clone(),
            current_backoff_delay_ms: self.connection.current_backoff_delay_ms,
        }
    }

    fn reset_counters(&mut self) {
        self.connection.consecutive_error_count = 0;
        self.connection.current_backoff_delay_ms = self.policy.initial_delay_ms();
    }

    fn guard(&self, from: &[LinkState], to: LinkState) -> Result<()> {
        if from.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::state_machine(format!(
                "{}: invalid transition {} -> {}",
                self.device_name, self.state, to
            )))
        }
    }
}
