/*!
 * Adapter events.
 *
 * Within one device, events are published in causal order. There is no
 * ordering guarantee across devices.
 */
use serde::Serialize;

use edgelink_core::event::EventBus;
use edgelink_devices::DataPoint;

/// Everything an adapter tells its consumers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum AdapterEvent {
    /// The adapter started
    Started,
    /// The adapter stopped; always the last event of a run
    Stopped,
    /// One poll cycle's points, live or placeholder
    Data(Vec<DataPoint>),
    /// A device connected
    DeviceConnected(String),
    /// A device lost, or failed to establish, its connection
    DeviceDisconnected(String),
    /// A device failed
    DeviceError {
        /// Device name
        device: String,
        /// Failure message
        error: String,
    },
    /// A poll cycle produced live data
    DataReceived {
        /// Device name
        device: String,
        /// The live points
        points: Vec<DataPoint>,
    },
    /// A reconnect attempt was scheduled
    RetryScheduled {
        /// Device name
        device: String,
        /// Consecutive failure count
        attempt: u32,
        /// Delay before the attempt, jitter included
        delay_ms: u64,
    },
}

impl AdapterEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            AdapterEvent::Started => "started",
            AdapterEvent::Stopped => "stopped",
            AdapterEvent::Data(_) => "data",
            AdapterEvent::DeviceConnected(_) => "device-connected",
            AdapterEvent::DeviceDisconnected(_) => "device-disconnected",
            AdapterEvent::DeviceError { .. } => "device-error",
            AdapterEvent::DataReceived { .. } => "data-received",
            AdapterEvent::RetryScheduled { .. } => "retry-scheduled",
        }
    }

    /// The device the event concerns, if any
    pub fn device(&self) -> Option<&str> {
        match self {
            AdapterEvent::Started | AdapterEvent::Stopped => None,
            AdapterEvent::Data(points) => points.first().map(DataPoint::device_name),
            AdapterEvent::DeviceConnected(device) | AdapterEvent::DeviceDisconnected(device) => {
                Some(device.as_str())
            }
            AdapterEvent::DeviceError { device, .. }
            | AdapterEvent::DataReceived { device, .. }
            | AdapterEvent::RetryScheduled { device, .. } => Some(device.as_str()),
        }
    }

    /// Data points carried by the event
    pub fn points(&self) -> Option<&[DataPoint]> {
        match self {
            AdapterEvent::Data(points) | AdapterEvent::DataReceived { points, .. } => Some(points.as_slice()),
            _ => None,
        }
    }
}

/// The bus an adapter publishes on
pub type AdapterEventBus = EventBus<AdapterEvent>;
