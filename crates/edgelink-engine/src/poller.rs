/*!
 * Poll cycles.
 *
 * A cycle turns one device read into the points consumers will see. Whatever
 * happens, a cycle yields one point per configured data point: live values on
 * success, BAD placeholders otherwise.
 */
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use edgelink_core::clock::{deadline, SharedClock};
use edgelink_core::utils::catch_panic;
use edgelink_devices::{
    DataPoint, DeviceDescriptor, DeviceError, QualityTagger, SharedPlugin,
};

/// What one poll cycle produced
#[derive(Debug)]
pub enum PollOutcome {
    /// The read succeeded
    Live(Vec<DataPoint>),
    /// The device was not connected; DEVICE_OFFLINE placeholders
    Offline(Vec<DataPoint>),
    /// The read failed; placeholders carry the classified quality code
    Failed {
        /// BAD placeholders for every configured point
        points: Vec<DataPoint>,
        /// The read failure
        error: DeviceError,
    },
}

impl PollOutcome {
    /// Points to publish for this cycle
    pub fn points(&self) -> &[DataPoint] {
        match self {
            PollOutcome::Live(points) | PollOutcome::Offline(points) => points,
            PollOutcome::Failed { points, .. } => points,
        }
    }
}

/// Runs poll cycles for one device
#[derive(Debug, Clone)]
pub struct Poller {
    plugin: SharedPlugin,
    descriptor: Arc<DeviceDescriptor>,
    tagger: QualityTagger,
    clock: SharedClock,
    read_timeout: Option<Duration>,
}

impl Poller {
    /// Create a poller for one device
    pub fn new(
        plugin: SharedPlugin,
        descriptor: Arc<DeviceDescriptor>,
        tagger: QualityTagger,
        clock: SharedClock,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            plugin,
            descriptor,
            tagger,
            clock,
            read_timeout,
        }
    }

    /// Run one cycle. A device that is not connected is not read.
    pub async fn cycle(&self, connected: bool) -> PollOutcome {
        if !connected {
            trace!("Device {} offline, emitting placeholders", self.descriptor.name);
            return PollOutcome::Offline(self.tagger.offline(&self.descriptor));
        }

        let read = catch_panic(
            self.plugin
                .read_device_data(&self.descriptor.name, &self.descriptor),
            |message| DeviceError::read(format!("plugin panicked: {}", message)),
        );
        let result = deadline(&*self.clock, self.read_timeout, read, || {
            DeviceError::read("read timeout")
        })
        .await;

        match result {
            Ok(points) => {
                trace!("Read {} points from {}", points.len(), self.descriptor.name);
                PollOutcome::Live(points)
            }
            Err(error) => {
                let error = error.into_read();
                debug!("Read from {} failed: {}", self.descriptor.name, error);
                PollOutcome::Failed {
                    points: self.tagger.for_error(&self.descriptor, &error),
                    error,
                }
            }
        }
    }
}
