/*!
 * Quality tagging.
 *
 * When live data cannot be produced, consumers still receive one record per
 * configured point per cycle: a `Bad` placeholder carrying a quality code.
 */
use edgelink_core::clock::SharedClock;

use crate::datapoint::{DataPoint, QualityCode};
use crate::descriptor::DeviceDescriptor;
use crate::error::DeviceError;

/// Map a failure message to a quality code.
///
/// Matching is a case-insensitive substring search, checked in a fixed order:
/// "timeout", "connection", "not open", "permission".
pub fn classify_message(message: &str) -> QualityCode {
    let message = message.to_lowercase();
    if message.contains("timeout") {
        QualityCode::Timeout
    } else if message.contains("connection") {
        QualityCode::ConnectionError
    } else if message.contains("not open") {
        QualityCode::DeviceOffline
    } else if message.contains("permission") {
        QualityCode::PermissionDenied
    } else {
        QualityCode::UnknownError
    }
}

/// Map a device error to a quality code using its underlying message
pub fn classify_error(error: &DeviceError) -> QualityCode {
    classify_message(&error.detail())
}

/// Builds placeholder points stamped by the adapter's clock
#[derive(Debug, Clone)]
pub struct QualityTagger {
    clock: SharedClock,
}

impl QualityTagger {
    /// Create a tagger using `clock` for timestamps
    pub fn new(clock: SharedClock) -> Self {
        Self { clock }
    }

    /// One `Bad` point per configured data point, all with `code`
    pub fn placeholders(&self, descriptor: &DeviceDescriptor, code: QualityCode) -> Vec<DataPoint> {
        let timestamp = self.clock.now();
        descriptor
            .data_points
            .iter()
            .map(|point| {
                DataPoint::bad(
                    descriptor.name.as_str(),
                    point.name.as_str(),
                    point.unit.clone(),
                    code,
                    timestamp,
                )
            })
            .collect()
    }

    /// Placeholders for a device that is not connected
    pub fn offline(&self, descriptor: &DeviceDescriptor) -> Vec<DataPoint> {
        self.placeholders(descriptor, QualityCode::DeviceOffline)
    }

    /// Placeholders for a failed read, with the code derived from the error
    pub fn for_error(&self, descriptor: &DeviceDescriptor, error: &DeviceError) -> Vec<DataPoint> {
        self.placeholders(descriptor, classify_error(error))
    }
}
