/*!
 * Quality-tagged measurement records.
 */
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use edgelink_core::types::Value;

/// Whether a data point carries a live value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quality {
    /// Live value read from the device
    Good,
    /// No value could be produced
    Bad,
}

/// Coarse reason a data point has no live value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityCode {
    /// Nothing to report
    None,
    /// The device did not answer in time
    Timeout,
    /// The link to the device failed
    ConnectionError,
    /// The device is not connected
    DeviceOffline,
    /// The device refused access
    PermissionDenied,
    /// Any other failure
    UnknownError,
}

impl fmt::Display for QualityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityCode::None => "NONE",
            QualityCode::Timeout => "TIMEOUT",
            QualityCode::ConnectionError => "CONNECTION_ERROR",
            QualityCode::DeviceOffline => "DEVICE_OFFLINE",
            QualityCode::PermissionDenied => "PERMISSION_DENIED",
            QualityCode::UnknownError => "UNKNOWN_ERROR",
        };
        f.write_str(s)
    }
}

/// One measurement produced for a device during a poll cycle.
///
/// The value is `Null` exactly when the quality is `Bad`; the constructors are
/// the only way to build a point, and they keep that pairing intact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    device_name: String,
    point_name: String,
    value: Value,
    unit: Option<String>,
    timestamp: DateTime<Utc>,
    quality: Quality,
    quality_code: QualityCode,
}

impl DataPoint {
    /// A live reading. A `Null` value cannot be good and is recorded as an
    /// `UnknownError` placeholder instead.
    pub fn good<D, P>(
        device_name: D,
        point_name: P,
        value: Value,
        unit: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self
    where
        D: Into<String>,
        P: Into<String>,
    {
        if value.is_null() {
            return Self::bad(device_name, point_name, unit, QualityCode::UnknownError, timestamp);
        }
        Self {
            device_name: device_name.into(),
            point_name: point_name.into(),
            value,
            unit,
            timestamp,
            quality: Quality::Good,
            quality_code: QualityCode::None,
        }
    }

    /// A placeholder for a point that could not be read
    pub fn bad<D, P>(
        device_name: D,
        point_name: P,
        unit: Option<String>,
        quality_code: QualityCode,
        timestamp: DateTime<Utc>,
    ) -> Self
    where
        D: Into<String>,
        P: Into<String>,
    {
        Self {
            device_name: device_name.into(),
            point_name: point_name.into(),
            value: Value::Null,
            unit,
            timestamp,
            quality: Quality::Bad,
            quality_code,
        }
    }

    /// Name of the device the point belongs to
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Name of the point
    pub fn point_name(&self) -> &str {
        &self.point_name
    }

    /// The value, `Null` for bad points
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Engineering unit
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// When the point was produced
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Quality flag
    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Reason for bad quality, `None` for good points
    pub fn quality_code(&self) -> QualityCode {
        self.quality_code
    }

    /// Whether the point carries a live value
    pub fn is_good(&self) -> bool {
        self.quality == Quality::Good
    }
}
