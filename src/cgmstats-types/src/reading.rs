use chrono::{DateTime, TimeZone, Utc};

/// A single sensor glucose value.
///
/// `value` is in mg/dL and `timestamp_ms` is milliseconds since the unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    pub timestamp_ms: i64,
    pub device: String,
}

impl Reading {
    pub fn new(value: f64, timestamp_ms: i64, device: impl Into<String>) -> Self {
        Self {
            value,
            timestamp_ms,
            device: device.into(),
        }
    }

    pub fn time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    pub fn time_in<Z: TimeZone>(&self, zone: &Z) -> Option<DateTime<Z>> {
        self.time_utc().map(|t| t.with_timezone(zone))
    }
}
