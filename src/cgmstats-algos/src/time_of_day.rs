use std::collections::BTreeMap;

use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone};
use cgmstats_types::Reading;

/// Keeps readings whose local time of day falls in `[start, end)`.
///
/// A window whose start is after its end wraps past midnight. Local time is
/// taken per reading, so a region zone follows daylight saving.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeOfDayFilter<Z = FixedOffset> {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub zone: Z,
}

impl<Z: TimeZone> TimeOfDayFilter<Z> {
    pub fn new(start: NaiveTime, end: NaiveTime, zone: Z) -> Self {
        Self { start, end, zone }
    }

    /// Whole-hour window, e.g. `from_hours(7, 13, zone)` for 07:00 to 13:00.
    pub fn from_hours(start_hour: u32, end_hour: u32, zone: Z) -> Option<Self> {
        let start = NaiveTime::from_hms_opt(start_hour % 24, 0, 0)?;
        let end = NaiveTime::from_hms_opt(end_hour % 24, 0, 0)?;
        Some(Self::new(start, end, zone))
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    /// Matching readings grouped by local calendar day, each group in
    /// the order it was given.
    pub fn group_by_day(&self, readings: &[Reading]) -> BTreeMap<NaiveDate, Vec<Reading>> {
        let mut days: BTreeMap<NaiveDate, Vec<Reading>> = BTreeMap::new();
        for reading in readings {
            let Some(local) = reading.time_in(&self.zone) else {
                continue;
            };
            if self.contains(local.time()) {
                days.entry(local.date_naive()).or_default().push(reading.clone());
            }
        }
        days
    }
}
