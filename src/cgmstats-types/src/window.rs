use std::fmt::Display;

use chrono::NaiveDate;

/// An inclusive date range evaluated as one unit of statistics.
///
/// `length_days` is the nominal length used for completeness, which is not
/// always the inclusive span between `start` and `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub length_days: u32,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate, length_days: u32) -> Self {
        debug_assert!(start <= end, "window start after end");
        Self {
            start,
            end,
            length_days,
        }
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]/{}d", self.start, self.end, self.length_days)
    }
}
