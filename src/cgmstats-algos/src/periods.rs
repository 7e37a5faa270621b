use chrono::{NaiveDate, TimeDelta};
use cgmstats_types::{A1cMeasurement, TimeWindow};

/// Expands an anchor date and signed day offsets into evaluation windows.
///
/// Negative offsets give lookback windows that all end the day before the
/// anchor. Non-negative offsets give forward windows chained end to start:
/// the first begins on the anchor, each later one begins the day after the
/// previous forward window ended and runs for its offset in days.
pub struct PeriodPlanner;

#[derive(Default)]
struct Plan {
    windows: Vec<TimeWindow>,
    next_forward_start: Option<NaiveDate>,
}

impl Plan {
    /// Offsets beyond the calendar's range are skipped.
    fn step(mut self, anchor: NaiveDate, offset: i64) -> Self {
        let (Some(days), Ok(length_days)) = (
            TimeDelta::try_days(offset),
            u32::try_from(offset.unsigned_abs().max(1)),
        ) else {
            return self;
        };

        if offset < 0 {
            let start = anchor.checked_add_signed(days);
            let end = anchor.pred_opt();
            if let (Some(start), Some(end)) = (start, end) {
                self.windows.push(TimeWindow::new(start, end, length_days));
            }
            return self;
        }

        let start = self.next_forward_start.unwrap_or(anchor);
        let Some(end) = start.checked_add_signed(days) else {
            return self;
        };

        self.windows.push(TimeWindow::new(start, end, length_days));
        self.next_forward_start = end.succ_opt();
        self
    }
}

impl PeriodPlanner {
    /// Default offsets for anchored cohort runs.
    pub const DEFAULT_OFFSETS: [i64; 6] = [-30, 30, 60, 90, 180, 360];

    /// Windows in ascending offset order. A missing anchor or empty offset
    /// list yields no windows.
    pub fn plan(anchor: Option<NaiveDate>, offsets: &[i64]) -> Vec<TimeWindow> {
        let Some(anchor) = anchor else {
            return Vec::new();
        };

        let mut offsets = offsets.to_vec();
        offsets.sort_unstable();

        offsets
            .into_iter()
            .fold(Plan::default(), |plan, offset| plan.step(anchor, offset))
            .windows
    }
}

/// One lookback window of `days` ending on each measurement date.
pub fn a1c_windows(measurements: &[A1cMeasurement], days: u32) -> Vec<TimeWindow> {
    if days == 0 {
        return Vec::new();
    }

    measurements
        .iter()
        .filter_map(|m| {
            let start = m.date.checked_sub_signed(TimeDelta::days(i64::from(days)))?;
            Some(TimeWindow::new(start, m.date, days))
        })
        .collect()
}
