use std::collections::BTreeMap;

use chrono::NaiveDate;
use cgmstats_types::{CgmType, Reading};
use serde::Serialize;

/// Counts hypoglycemic events: runs of consecutive readings below a
/// threshold that last long enough for the sensor type.
///
/// Readings closer than [`HypoEventCounter::MIN_SPACING_MS`] to the last kept
/// reading are dropped first, so back-filled duplicates do not lengthen runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HypoEventCounter {
    /// mg/dL; readings strictly below count toward a run.
    pub threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HypoEvents {
    pub total: usize,
    pub per_day: BTreeMap<NaiveDate, usize>,
    /// Values that survived de-duplication, across all days.
    pub values: Vec<f64>,
}

impl Default for HypoEventCounter {
    fn default() -> Self {
        // 3.5 mmol/L
        Self { threshold: 63.0 }
    }
}

impl HypoEventCounter {
    pub const MIN_SPACING_MS: i64 = 3 * 60 * 1000;

    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    fn min_run(cgm_type: CgmType) -> usize {
        match cgm_type {
            CgmType::Libre => 2,
            CgmType::Dexcom => 3,
        }
    }

    pub fn count(&self, days: &BTreeMap<NaiveDate, Vec<Reading>>, cgm_type: CgmType) -> HypoEvents {
        let min_run = Self::min_run(cgm_type);
        let mut events = HypoEvents::default();

        for (date, readings) in days {
            let kept = Self::dedup(readings);
            let count = self.count_runs(&kept, min_run);

            events.total += count;
            events.per_day.insert(*date, count);
            events.values.extend(kept.iter().map(|r| r.value));
        }

        events
    }

    fn dedup(readings: &[Reading]) -> Vec<&Reading> {
        let mut kept: Vec<&Reading> = Vec::with_capacity(readings.len());
        for reading in readings {
            match kept.last() {
                Some(last) if reading.timestamp_ms - last.timestamp_ms < Self::MIN_SPACING_MS => {}
                _ => kept.push(reading),
            }
        }
        kept
    }

    fn count_runs(&self, readings: &[&Reading], min_run: usize) -> usize {
        let (count, run) = readings.iter().fold((0, 0), |(count, run), r| {
            if r.value < self.threshold {
                (count, run + 1)
            } else if run >= min_run {
                (count + 1, 0)
            } else {
                (count, 0)
            }
        });

        if run >= min_run { count + 1 } else { count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE_MS: i64 = 60 * 1000;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 8).unwrap()
    }

    fn five_minute_series(values: &[f64]) -> Vec<Reading> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Reading::new(v, i as i64 * 5 * MINUTE_MS, "share2"))
            .collect()
    }

    fn single_day(readings: Vec<Reading>) -> BTreeMap<NaiveDate, Vec<Reading>> {
        BTreeMap::from([(day(), readings)])
    }

    #[test]
    fn dexcom_needs_three_low_readings() {
        let days = single_day(five_minute_series(&[
            100.0, 60.0, 60.0, 100.0, // run of 2: not an event
            60.0, 60.0, 60.0, 100.0, // run of 3: event
        ]));
        let events = HypoEventCounter::default().count(&days, CgmType::Dexcom);
        assert_eq!(events.total, 1);
        assert_eq!(events.per_day[&day()], 1);
    }

    #[test]
    fn libre_needs_two_low_readings() {
        let days = single_day(five_minute_series(&[100.0, 60.0, 60.0, 100.0]));
        let events = HypoEventCounter::default().count(&days, CgmType::Libre);
        assert_eq!(events.total, 1);
    }

    #[test]
    fn run_at_end_of_day_counts() {
        let days = single_day(five_minute_series(&[100.0, 50.0, 50.0, 50.0]));
        let events = HypoEventCounter::default().count(&days, CgmType::Dexcom);
        assert_eq!(events.total, 1);
    }

    #[test]
    fn close_duplicates_are_dropped() {
        let readings = vec![
            Reading::new(50.0, 0, ""),
            Reading::new(50.0, MINUTE_MS, ""),
            Reading::new(50.0, 2 * MINUTE_MS, ""),
            Reading::new(100.0, 5 * MINUTE_MS, ""),
        ];
        let events = HypoEventCounter::default().count(&single_day(readings), CgmType::Dexcom);
        // only one low reading survives, so no run of three
        assert_eq!(events.total, 0);
        assert_eq!(events.values, vec![50.0, 100.0]);
    }

    #[test]
    fn threshold_is_exclusive() {
        let days = single_day(five_minute_series(&[63.0, 63.0, 63.0]));
        let events = HypoEventCounter::default().count(&days, CgmType::Dexcom);
        assert_eq!(events.total, 0);
    }
}
