use std::collections::BTreeMap;

use chrono::{FixedOffset, NaiveDate};
use cgmstats_types::Reading;
use serde::Serialize;

/// Mean glucose for one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyAverage {
    pub date: NaiveDate,
    pub avg_glucose: f64,
    pub count: usize,
}

impl DailyAverage {
    /// Groups readings by calendar day in `offset`, ordered by day.
    pub fn from_readings(readings: &[Reading], offset: FixedOffset) -> Vec<DailyAverage> {
        let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
        for reading in readings {
            let Some(time) = reading.time_in(&offset) else {
                continue;
            };
            let (sum, count) = days.entry(time.date_naive()).or_default();
            *sum += reading.value;
            *count += 1;
        }

        days.into_iter()
            .map(|(date, (sum, count))| DailyAverage {
                date,
                avg_glucose: sum / count as f64,
                count,
            })
            .collect()
    }
}
