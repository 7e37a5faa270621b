use cgmstats_types::{A1cMeasurement, StatsResult};
use serde::Serialize;

/// Lab A1c set against the CGM-derived estimates for the preceding window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct A1cComparison {
    pub a1c: f64,
    pub gmi: f64,
    /// `gmi - a1c`; positive when the CGM overestimates the lab value.
    pub gmi_gap: f64,
    /// ADAG estimated A1c, `(mean + 43.9) / 28.3`.
    pub adag_estimate: f64,
}

impl A1cComparison {
    pub fn new(measurement: &A1cMeasurement, stats: &StatsResult) -> Self {
        Self {
            a1c: measurement.value,
            gmi: stats.gmi,
            gmi_gap: stats.gmi - measurement.value,
            adag_estimate: Self::adag(stats.avg_glucose),
        }
    }

    pub fn adag(avg_glucose: f64) -> f64 {
        (avg_glucose + 43.9) / 28.3
    }
}
