use cgmstats_types::{CgmType, Reading, StatsResult};

use crate::{
    FluctuationCalculator,
    helpers::stats_math::{mean, percent, population_std_dev},
};

/// Glucose band limits in mg/dL.
///
/// These are the mmol/L consensus cut-offs (3.0, 3.9, 10.0, 13.9) converted
/// to mg/dL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeThresholds {
    pub very_low: f64,
    pub low: f64,
    pub high: f64,
    pub very_high: f64,
}

impl Default for RangeThresholds {
    fn default() -> Self {
        Self {
            very_low: 54.047,
            low: 70.261,
            high: 180.156,
            very_high: 250.417,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RangeCounts {
    very_low: usize,
    low: usize,
    high: usize,
    very_high: usize,
}

impl RangeThresholds {
    fn classify(&self, values: &[f64]) -> RangeCounts {
        values
            .iter()
            .fold(RangeCounts::default(), |mut counts, &v| {
                if v < self.very_low {
                    counts.very_low += 1;
                } else if v < self.low {
                    counts.low += 1;
                } else if v > self.very_high {
                    counts.very_high += 1;
                } else if v > self.high {
                    counts.high += 1;
                }
                counts
            })
    }
}

/// Computes [`StatsResult`] for one reading series over one window.
///
/// Order of work:
/// 1. CGM type from the first reading's device string
/// 2. Completeness against the sensor's nominal cadence
/// 3. Mean and population standard deviation
/// 4. GMI = 3.31 + 0.02392 x mean glucose (mg/dL)
/// 5. Range percentages
/// 6. Normal and rapid fluctuation rates
#[derive(Debug, Clone, Copy, Default)]
pub struct GlucoseStatsCalculator {
    pub thresholds: RangeThresholds,
}

impl GlucoseStatsCalculator {
    const GMI_INTERCEPT: f64 = 3.31;
    const GMI_SLOPE: f64 = 0.02392;

    /// Returns `None` for an empty series or a zero-length window, where the
    /// per-sample and per-day denominators are undefined.
    pub fn calculate(&self, readings: &[Reading], window_days: u32) -> Option<StatsResult> {
        let first = readings.first()?;
        if window_days == 0 {
            return None;
        }

        let cgm_type = CgmType::from_device(&first.device);
        let sample_count = readings.len();
        let percent_data = Self::percent_data(sample_count, cgm_type, window_days);

        let values = readings.iter().map(|r| r.value).collect::<Vec<_>>();
        let avg_glucose = mean(&values);
        let std_dev = population_std_dev(&values, avg_glucose);
        let gmi = Self::gmi(avg_glucose);

        let counts = self.thresholds.classify(&values);
        let very_low = percent(counts.very_low, sample_count);
        let low = percent(counts.low, sample_count);
        let high = percent(counts.high, sample_count);
        let very_high = percent(counts.very_high, sample_count);
        let tbr = very_low + low;
        let tar = high + very_high;
        let tir = 100.0 - tbr - tar;

        Some(StatsResult {
            cgm_type,
            sample_count,
            percent_data,
            avg_glucose,
            std_dev,
            gmi,
            tbr,
            tir,
            tar,
            very_low,
            low,
            high,
            very_high,
            fluctuation_rate: FluctuationCalculator::NORMAL.rate(readings),
            rapid_fluctuation_rate: FluctuationCalculator::RAPID.rate(readings),
        })
    }

    pub fn gmi(avg_glucose: f64) -> f64 {
        Self::GMI_INTERCEPT + Self::GMI_SLOPE * avg_glucose
    }

    fn percent_data(sample_count: usize, cgm_type: CgmType, window_days: u32) -> f64 {
        let expected = u64::from(cgm_type.samples_per_day()) * u64::from(window_days);
        sample_count as f64 / expected as f64 * 100.0
    }
}
