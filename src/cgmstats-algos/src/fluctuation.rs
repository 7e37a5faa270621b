use cgmstats_types::Reading;

/// Share of consecutive reading pairs whose rate of change meets a threshold.
///
/// Only pairs with a positive gap of at most six minutes are candidate
/// events. Larger gaps are sensor dropouts and count toward neither the
/// numerator nor the denominator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluctuationCalculator {
    /// mg/dL change per five minutes that counts as a fluctuation.
    pub threshold: f64,
}

impl FluctuationCalculator {
    pub const NORMAL: Self = Self { threshold: 6.0 };
    pub const RAPID: Self = Self { threshold: 11.0 };

    const MAX_GAP_MS: i64 = 6 * 60 * 1000;
    const RATE_WINDOW_MS: f64 = 5.0 * 60.0 * 1000.0;

    /// Percentage of candidate events that fluctuate, or `None` when the
    /// series has no candidate events at all.
    pub fn rate(&self, readings: &[Reading]) -> Option<f64> {
        let min_rate = self.threshold / Self::RATE_WINDOW_MS;

        let (events, count) = readings
            .windows(2)
            .filter_map(|pair| {
                let gap = pair[1].timestamp_ms - pair[0].timestamp_ms;
                (gap > 0 && gap <= Self::MAX_GAP_MS)
                    .then(|| (pair[1].value - pair[0].value).abs() / gap as f64)
            })
            .fold((0_usize, 0_usize), |(events, count), rate| {
                (events + 1, count + usize::from(rate >= min_rate))
            });

        (events > 0).then(|| count as f64 / events as f64 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE_MS: i64 = 60 * 1000;

    fn reading(value: f64, minute: i64) -> Reading {
        Reading::new(value, minute * MINUTE_MS, "share2")
    }

    #[test]
    fn no_pairs_is_undefined() {
        assert_eq!(FluctuationCalculator::NORMAL.rate(&[]), None);
        assert_eq!(FluctuationCalculator::NORMAL.rate(&[reading(100.0, 0)]), None);
    }

    #[test]
    fn large_gap_is_ignored() {
        // 10 minutes apart, huge jump: not a candidate event
        let readings = [reading(100.0, 0), reading(300.0, 10)];
        assert_eq!(FluctuationCalculator::NORMAL.rate(&readings), None);
        assert_eq!(FluctuationCalculator::RAPID.rate(&readings), None);
    }

    #[test]
    fn large_gap_excluded_from_denominator() {
        let readings = [
            reading(100.0, 0),
            reading(106.0, 5), // +6 in 5 min: fluctuation
            reading(300.0, 15), // dropout gap, skipped
            reading(301.0, 20), // +1 in 5 min: stable
        ];
        assert_eq!(FluctuationCalculator::NORMAL.rate(&readings), Some(50.0));
    }

    #[test]
    fn threshold_is_inclusive() {
        let readings = [reading(100.0, 0), reading(106.0, 5)];
        assert_eq!(FluctuationCalculator::NORMAL.rate(&readings), Some(100.0));
        assert_eq!(FluctuationCalculator::RAPID.rate(&readings), Some(0.0));
    }

    #[test]
    fn rapid_requires_larger_change() {
        let readings = [
            reading(100.0, 0),
            reading(112.0, 5),
            reading(120.0, 10),
            reading(120.0, 15),
        ];
        // changes of 12, 8, 0 over 5 minutes each
        let normal = FluctuationCalculator::NORMAL.rate(&readings).unwrap();
        let rapid = FluctuationCalculator::RAPID.rate(&readings).unwrap();
        assert!((normal - 200.0 / 3.0).abs() < 1e-9);
        assert!((rapid - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn duplicate_timestamps_are_skipped() {
        let readings = [reading(100.0, 0), reading(180.0, 0), reading(181.0, 5)];
        // only the second pair has a positive gap
        assert_eq!(FluctuationCalculator::NORMAL.rate(&readings), Some(0.0));
    }

    #[test]
    fn six_minute_gap_is_a_candidate() {
        let readings = [reading(100.0, 0), reading(100.0, 6)];
        assert_eq!(FluctuationCalculator::NORMAL.rate(&readings), Some(0.0));
    }
}
