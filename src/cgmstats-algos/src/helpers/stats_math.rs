pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0_f64
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Standard deviation over the whole population (divides by `n`).
pub fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        0_f64
    } else {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        variance.sqrt()
    }
}

/// `count` as a percentage of `total`. Callers guarantee `total > 0`.
pub fn percent(count: usize, total: usize) -> f64 {
    count as f64 / total as f64 * 100.0
}

pub fn round_float(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
