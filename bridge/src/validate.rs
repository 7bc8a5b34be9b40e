use crate::model::MetricType;
use tracing::debug;

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;
const NOISE_MIN: f64 = 0.0;
const NOISE_MAX: f64 = 150.0;

/// Range a Point can physically report for a metric
pub fn plausible_range(metric: MetricType) -> (f64, f64) {
    match metric {
        MetricType::Temperature => (TEMP_MIN, TEMP_MAX),
        MetricType::Humidity => (HUMIDITY_MIN, HUMIDITY_MAX),
        MetricType::Noise => (NOISE_MIN, NOISE_MAX),
    }
}

/// Validates a reading, returning `None` for values that cannot be real
pub fn validate_reading(metric: MetricType, value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }

    let (min, max) = plausible_range(metric);
    if value < min || value > max {
        debug!(
            "Discarding {} reading {} outside [{}, {}]",
            metric.key(),
            value,
            min,
            max
        );
        return None;
    }

    Some(value)
}
