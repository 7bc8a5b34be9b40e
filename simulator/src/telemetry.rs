use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;

/// Event types a simulated Point can emit on its timeline
pub const EVENT_TYPES: [&str; 5] = [
    "activity_detected",
    "alarm_heard",
    "avg_sound_high",
    "sound_level_dropped_normal",
    "short_button_press",
];

#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub value: f64,
    pub datetime: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub device_id: String,
    pub datetime: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Point {
    pub device_id: String,
    pub description: String,
    pub temperature: Sample,
    pub humidity: Sample,
    pub noise: Sample,
}

impl Point {
    pub fn new(rng: &mut impl Rng, index: usize) -> Self {
        let now = Utc::now();
        Self {
            device_id: format!("sim{:06x}", rng.gen::<u32>() & 0xff_ffff),
            description: format!("Simulated Point {}", index + 1),
            temperature: Sample {
                value: round(rng.gen_range(18.0..24.0)),
                datetime: now,
            },
            humidity: Sample {
                value: round(rng.gen_range(35.0..60.0)),
                datetime: now,
            },
            noise: Sample {
                value: round(rng.gen_range(30.0..45.0)),
                datetime: now,
            },
        }
    }

    /// Random walk within each metric's plausible range
    pub fn advance(&mut self, rng: &mut impl Rng, now: DateTime<Utc>) {
        step(&mut self.temperature, rng, 0.3, 10.0, 35.0, now);
        step(&mut self.humidity, rng, 1.0, 20.0, 90.0, now);

        // 2% loud spikes
        if rng.gen_bool(0.02) {
            self.noise = Sample {
                value: round(rng.gen_range(70.0..95.0)),
                datetime: now,
            };
        } else {
            step(&mut self.noise, rng, 2.0, 25.0, 60.0, now);
        }
    }

    pub fn sample(&self, metric: &str) -> Option<&Sample> {
        match metric {
            "temperature" => Some(&self.temperature),
            "humidity" => Some(&self.humidity),
            "sound_avg_levels" => Some(&self.noise),
            _ => None,
        }
    }

    pub fn maybe_event(
        &self,
        rng: &mut impl Rng,
        probability: f64,
        now: DateTime<Utc>,
    ) -> Option<Event> {
        if !rng.gen_bool(probability.clamp(0.0, 1.0)) {
            return None;
        }
        let event_type = EVENT_TYPES[rng.gen_range(0..EVENT_TYPES.len())];
        Some(Event {
            event_type: event_type.to_string(),
            device_id: self.device_id.clone(),
            // Reported a few seconds after it happened
            datetime: now - Duration::seconds(rng.gen_range(0..5)),
        })
    }
}

fn round(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn step(sample: &mut Sample, rng: &mut impl Rng, max_delta: f64, min: f64, max: f64, now: DateTime<Utc>) {
    let delta = rng.gen_range(-max_delta..=max_delta);
    sample.value = round((sample.value + delta).clamp(min, max));
    sample.datetime = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_advance_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut point = Point::new(&mut rng, 0);
        for _ in 0..1000 {
            point.advance(&mut rng, Utc::now());
            assert!((10.0..=35.0).contains(&point.temperature.value));
            assert!((20.0..=90.0).contains(&point.humidity.value));
            assert!((25.0..=95.0).contains(&point.noise.value));
        }
    }

    #[test]
    fn test_sample_lookup() {
        let mut rng = StdRng::seed_from_u64(1);
        let point = Point::new(&mut rng, 0);
        assert!(point.sample("sound_avg_levels").is_some());
        assert!(point.sample("pressure").is_none());
    }

    #[test]
    fn test_event_probability_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let point = Point::new(&mut rng, 0);
        assert!(point.maybe_event(&mut rng, 0.0, Utc::now()).is_none());
        let event = point.maybe_event(&mut rng, 1.0, Utc::now()).unwrap();
        assert_eq!(event.device_id, point.device_id);
        assert!(EVENT_TYPES.contains(&event.event_type.as_str()));
    }
}
