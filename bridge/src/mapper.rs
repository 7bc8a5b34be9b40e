//! Translation of raw Minut payloads into entity states.
//!
//! Everything here is pure: the poll time is passed in, so the same payloads
//! always map to the same entity set. Payload shapes vary between API
//! revisions, so parsing is lenient and anything unusable degrades to an
//! `unknown` state instead of an error.

use crate::model::{
    BinarySensorType, Device, EntityKind, EntityState, EventType, MetricType, SensorReading,
    Snapshot, StateValue, TimelineEvent,
};
use crate::validate::validate_reading;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// How long a timeline event keeps its binary sensor on
pub const RECENT_EVENT_WINDOW_SECS: i64 = 120;

pub fn recent_event_window() -> Duration {
    Duration::seconds(RECENT_EVENT_WINDOW_SECS)
}

/// Raw payloads gathered by one poll
#[derive(Debug, Clone, Default)]
pub struct RawPoll {
    pub devices: Vec<Device>,
    /// `None` when the endpoint had no data for this device (404)
    pub sensors: HashMap<(String, MetricType), Option<Value>>,
    pub timeline: Value,
}

fn list_field<'a>(payload: &'a Value, keys: &[&str]) -> &'a [Value] {
    if let Some(items) = payload.as_array() {
        return items;
    }
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses RFC 3339, falling back to zone-less ISO 8601 taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

pub fn parse_devices(payload: &Value) -> Vec<Device> {
    list_field(payload, &["devices"])
        .iter()
        .filter_map(|item| {
            let id = item
                .get("id")
                .and_then(id_string)
                .or_else(|| item.get("device_id").and_then(id_string))?;
            let name = non_empty_str(item, "description")
                .or_else(|| non_empty_str(item, "name"))
                .map(str::to_string)
                .unwrap_or_else(|| format!("Point {}", id));
            let model = non_empty_str(item, "model").unwrap_or("Point").to_string();
            Some(Device { id, name, model })
        })
        .collect()
}

/// Picks the most recent value out of a sensor values payload
pub fn parse_latest_value(
    device_id: &str,
    metric: MetricType,
    payload: Option<&Value>,
) -> SensorReading {
    let latest = payload.and_then(|p| list_field(p, &["values", "data"]).last());

    let value = latest
        .and_then(|entry| entry.get("value"))
        .and_then(number)
        .and_then(|v| validate_reading(metric, v));
    let timestamp = latest.and_then(|entry| {
        ["datetime", "timestamp"]
            .iter()
            .find_map(|key| entry.get(*key).and_then(Value::as_str))
            .and_then(parse_timestamp)
    });

    SensorReading {
        device_id: device_id.to_string(),
        metric,
        value,
        timestamp,
    }
}

pub fn parse_timeline(payload: &Value) -> Vec<TimelineEvent> {
    list_field(payload, &["events"])
        .iter()
        .filter_map(|item| {
            let event_type = non_empty_str(item, "type")?;
            let device_id = item
                .get("device_id")
                .and_then(id_string)
                .or_else(|| item.pointer("/device/id").and_then(id_string))?;
            let timestamp = ["timestamp", "datetime", "created_at", "time"]
                .iter()
                .find_map(|key| non_empty_str(item, key))
                .and_then(parse_timestamp)?;

            Some(TimelineEvent {
                device_id,
                event_type: EventType::parse(event_type),
                timestamp,
            })
        })
        .collect()
}

/// An event counts as recent when it lies within `window` of `now`, on either side
pub fn is_recent(timestamp: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now - timestamp <= window && timestamp - now <= window
}

pub fn binary_state(
    sensor: BinarySensorType,
    device_id: &str,
    events: &[TimelineEvent],
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    events.iter().any(|event| {
        event.device_id == device_id
            && sensor.triggered_by(&event.event_type)
            && is_recent(event.timestamp, now, window)
    })
}

pub fn entity_id(device_id: &str, key: &str) -> String {
    format!("{}_{}", device_id, key)
}

/// Builds the full entity set for the given devices
pub fn map_entities(
    devices: &[Device],
    readings: &[SensorReading],
    events: &[TimelineEvent],
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<EntityState> {
    let mut entities = Vec::with_capacity(devices.len() * 5);

    for device in devices {
        for metric in MetricType::ALL {
            let value = readings
                .iter()
                .find(|r| r.device_id == device.id && r.metric == metric)
                .and_then(|r| r.value);
            let kind = EntityKind::Sensor { metric };
            entities.push(EntityState {
                entity_id: entity_id(&device.id, metric.key()),
                device_id: device.id.clone(),
                name: format!("{} {}", device.name, metric.label()),
                device_class: kind.device_class(),
                unit: kind.unit(),
                kind,
                state: value.map(StateValue::Number).unwrap_or(StateValue::Unknown),
                available: true,
                last_updated: now,
            });
        }

        for sensor in BinarySensorType::ALL {
            let on = binary_state(sensor, &device.id, events, now, window);
            let kind = EntityKind::BinarySensor { sensor };
            entities.push(EntityState {
                entity_id: entity_id(&device.id, sensor.key()),
                device_id: device.id.clone(),
                name: format!("{} {}", device.name, sensor.label()),
                device_class: kind.device_class(),
                unit: None,
                kind,
                state: StateValue::from_bool(on),
                available: true,
                last_updated: now,
            });
        }
    }

    entities
}

/// Maps one poll's raw payloads into a snapshot
pub fn map_poll(raw: &RawPoll, now: DateTime<Utc>) -> Snapshot {
    let readings: Vec<SensorReading> = raw
        .devices
        .iter()
        .flat_map(|device| {
            MetricType::ALL.into_iter().map(move |metric| {
                let payload = raw
                    .sensors
                    .get(&(device.id.clone(), metric))
                    .and_then(Option::as_ref);
                parse_latest_value(&device.id, metric, payload)
            })
        })
        .collect();
    let events = parse_timeline(&raw.timeline);

    Snapshot {
        devices: raw.devices.clone(),
        entities: map_entities(&raw.devices, &readings, &events, now, recent_event_window()),
        polled_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(id: &str) -> Device {
        Device {
            id: id.to_string(),
            name: format!("Point {}", id),
            model: "Point".to_string(),
        }
    }

    fn state_of<'a>(entities: &'a [EntityState], id: &str) -> &'a StateValue {
        &entities
            .iter()
            .find(|e| e.entity_id == id)
            .unwrap_or_else(|| panic!("missing entity {}", id))
            .state
    }

    #[test]
    fn test_parse_devices_shapes() {
        let listed = parse_devices(&json!([
            {"id": "abc", "description": "Living room"},
            {"device_id": 42, "name": "Hall", "model": "Point 2"},
            {"description": "no id"}
        ]));
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "Living room");
        assert_eq!(listed[0].model, "Point");
        assert_eq!(listed[1].id, "42");
        assert_eq!(listed[1].model, "Point 2");

        let wrapped = parse_devices(&json!({"devices": [{"id": "x"}]}));
        assert_eq!(wrapped[0].name, "Point x");

        assert!(parse_devices(&json!("nonsense")).is_empty());
    }

    #[test]
    fn test_latest_value_takes_last_entry() {
        let payload = json!({"values": [
            {"value": 20.0, "datetime": "2024-01-01T10:00:00Z"},
            {"value": "21.5", "datetime": "2024-01-01T10:05:00Z"}
        ]});
        let reading = parse_latest_value("abc", MetricType::Temperature, Some(&payload));
        assert_eq!(reading.value, Some(21.5));
        assert_eq!(
            reading.timestamp,
            parse_timestamp("2024-01-01T10:05:00Z")
        );

        let bare = json!([{"value": 55}]);
        let reading = parse_latest_value("abc", MetricType::Humidity, Some(&bare));
        assert_eq!(reading.value, Some(55.0));
        assert_eq!(reading.timestamp, None);
    }

    #[test]
    fn test_malformed_sensor_data_is_unknown() {
        let cases = [
            None,
            Some(json!({})),
            Some(json!([])),
            Some(json!({"values": [{"value": null}]})),
            Some(json!({"values": [{"value": "warm"}]})),
            Some(json!({"values": [{"value": 999.0}]})),
            Some(json!("<html>")),
        ];
        for payload in cases {
            let reading = parse_latest_value("abc", MetricType::Temperature, payload.as_ref());
            assert_eq!(reading.value, None, "payload {:?}", payload);
        }

        let devices = vec![point("abc")];
        let now = Utc::now();
        let entities = map_entities(&devices, &[], &[], now, recent_event_window());
        assert_eq!(*state_of(&entities, "abc_temperature"), StateValue::Unknown);
        assert_eq!(*state_of(&entities, "abc_noise"), StateValue::Unknown);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let utc = parse_timestamp("2024-03-01T12:00:00Z").unwrap();
        assert_eq!(parse_timestamp("2024-03-01T13:00:00+01:00"), Some(utc));
        assert_eq!(parse_timestamp("2024-03-01T12:00:00"), Some(utc));
        assert!(parse_timestamp("2024-03-01T12:00:00.250").is_some());
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_parse_timeline_drops_incomplete_events() {
        let events = parse_timeline(&json!({"events": [
            {"type": "activity_detected", "device_id": "abc", "datetime": "2024-03-01T12:00:00Z"},
            {"type": "alarm_heard", "device": {"id": "def"}, "created_at": "2024-03-01T12:00:00Z"},
            {"type": "alarm_heard", "device_id": "abc"},
            {"device_id": "abc", "timestamp": "2024-03-01T12:00:00Z"},
            {"type": "alarm_heard", "device_id": "abc", "timestamp": "not a time"}
        ]}));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::ActivityDetected);
        assert_eq!(events[1].device_id, "def");
    }

    #[test]
    fn test_binary_sensor_recency_window() {
        let now = parse_timestamp("2024-03-01T12:00:00Z").unwrap();
        let devices = vec![point("abc")];
        let events = vec![
            TimelineEvent {
                device_id: "abc".to_string(),
                event_type: EventType::ActivityDetected,
                timestamp: now - Duration::seconds(119),
            },
            TimelineEvent {
                device_id: "abc".to_string(),
                event_type: EventType::AvgSoundHigh,
                timestamp: now - Duration::seconds(121),
            },
        ];

        let entities = map_entities(&devices, &[], &events, now, recent_event_window());
        assert_eq!(*state_of(&entities, "abc_motion"), StateValue::On);
        assert_eq!(*state_of(&entities, "abc_alarm"), StateValue::Off);

        // Exactly on the boundary still counts
        assert!(is_recent(now - Duration::seconds(120), now, recent_event_window()));
        // Slight clock skew into the future counts as recent
        assert!(is_recent(now + Duration::seconds(5), now, recent_event_window()));
        // Far-future stamps do not hold the sensor on
        assert!(!is_recent(now + Duration::hours(1), now, recent_event_window()));
    }

    #[test]
    fn test_events_only_affect_their_device() {
        let now = Utc::now();
        let devices = vec![point("abc"), point("def")];
        let events = vec![TimelineEvent {
            device_id: "def".to_string(),
            event_type: EventType::AlarmHeard,
            timestamp: now,
        }];

        let entities = map_entities(&devices, &[], &events, now, recent_event_window());
        assert_eq!(*state_of(&entities, "abc_alarm"), StateValue::Off);
        assert_eq!(*state_of(&entities, "def_alarm"), StateValue::On);
        assert_eq!(*state_of(&entities, "def_motion"), StateValue::Off);
    }

    #[test]
    fn test_map_poll_is_deterministic() {
        let now = parse_timestamp("2024-03-01T12:00:00Z").unwrap();
        let mut raw = RawPoll {
            devices: vec![point("abc")],
            timeline: json!([
                {"type": "alarm_heard", "device_id": "abc", "timestamp": "2024-03-01T11:59:30Z"}
            ]),
            ..Default::default()
        };
        raw.sensors.insert(
            ("abc".to_string(), MetricType::Temperature),
            Some(json!([{"value": 22.25}])),
        );
        raw.sensors
            .insert(("abc".to_string(), MetricType::Humidity), None);

        let first = map_poll(&raw, now);
        let second = map_poll(&raw, now);
        assert_eq!(first.entities, second.entities);
        assert_eq!(first.entities.len(), 5);
        assert_eq!(
            *state_of(&first.entities, "abc_temperature"),
            StateValue::Number(22.25)
        );
        assert_eq!(*state_of(&first.entities, "abc_humidity"), StateValue::Unknown);
        assert_eq!(*state_of(&first.entities, "abc_alarm"), StateValue::On);
        assert_eq!(first.entities[0].name, "Point abc Temperature");
        assert_eq!(first.entities[2].unit, Some("dBA"));
    }
}
