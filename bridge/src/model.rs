use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// A Minut Point as listed by the devices endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Temperature,
    Humidity,
    Noise,
}

impl MetricType {
    pub const ALL: [MetricType; 3] = [
        MetricType::Temperature,
        MetricType::Humidity,
        MetricType::Noise,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            MetricType::Temperature => "temperature",
            MetricType::Humidity => "humidity",
            MetricType::Noise => "noise",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MetricType::Temperature => "Temperature",
            MetricType::Humidity => "Humidity",
            MetricType::Noise => "Noise Level",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricType::Temperature => "°C",
            MetricType::Humidity => "%",
            MetricType::Noise => "dBA",
        }
    }

    pub fn device_class(&self) -> Option<&'static str> {
        match self {
            MetricType::Temperature => Some("temperature"),
            MetricType::Humidity => Some("humidity"),
            MetricType::Noise => None,
        }
    }

    /// Path segment under `/devices/{id}/` serving this metric
    pub fn endpoint(&self) -> &'static str {
        match self {
            MetricType::Temperature => "temperature",
            MetricType::Humidity => "humidity",
            MetricType::Noise => "sound_avg_levels",
        }
    }
}

/// Latest value of one metric; `value` is `None` when the API had nothing usable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub device_id: String,
    pub metric: MetricType,
    pub value: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    ActivityDetected,
    AlarmHeard,
    AvgSoundHigh,
    SoundLevelDroppedNormal,
    Other(String),
}

impl EventType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "activity_detected" => EventType::ActivityDetected,
            "alarm_heard" => EventType::AlarmHeard,
            "avg_sound_high" => EventType::AvgSoundHigh,
            "sound_level_dropped_normal" => EventType::SoundLevelDroppedNormal,
            other => EventType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventType::ActivityDetected => "activity_detected",
            EventType::AlarmHeard => "alarm_heard",
            EventType::AvgSoundHigh => "avg_sound_high",
            EventType::SoundLevelDroppedNormal => "sound_level_dropped_normal",
            EventType::Other(s) => s,
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub device_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinarySensorType {
    Motion,
    Alarm,
}

impl BinarySensorType {
    pub const ALL: [BinarySensorType; 2] = [BinarySensorType::Motion, BinarySensorType::Alarm];

    pub fn key(&self) -> &'static str {
        match self {
            BinarySensorType::Motion => "motion",
            BinarySensorType::Alarm => "alarm",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BinarySensorType::Motion => "Motion",
            BinarySensorType::Alarm => "Alarm",
        }
    }

    pub fn device_class(&self) -> &'static str {
        match self {
            BinarySensorType::Motion => "motion",
            BinarySensorType::Alarm => "sound",
        }
    }

    pub fn triggered_by(&self, event: &EventType) -> bool {
        match self {
            BinarySensorType::Motion => matches!(event, EventType::ActivityDetected),
            BinarySensorType::Alarm => matches!(
                event,
                EventType::AlarmHeard | EventType::AvgSoundHigh | EventType::SoundLevelDroppedNormal
            ),
        }
    }
}

/// Tokens issued by the Minut token endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// True once `now` is within `margin` of the recorded expiry
    pub fn is_expired(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now + margin >= expires_at,
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum EntityKind {
    Sensor { metric: MetricType },
    BinarySensor { sensor: BinarySensorType },
}

impl EntityKind {
    pub fn platform(&self) -> &'static str {
        match self {
            EntityKind::Sensor { .. } => "sensor",
            EntityKind::BinarySensor { .. } => "binary_sensor",
        }
    }

    pub fn device_class(&self) -> Option<&'static str> {
        match self {
            EntityKind::Sensor { metric } => metric.device_class(),
            EntityKind::BinarySensor { sensor } => Some(sensor.device_class()),
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            EntityKind::Sensor { metric } => Some(metric.unit()),
            EntityKind::BinarySensor { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateValue {
    Number(f64),
    On,
    Off,
    Unknown,
}

impl StateValue {
    pub fn from_bool(on: bool) -> Self {
        if on {
            StateValue::On
        } else {
            StateValue::Off
        }
    }
}

impl Serialize for StateValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StateValue::Number(v) => serializer.serialize_f64(*v),
            StateValue::On => serializer.serialize_str("on"),
            StateValue::Off => serializer.serialize_str("off"),
            StateValue::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub device_id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    pub state: StateValue,
    pub available: bool,
    pub last_updated: DateTime<Utc>,
}

/// Everything one successful poll produced
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub devices: Vec<Device>,
    pub entities: Vec<EntityState>,
    pub polled_at: DateTime<Utc>,
}

/// REST API response wrapper
#[derive(Debug, Serialize)]
pub struct EntitiesResponse {
    pub data: Vec<EntityState>,
    pub total: usize,
}
