use crate::setup::SetupInput;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.minut.com/draft1";

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub discovery_prefix: String,
    pub topic_prefix: String,
}

/// Bridge settings, read from the environment with defaults
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
    pub token_file: Option<PathBuf>,
    pub debug: bool,
    pub http_addr: String,
    pub poll_interval: Duration,
    pub device_refresh: Duration,
    pub request_timeout: Duration,
    pub unavailable_after: u32,
    pub channel_capacity: usize,
    pub mqtt: Option<MqttConfig>,
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_bool(raw: Option<String>) -> bool {
    matches!(
        raw.as_deref().map(str::trim).map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mqtt = get("MQTT_BROKER").map(|broker| MqttConfig {
            broker,
            port: parse_or(get("MQTT_PORT"), 1883),
            discovery_prefix: get("MQTT_DISCOVERY_PREFIX")
                .unwrap_or_else(|| "homeassistant".to_string()),
            topic_prefix: get("MQTT_TOPIC_PREFIX").unwrap_or_else(|| "minut".to_string()),
        });

        Self {
            api_url: get("MINUT_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            username: get("MINUT_USERNAME"),
            password: get("MINUT_PASSWORD"),
            access_token: get("MINUT_ACCESS_TOKEN"),
            refresh_token: get("MINUT_REFRESH_TOKEN"),
            user_id: get("MINUT_USER_ID"),
            token_file: get("MINUT_TOKEN_FILE").map(PathBuf::from),
            debug: parse_bool(get("MINUT_DEBUG")),
            http_addr: get("HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            poll_interval: Duration::from_secs(parse_or(get("POLL_INTERVAL_SECS"), 15).max(1)),
            device_refresh: Duration::from_secs(parse_or(get("DEVICE_REFRESH_SECS"), 3600)),
            request_timeout: Duration::from_secs(parse_or(get("REQUEST_TIMEOUT_SECS"), 20)),
            unavailable_after: parse_or(get("UNAVAILABLE_AFTER"), 3).max(1),
            channel_capacity: parse_or(get("CHANNEL_CAPACITY"), 16).max(1),
            mqtt,
        }
    }

    pub fn setup_input(&self) -> SetupInput {
        SetupInput {
            username: self.username.clone(),
            password: self.password.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            user_id: self.user_id.clone(),
        }
    }

    /// Default tracing filter; `RUST_LOG` takes precedence when set
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "info,minut_bridge=debug"
        } else {
            "info"
        }
    }
}
