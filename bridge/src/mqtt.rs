//! Publishes entity states to MQTT using Home Assistant discovery.
//!
//! Each entity gets a retained discovery config under
//! `<discovery_prefix>/<platform>/minut_<entity_id>/config` the first time it
//! is seen, and a retained state under `<topic_prefix>/<entity_id>/state`
//! after every successful poll. `<topic_prefix>/status` carries availability
//! and doubles as the last will.

use crate::config::MqttConfig;
use crate::errors::Result;
use crate::metrics::MQTT_PUBLISH_FAILURES_TOTAL;
use crate::model::{Device, EntityState, Snapshot, StateValue};
use rumqttc::{AsyncClient, LastWill, MqttOptions, QoS};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";

#[derive(Debug, Clone)]
pub enum PublisherMessage {
    Snapshot(Snapshot),
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct Topics {
    discovery_prefix: String,
    topic_prefix: String,
}

impl Topics {
    pub fn new(config: &MqttConfig) -> Self {
        Self {
            discovery_prefix: config.discovery_prefix.trim_end_matches('/').to_string(),
            topic_prefix: config.topic_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn availability(&self) -> String {
        format!("{}/status", self.topic_prefix)
    }

    pub fn state(&self, entity: &EntityState) -> String {
        format!("{}/{}/state", self.topic_prefix, entity.entity_id)
    }

    pub fn discovery(&self, entity: &EntityState) -> String {
        format!(
            "{}/{}/minut_{}/config",
            self.discovery_prefix,
            entity.kind.platform(),
            entity.entity_id
        )
    }
}

pub fn state_payload(state: &StateValue) -> String {
    match state {
        StateValue::Number(v) => v.to_string(),
        StateValue::On => "ON".to_string(),
        StateValue::Off => "OFF".to_string(),
        StateValue::Unknown => "unknown".to_string(),
    }
}

pub fn discovery_payload(topics: &Topics, entity: &EntityState, device: Option<&Device>) -> Value {
    let mut payload = json!({
        "name": entity.name,
        "unique_id": format!("minut_{}", entity.entity_id),
        "object_id": format!("minut_{}", entity.entity_id),
        "state_topic": topics.state(entity),
        "availability_topic": topics.availability(),
        "payload_available": PAYLOAD_ONLINE,
        "payload_not_available": PAYLOAD_OFFLINE,
        "device": {
            "identifiers": [format!("minut_{}", entity.device_id)],
            "name": device.map(|d| d.name.as_str()).unwrap_or(entity.device_id.as_str()),
            "manufacturer": "Minut",
            "model": device.map(|d| d.model.as_str()).unwrap_or("Point"),
        },
    });

    if let Some(device_class) = entity.device_class {
        payload["device_class"] = json!(device_class);
    }
    if let Some(unit) = entity.unit {
        payload["unit_of_measurement"] = json!(unit);
        payload["state_class"] = json!("measurement");
    }
    payload
}

struct Publisher {
    client: AsyncClient,
    topics: Topics,
    announced: HashSet<String>,
}

impl Publisher {
    async fn publish(&self, topic: String, payload: String) {
        if let Err(e) = self
            .client
            .publish(topic.as_str(), QoS::AtLeastOnce, true, payload)
            .await
        {
            MQTT_PUBLISH_FAILURES_TOTAL.inc();
            warn!("Failed to publish to {}: {}", topic, e);
        }
    }

    async fn publish_snapshot(&mut self, snapshot: &Snapshot) {
        self.publish(self.topics.availability(), PAYLOAD_ONLINE.to_string())
            .await;

        for entity in &snapshot.entities {
            if !self.announced.contains(&entity.entity_id) {
                let device = snapshot.devices.iter().find(|d| d.id == entity.device_id);
                let config = discovery_payload(&self.topics, entity, device);
                self.publish(self.topics.discovery(entity), config.to_string())
                    .await;
                self.announced.insert(entity.entity_id.clone());
            }
            self.publish(self.topics.state(entity), state_payload(&entity.state))
                .await;
        }

        debug!("Published {} entity states", snapshot.entities.len());
    }
}

pub async fn run_publisher(
    config: MqttConfig,
    client_id: String,
    mut rx: mpsc::Receiver<PublisherMessage>,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", config.broker, config.port);

    let topics = Topics::new(&config);
    let mut mqtt_options = MqttOptions::new(client_id, config.broker.clone(), config.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_last_will(LastWill::new(
        topics.availability(),
        PAYLOAD_OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let mut publisher = Publisher {
        client,
        topics,
        announced: HashSet::new(),
    };

    while let Some(message) = rx.recv().await {
        match message {
            PublisherMessage::Snapshot(snapshot) => publisher.publish_snapshot(&snapshot).await,
            PublisherMessage::Unavailable => {
                info!("Publishing offline availability");
                publisher
                    .publish(publisher.topics.availability(), PAYLOAD_OFFLINE.to_string())
                    .await;
            }
        }
    }

    info!("Publisher channel closed, disconnecting from MQTT");
    publisher.client.disconnect().await?;
    Ok(())
}
