use crate::errors::Error;
use crate::model::{Device, EntityState, Snapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Default)]
struct StoreInner {
    devices: Vec<Device>,
    entities: BTreeMap<String, EntityState>,
    last_poll: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub available: bool,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub entities: usize,
}

/// Latest entity states, shared between the poller and the HTTP server
#[derive(Debug, Clone)]
pub struct EntityStore {
    inner: Arc<RwLock<StoreInner>>,
    unavailable_after: u32,
}

impl EntityStore {
    pub fn new(unavailable_after: u32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            unavailable_after: unavailable_after.max(1),
        }
    }

    /// Replaces every entity with the snapshot's states
    pub async fn apply_snapshot(&self, snapshot: &Snapshot) {
        let mut inner = self.inner.write().await;
        inner.devices = snapshot.devices.clone();
        inner.entities = snapshot
            .entities
            .iter()
            .map(|e| (e.entity_id.clone(), e.clone()))
            .collect();
        inner.last_poll = Some(snapshot.polled_at);
        inner.last_success = Some(snapshot.polled_at);
        inner.consecutive_failures = 0;
        inner.last_error = None;
    }

    /// Records a failed poll. States are kept; returns true when this failure
    /// made the entities unavailable.
    pub async fn record_failure(&self, at: DateTime<Utc>, error: &Error) -> bool {
        let mut inner = self.inner.write().await;
        inner.last_poll = Some(at);
        inner.consecutive_failures += 1;
        inner.last_error = Some(error.kind().as_str().to_string());

        if inner.consecutive_failures != self.unavailable_after {
            return false;
        }

        warn!(
            "{} consecutive poll failures, marking {} entities unavailable",
            inner.consecutive_failures,
            inner.entities.len()
        );
        for entity in inner.entities.values_mut() {
            entity.available = false;
        }
        true
    }

    pub async fn entities(&self, device_id: Option<&str>) -> Vec<EntityState> {
        let inner = self.inner.read().await;
        inner
            .entities
            .values()
            .filter(|e| device_id.map_or(true, |id| e.device_id == id))
            .cloned()
            .collect()
    }

    pub async fn entity(&self, entity_id: &str) -> Option<EntityState> {
        self.inner.read().await.entities.get(entity_id).cloned()
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.inner.read().await.devices.clone()
    }

    pub async fn health(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        let available = inner.last_success.is_some()
            && inner.consecutive_failures < self.unavailable_after;
        let status = match (inner.last_poll, available, inner.consecutive_failures) {
            (None, _, _) => "starting",
            (Some(_), true, 0) => "ok",
            (Some(_), true, _) => "degraded",
            (Some(_), false, _) => "unavailable",
        };

        HealthStatus {
            status,
            available,
            last_poll: inner.last_poll,
            last_success: inner.last_success,
            consecutive_failures: inner.consecutive_failures,
            last_error: inner.last_error.clone(),
            entities: inner.entities.len(),
        }
    }
}
