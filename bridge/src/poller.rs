use crate::api::{MinutClient, TIMELINE_LIMIT};
use crate::errors::{ErrorKind, Result};
use crate::mapper::{map_poll, RawPoll};
use crate::metrics::{
    DEVICES, POLLS_TOTAL, POLL_FAILURES_TOTAL, POLL_LATENCY_SECONDS, SNAPSHOTS_DROPPED_TOTAL,
};
use crate::model::{Device, MetricType, Snapshot};
use crate::mqtt::PublisherMessage;
use crate::store::EntityStore;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct Poller {
    client: MinutClient,
    store: EntityStore,
    publisher: Option<mpsc::Sender<PublisherMessage>>,
    interval: Duration,
    device_refresh: Duration,
    devices: Vec<Device>,
    devices_fetched_at: Option<Instant>,
}

impl Poller {
    pub fn new(
        client: MinutClient,
        store: EntityStore,
        interval: Duration,
        device_refresh: Duration,
    ) -> Self {
        Self {
            client,
            store,
            publisher: None,
            interval,
            device_refresh,
            devices: Vec::new(),
            devices_fetched_at: None,
        }
    }

    pub fn with_publisher(mut self, tx: mpsc::Sender<PublisherMessage>) -> Self {
        self.publisher = Some(tx);
        self
    }

    /// Seeds the device cache, e.g. with the list fetched during setup
    pub fn with_devices(mut self, devices: Vec<Device>) -> Self {
        DEVICES.set(devices.len() as f64);
        self.devices = devices;
        self.devices_fetched_at = Some(Instant::now());
        self
    }

    fn devices_stale(&self) -> bool {
        match self.devices_fetched_at {
            None => true,
            Some(_) if self.devices.is_empty() => true,
            Some(at) => at.elapsed() >= self.device_refresh,
        }
    }

    /// Fetches everything once, maps it and stores the result
    pub async fn poll_once(&mut self) -> Result<Snapshot> {
        if self.devices_stale() {
            let devices = self.client.get_devices().await?;
            info!("Loaded {} devices from Minut", devices.len());
            DEVICES.set(devices.len() as f64);
            self.devices = devices;
            self.devices_fetched_at = Some(Instant::now());
        }

        let timeline = self.client.get_timeline(TIMELINE_LIMIT).await?;

        let mut sensors = HashMap::with_capacity(self.devices.len() * MetricType::ALL.len());
        for device in &self.devices {
            for metric in MetricType::ALL {
                let payload = self.client.get_sensor_values(&device.id, metric).await?;
                sensors.insert((device.id.clone(), metric), payload);
            }
        }

        let raw = RawPoll {
            devices: self.devices.clone(),
            sensors,
            timeline,
        };
        let snapshot = map_poll(&raw, Utc::now());
        self.store.apply_snapshot(&snapshot).await;
        Ok(snapshot)
    }

    fn forward(&self, message: PublisherMessage) {
        let Some(tx) = &self.publisher else {
            return;
        };

        match tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // The next poll supersedes whatever was dropped
                SNAPSHOTS_DROPPED_TOTAL.inc();
                debug!("Publisher channel full, dropping update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Publisher channel closed, cannot forward update");
            }
        }
    }

    async fn tick(&mut self) {
        POLLS_TOTAL.inc();
        let start = Instant::now();

        match self.poll_once().await {
            Ok(snapshot) => {
                let elapsed = start.elapsed().as_secs_f64();
                POLL_LATENCY_SECONDS.observe(elapsed);
                debug!(
                    "Polled {} entities in {:.3}s",
                    snapshot.entities.len(),
                    elapsed
                );
                self.forward(PublisherMessage::Snapshot(snapshot));
            }
            Err(e) => {
                POLL_FAILURES_TOTAL.inc();
                match e.kind() {
                    ErrorKind::InvalidAuth => {
                        error!("Invalid authentication while polling Minut: {}", e)
                    }
                    ErrorKind::CannotConnect | ErrorKind::RateLimited => {
                        warn!("Cannot connect to Minut API: {}", e)
                    }
                    ErrorKind::Internal => error!("Poll failed: {}", e),
                }

                if self.store.record_failure(Utc::now(), &e).await {
                    self.forward(PublisherMessage::Unavailable);
                }
            }
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting poller with interval={:?}", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Poller stopped");
    }
}
