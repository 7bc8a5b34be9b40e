mod api;
mod auth;
mod config;
mod errors;
mod mapper;
mod metrics;
mod model;
mod mqtt;
mod poller;
mod rest;
mod setup;
mod store;
mod validate;

use axum::{routing::get, Router};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = config::Config::from_env();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Minut bridge");
    info!("Minut API: {}", config.api_url);
    info!("HTTP server: {}", config.http_addr);
    info!("Poll interval: {:?}", config.poll_interval);

    // Initialize metrics
    metrics::init_metrics();

    let http = match api::build_http_client(config.request_timeout) {
        Ok(http) => http,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // Validate credentials before polling
    let validated = match setup::validate_setup(
        &http,
        &config.api_url,
        &config.setup_input(),
        config.token_file.as_deref(),
    )
    .await
    {
        Ok(validated) => validated,
        Err(e) => {
            error!("Setup failed ({}): {}", e.kind().as_str(), e);
            std::process::exit(1);
        }
    };
    info!(
        "Authenticated as Minut user {} with {} devices",
        validated.client.auth().user_id().await,
        validated.devices.len()
    );

    let store = store::EntityStore::new(config.unavailable_after);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut poller = poller::Poller::new(
        validated.client,
        store.clone(),
        config.poll_interval,
        config.device_refresh,
    )
    .with_devices(validated.devices);

    // MQTT publishing is optional
    let mqtt_handle = match config.mqtt.clone() {
        Some(mqtt_config) => {
            info!("Channel capacity: {}", config.channel_capacity);
            let (tx, rx) = mpsc::channel(config.channel_capacity);
            poller = poller.with_publisher(tx);

            let client_id = format!("minut-bridge-{}", uuid::Uuid::new_v4());
            tokio::spawn(async move {
                if let Err(e) = mqtt::run_publisher(mqtt_config, client_id, rx).await {
                    error!("MQTT task failed: {}", e);
                }
            })
        }
        None => {
            info!("MQTT_BROKER not set, MQTT publishing disabled");
            tokio::spawn(std::future::pending::<()>())
        }
    };

    let poller_handle = tokio::spawn(poller.run(shutdown_rx));

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(store));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = poller_handle => {
            error!("Poller task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
