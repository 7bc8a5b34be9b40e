mod telemetry;
mod tokens;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use telemetry::{Event, Point};
use tokens::TokenStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const MAX_EVENTS: usize = 500;
const DEFAULT_TIMELINE_LIMIT: usize = 200;

/// Local stand-in for the Minut Point API
#[derive(Debug, Clone, Parser)]
#[command(name = "minut-simulator", version)]
struct Args {
    #[arg(long, env = "SIM_ADDR", default_value = "127.0.0.1:8090")]
    addr: String,

    #[arg(long, env = "SIM_DEVICES", default_value_t = 3)]
    devices: usize,

    /// Access token lifetime in seconds
    #[arg(long, env = "SIM_TOKEN_TTL", default_value_t = 300)]
    token_ttl: i64,

    #[arg(long, env = "SIM_USERNAME", default_value = "demo@example.com")]
    username: String,

    #[arg(long, env = "SIM_PASSWORD", default_value = "demo")]
    password: String,

    /// Seconds between sensor updates
    #[arg(long, env = "SIM_TICK_SECS", default_value_t = 5)]
    tick_secs: u64,

    /// Chance per Point and tick of a timeline event
    #[arg(
        long,
        env = "SIM_EVENT_PROBABILITY",
        default_value_t = 0.05,
        value_parser = parse_probability
    )]
    event_probability: f64,
}

fn parse_probability(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{} is not a probability between 0 and 1", raw))
    }
}

struct SimState {
    rng: StdRng,
    points: Vec<Point>,
    events: VecDeque<Event>,
    tokens: TokenStore,
    username: String,
    password: String,
    event_probability: f64,
}

type SharedState = Arc<Mutex<SimState>>;

impl SimState {
    fn new(args: &Args, mut rng: StdRng) -> Self {
        let points = (0..args.devices)
            .map(|index| Point::new(&mut rng, index))
            .collect();
        Self {
            rng,
            points,
            events: VecDeque::new(),
            tokens: TokenStore::new("sim-user", ChronoDuration::seconds(args.token_ttl)),
            username: args.username.clone(),
            password: args.password.clone(),
            event_probability: args.event_probability,
        }
    }

    fn tick(&mut self) {
        let now = Utc::now();
        let probability = self.event_probability;
        let Self {
            rng, points, events, ..
        } = self;

        for point in points.iter_mut() {
            point.advance(rng, now);
            if let Some(event) = point.maybe_event(rng, probability, now) {
                debug!("{} emitted {}", event.device_id, event.event_type);
                events.push_front(event);
            }
        }
        events.truncate(MAX_EVENTS);
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting Minut API simulator");
    info!(
        "Address: {}, Points: {}, Token TTL: {}s",
        args.addr, args.devices, args.token_ttl
    );
    info!("Login with {} / {}", args.username, args.password);

    let state: SharedState = Arc::new(Mutex::new(SimState::new(&args, StdRng::from_entropy())));

    let ticker_state = state.clone();
    let tick = Duration::from_secs(args.tick_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            ticker_state.lock().await.tick();
        }
    });

    let listener = match tokio::net::TcpListener::bind(&args.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Failed to bind to {}: {}", args.addr, e);
            std::process::exit(1);
        }
    };
    info!("Serving http://{}/draft1", args.addr);

    if let Err(e) = axum::serve(listener, app(state)).await {
        warn!("HTTP server error: {}", e);
    }
}

fn app(state: SharedState) -> Router {
    let api = Router::new()
        .route("/auth/token", post(issue_token))
        .route("/devices", get(list_devices))
        .route("/devices/:device_id/:metric", get(sensor_values))
        .route("/timelines/me", get(timeline));

    Router::new().nest("/draft1", api).with_state(state)
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    grant_type: String,
    username: Option<String>,
    password: Option<String>,
    refresh_token: Option<String>,
}

async fn issue_token(State(state): State<SharedState>, Form(req): Form<TokenRequest>) -> Response {
    let mut state = state.lock().await;
    let now = Utc::now();

    let grant = match req.grant_type.as_str() {
        "password" => {
            let matches = req.username.as_deref() == Some(state.username.as_str())
                && req.password.as_deref() == Some(state.password.as_str());
            matches.then(|| state.tokens.issue(now))
        }
        "refresh_token" => req
            .refresh_token
            .as_deref()
            .and_then(|token| state.tokens.refresh(token, now)),
        other => {
            warn!("Unsupported grant type {}", other);
            None
        }
    };

    match grant {
        Some(grant) => {
            info!("Issued token via {} grant", req.grant_type);
            Json(grant).into_response()
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant" })),
        )
            .into_response(),
    }
}

fn authorize(state: &SimState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if state.tokens.is_valid(token, Utc::now()) {
        Ok(())
    } else {
        debug!("Rejected expired or unknown token");
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn list_devices(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let state = state.lock().await;
    if let Err(status) = authorize(&state, &headers) {
        return status.into_response();
    }

    let devices: Vec<_> = state
        .points
        .iter()
        .map(|point| {
            json!({
                "device_id": point.device_id,
                "description": point.description,
                "model": "Point",
            })
        })
        .collect();
    Json(json!({ "devices": devices })).into_response()
}

async fn sensor_values(
    State(state): State<SharedState>,
    Path((device_id, metric)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let state = state.lock().await;
    if let Err(status) = authorize(&state, &headers) {
        return status.into_response();
    }

    let sample = state
        .points
        .iter()
        .find(|point| point.device_id == device_id)
        .and_then(|point| point.sample(&metric));

    match sample {
        Some(sample) => Json(json!({ "values": [sample] })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct TimelineQuery {
    limit: Option<usize>,
}

async fn timeline(
    State(state): State<SharedState>,
    Query(query): Query<TimelineQuery>,
    headers: HeaderMap,
) -> Response {
    let state = state.lock().await;
    if let Err(status) = authorize(&state, &headers) {
        return status.into_response();
    }

    let limit = query.limit.unwrap_or(DEFAULT_TIMELINE_LIMIT);
    let events: Vec<&Event> = state.events.iter().take(limit).collect();
    Json(json!({ "events": events })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state(devices: usize, event_probability: f64) -> SharedState {
        let args = Args::parse_from([
            "minut-simulator",
            "--devices",
            &devices.to_string(),
            "--event-probability",
            &event_probability.to_string(),
        ]);
        Arc::new(Mutex::new(SimState::new(&args, StdRng::seed_from_u64(42))))
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn token_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/draft1/auth/token")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn authed_get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    async fn login(router: Router) -> Value {
        let (status, body) = send(
            router,
            token_request("grant_type=password&username=demo%40example.com&password=demo"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    #[test]
    fn test_event_probability_must_be_finite() {
        assert!(Args::try_parse_from(["minut-simulator", "--event-probability", "NaN"]).is_err());
        assert!(Args::try_parse_from(["minut-simulator", "--event-probability", "1.5"]).is_err());
        let args = Args::try_parse_from(["minut-simulator", "--event-probability", "0.25"]).unwrap();
        assert_eq!(args.event_probability, 0.25);
    }

    #[tokio::test]
    async fn test_password_grant_and_devices() {
        let router = app(test_state(2, 0.0));
        let grant = login(router.clone()).await;
        let token = grant["access_token"].as_str().unwrap();
        assert_eq!(grant["user_id"], "sim-user");

        let (status, body) = send(router.clone(), authed_get("/draft1/devices", token)).await;
        assert_eq!(status, StatusCode::OK);
        let devices = body["devices"].as_array().unwrap();
        assert_eq!(devices.len(), 2);

        let device_id = devices[0]["device_id"].as_str().unwrap();
        let uri = format!("/draft1/devices/{}/temperature", device_id);
        let (status, body) = send(router.clone(), authed_get(&uri, token)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["values"][0]["value"].is_number());

        let uri = format!("/draft1/devices/{}/pressure", device_id);
        let (status, _) = send(router, authed_get(&uri, token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rejects_bad_credentials_and_tokens() {
        let router = app(test_state(1, 0.0));

        let (status, _) = send(
            router.clone(),
            token_request("grant_type=password&username=demo%40example.com&password=wrong"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(router.clone(), authed_get("/draft1/devices", "bogus")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/draft1/devices")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_grant() {
        let router = app(test_state(1, 0.0));
        let grant = login(router.clone()).await;
        let refresh = grant["refresh_token"].as_str().unwrap();

        let body = format!("grant_type=refresh_token&refresh_token={}", refresh);
        let (status, renewed) = send(router.clone(), token_request(&body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(renewed["access_token"], grant["access_token"]);

        let (status, _) = send(router, token_request(&body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_timeline_newest_first() {
        let state = test_state(3, 1.0);
        {
            let mut sim = state.lock().await;
            sim.tick();
            sim.tick();
        }
        let router = app(state);
        let grant = login(router.clone()).await;
        let token = grant["access_token"].as_str().unwrap();

        let (status, body) = send(router.clone(), authed_get("/draft1/timelines/me", token)).await;
        assert_eq!(status, StatusCode::OK);
        let events = body["events"].as_array().unwrap();
        assert_eq!(events.len(), 6);
        assert!(events[0]["type"].is_string());

        let (_, body) = send(router, authed_get("/draft1/timelines/me?limit=2", token)).await;
        assert_eq!(body["events"].as_array().unwrap().len(), 2);
    }
}
