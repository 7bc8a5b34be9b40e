use crate::model::{Device, EntitiesResponse, EntityState};
use crate::store::{EntityStore, HealthStatus};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::{debug, error};

#[derive(Debug, Clone)]
struct AppState {
    store: EntityStore,
}

#[derive(Debug, Deserialize)]
pub struct EntitiesQuery {
    device_id: Option<String>,
}

pub fn create_router(store: EntityStore) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/health", get(get_health))
        .route("/api/v1/devices", get(get_devices))
        .route("/api/v1/entities", get(get_entities))
        .route("/api/v1/entities/:entity_id", get(get_entity))
        .with_state(state)
}

async fn get_health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.store.health().await)
}

async fn get_devices(State(state): State<AppState>) -> Json<Vec<Device>> {
    Json(state.store.devices().await)
}

async fn get_entities(
    State(state): State<AppState>,
    Query(params): Query<EntitiesQuery>,
) -> Json<EntitiesResponse> {
    let data = state.store.entities(params.device_id.as_deref()).await;
    Json(EntitiesResponse {
        total: data.len(),
        data,
    })
}

async fn get_entity(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Json<EntityState>, AppError> {
    state
        .store
        .entity(&entity_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Unknown entity: {}", entity_id)))
}

struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: anyhow::anyhow!(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("API error: {}", self.error);
        } else {
            debug!("API error: {}", self.error);
        }
        (self.status, self.error.to_string()).into_response()
    }
}
