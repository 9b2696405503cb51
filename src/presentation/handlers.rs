// HTTP request handlers
use crate::domain::aircraft::now_ms;
use crate::domain::error::TrackerError;
use crate::domain::session::{AircraftUpdate, RefreshStatus};
use crate::infrastructure::ndjson_stream::stream_from_receiver;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_GEOFENCE_RADIUS_KM: f64 = 25.0;
const STREAM_BUFFER: usize = 16;

#[derive(Deserialize)]
pub struct ExtendedQuery {
    pub model: Option<String>,
}

#[derive(Deserialize)]
pub struct GeofenceQuery {
    pub q: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub radius_km: Option<f64>,
}

#[derive(Deserialize)]
pub struct NearestQuery {
    pub lat: f64,
    pub lon: f64,
    pub n: Option<usize>,
}

#[derive(Serialize)]
struct RefreshResponse {
    ok: bool,
    message: String,
}

impl IntoResponse for RefreshStatus {
    fn into_response(self) -> Response {
        let status = if self.is_failure() { StatusCode::BAD_GATEWAY } else { StatusCode::OK };
        let body = RefreshResponse {
            ok: !self.is_failure(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiError(TrackerError);

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrackerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TrackerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TrackerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        };
        tracing::warn!("Request failed: {}", self.0);
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn start_tracking(
    Path(manufacturer): Path<String>,
    State(state): State<Arc<AppState>>,
) -> RefreshStatus {
    tracing::info!("Start tracking requested for {}", manufacturer);
    state.session.start(&manufacturer).await
}

pub async fn stop_tracking(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session.stop();
    StatusCode::NO_CONTENT
}

pub async fn full_refresh(State(state): State<Arc<AppState>>) -> RefreshStatus {
    state.session.full_refresh().await
}

pub async fn refresh_positions(State(state): State<Arc<AppState>>) -> RefreshStatus {
    state.session.refresh_positions_only().await
}

pub async fn session_snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.session.snapshot())
}

pub async fn tracked_aircraft(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.session.get_tracked_aircraft())
}

pub async fn extended_aircraft(
    Query(query): Query<ExtendedQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let model = query.model.as_deref().filter(|m| !m.trim().is_empty());
    Json(state.session.get_extended_aircraft(model))
}

pub async fn model_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.session.get_model_stats())
}

/// Stream aircraft updates as NDJSON, starting with the latest one
pub async fn stream_updates(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (tx, rx) = tokio::sync::mpsc::channel::<AircraftUpdate>(STREAM_BUFFER);

    let subscription = state.session.subscribe(move |update| {
        // slow clients miss intermediate updates rather than stall refreshes
        if tx.try_send(update.clone()).is_err() {
            tracing::debug!("Dropped update for lagging stream client");
        }
    });

    stream_from_receiver(rx, subscription)
}

pub async fn aircraft_trail(
    Path(icao): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let icao = icao.trim().to_lowercase();
    Json(state.session.trails().faded_trail(&icao, now_ms()))
}

pub async fn geofence(
    Query(query): Query<GeofenceQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let radius_km = query.radius_km.unwrap_or(DEFAULT_GEOFENCE_RADIUS_KM);

    let result = match (query.q.as_deref(), query.lat, query.lon) {
        (Some(place), _, _) => state.geofence.query_place(place, radius_km).await?,
        // out-of-range centers are clamped by the geofence, not rejected
        (None, Some(lat), Some(lon)) => state.geofence.query_area(lat, lon, radius_km).await?,
        _ => {
            return Err(TrackerError::InvalidInput("expected q or lat and lon".to_string()).into());
        }
    };

    Ok(Json(result))
}

pub async fn geofence_nearest(
    Query(query): Query<NearestQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.geofence.nearest(query.lat, query.lon, query.n.unwrap_or(5)))
}

/// Drop the fetch cache, the persisted aircraft and the persisted trails
pub async fn clear_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session.clear_cache();
    state.session.store().clear();
    tracing::info!("Cleared aircraft caches");
    StatusCode::NO_CONTENT
}
