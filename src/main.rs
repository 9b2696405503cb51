// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use anyhow::Context;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use crate::application::aircraft_store::PersistentAircraftStore;
use crate::application::geofence_service::GeofenceService;
use crate::application::key_value_store::KeyValueStore;
use crate::application::tracking_session::TrackingSession;
use crate::application::trail_recorder::TrailRecorder;
use crate::infrastructure::config::load_tracker_config;
use crate::infrastructure::file_store::FileKeyValueStore;
use crate::infrastructure::http_repository::HttpAircraftRepository;
use crate::infrastructure::memory_store::MemoryKeyValueStore;
use crate::infrastructure::nominatim_geocoder::NominatimGeocoder;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    aircraft_trail, clear_cache, extended_aircraft, full_refresh, geofence, geofence_nearest,
    health_check, model_stats, refresh_positions, session_snapshot, start_tracking, stop_tracking,
    stream_updates, tracked_aircraft,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = load_tracker_config()?;

    // Persistent storage degrades to in-memory-only tracking when unavailable
    let storage: Option<Arc<dyn KeyValueStore>> =
        match FileKeyValueStore::open(&config.storage.dir, config.storage.quota_bytes) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                tracing::error!("Aircraft storage at {} unavailable: {}", config.storage.dir, e);
                None
            }
        };
    let session_scope: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
    let store = PersistentAircraftStore::new(storage, Some(session_scope), config.max_age_ms());
    tracing::info!("Tracking session id {}", store.get_or_create_session_id());

    // Create repositories (infrastructure layer)
    let repository = Arc::new(HttpAircraftRepository::new(&config.upstream)?);
    let geocoder = Arc::new(NominatimGeocoder::new(&config.geocoding));

    // Create services (application layer)
    let trails = TrailRecorder::new(config.trails.max_length, config.trails.fade_window_secs * 1000);
    let session = Arc::new(TrackingSession::new(
        repository.clone(),
        store,
        trails,
        config.session_settings(),
    ));
    let geofence_service = Arc::new(GeofenceService::new(repository, geocoder));

    let _status_log = session.subscribe_to_status(|status| {
        tracing::info!("Tracking status: {}", status);
    });

    // Create application state
    let state = Arc::new(AppState {
        session,
        geofence: geofence_service,
    });

    // Build router (presentation layer)
    // The NDJSON stream stays uncompressed so updates are flushed as they happen
    let api = Router::new()
        .route("/healthz", get(health_check))
        .route("/tracking/start/:manufacturer", post(start_tracking))
        .route("/tracking/stop", post(stop_tracking))
        .route("/tracking/refresh", post(full_refresh))
        .route("/tracking/refresh/positions", post(refresh_positions))
        .route("/tracking/session", get(session_snapshot))
        .route("/tracking/aircraft", get(tracked_aircraft))
        .route("/tracking/extended", get(extended_aircraft))
        .route("/tracking/models", get(model_stats))
        .route("/trails/:icao", get(aircraft_trail))
        .route("/geofence", get(geofence))
        .route("/geofence/nearest", get(geofence_nearest))
        .route("/cache", delete(clear_cache))
        .layer(CompressionLayer::new());

    let router = Router::new()
        .route("/tracking/stream", get(stream_updates))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    tracing::info!("Starting aircraft-tracker service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
