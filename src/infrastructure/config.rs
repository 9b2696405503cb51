use crate::application::tracking_session::SessionSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    pub upstream: UpstreamSettings,
    pub geocoding: GeocodingSettings,
    pub tracking: TrackingSettings,
    pub trails: TrailSettings,
    pub storage: StorageSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    /// Path templates; `${manufacturer}` is substituted
    pub identifiers_path: String,
    pub live_path: String,
    pub area_path: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeocodingSettings {
    pub base_url: String,
    pub user_agent: String,
    pub result_limit: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingSettings {
    pub batch_size: usize,
    pub batch_timeout_secs: u64,
    pub cache_ttl_ms: u64,
    pub full_refresh_interval_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrailSettings {
    pub max_length: usize,
    pub fade_window_secs: i64,
    pub persist: bool,
    pub persist_max_aircraft: usize,
    pub persist_max_points: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub dir: String,
    pub quota_bytes: usize,
    pub max_age_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub bind: String,
}

impl TrackerConfig {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            batch_size: self.tracking.batch_size,
            batch_timeout: Duration::from_secs(self.tracking.batch_timeout_secs),
            cache_ttl: Duration::from_millis(self.tracking.cache_ttl_ms),
            full_refresh_interval_ms: self.tracking.full_refresh_interval_secs * 1000,
            persist_trails: self.trails.persist,
            persist_trail_aircraft: self.trails.persist_max_aircraft,
            persist_trail_points: self.trails.persist_max_points,
        }
    }

    pub fn max_age_ms(&self) -> i64 {
        self.storage.max_age_hours * 60 * 60 * 1000
    }
}

fn builder_with_defaults() -> anyhow::Result<config::ConfigBuilder<config::builder::DefaultState>> {
    Ok(config::Config::builder()
        .set_default("upstream.base_url", "http://localhost:3001")?
        .set_default("upstream.identifiers_path", "/api/aircraft/icaos/${manufacturer}")?
        .set_default("upstream.live_path", "/api/tracking/live/${manufacturer}")?
        .set_default("upstream.area_path", "/api/tracking/area")?
        .set_default("upstream.request_timeout_secs", 30)?
        .set_default("geocoding.base_url", "https://nominatim.openstreetmap.org")?
        .set_default("geocoding.user_agent", "aircraft-tracker/0.1")?
        .set_default("geocoding.result_limit", 5)?
        .set_default("tracking.batch_size", 900)?
        .set_default("tracking.batch_timeout_secs", 60)?
        .set_default("tracking.cache_ttl_ms", 20_000)?
        .set_default("tracking.full_refresh_interval_secs", 3600)?
        .set_default("trails.max_length", 100)?
        .set_default("trails.fade_window_secs", 300)?
        .set_default("trails.persist", true)?
        .set_default("trails.persist_max_aircraft", 20)?
        .set_default("trails.persist_max_points", 100)?
        .set_default("storage.dir", "data")?
        .set_default("storage.quota_bytes", 5 * 1024 * 1024)?
        .set_default("storage.max_age_hours", 24)?
        .set_default("server.bind", "0.0.0.0:8080")?)
}

pub fn load_tracker_config() -> anyhow::Result<TrackerConfig> {
    let settings = builder_with_defaults()?
        .add_source(config::File::with_name("config/tracker").required(false))
        .add_source(config::Environment::with_prefix("TRACKER").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Replace template variables in a path or query string
pub fn prepare_path(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, &urlencoding::encode(value));
    }
    result
}
