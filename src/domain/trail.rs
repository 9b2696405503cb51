// Trail domain model
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl TrailPoint {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            timestamp,
        }
    }

    /// Render weight in `[0, 1]`: 1 for a fresh point, 0 once older than `fade_window_ms`
    pub fn fade_weight(&self, now_ms: i64, fade_window_ms: i64) -> f64 {
        if fade_window_ms <= 0 {
            return 1.0;
        }
        let age = (now_ms - self.timestamp).max(0) as f64;
        (1.0 - age / fade_window_ms as f64).clamp(0.0, 1.0)
    }
}

/// A trail point paired with its render weight
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FadedPoint {
    #[serde(flatten)]
    pub point: TrailPoint,
    pub weight: f64,
}

/// Bounded trail snapshot written to persistent storage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedTrails {
    pub trails: HashMap<String, Vec<TrailPoint>>,
    pub timestamp: i64,
}
