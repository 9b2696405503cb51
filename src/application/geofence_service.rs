// Geofence service - live aircraft inside a user-placed circle, independent of the session
use crate::application::aircraft_repository::{AircraftRepository, GeocodingService};
use crate::domain::aircraft::AircraftRecord;
use crate::domain::error::TrackerError;
use crate::domain::geo::{build_geofence, clamp_coordinates, haversine_distance_km, GeofenceBox};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Serialize)]
pub struct GeofencedAircraft {
    #[serde(flatten)]
    pub record: AircraftRecord,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeofenceResult {
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_km: f64,
    pub bbox: GeofenceBox,
    pub place_name: Option<String>,
    /// Sorted by distance from the center
    pub aircraft: Vec<GeofencedAircraft>,
}

pub struct GeofenceService {
    repository: Arc<dyn AircraftRepository>,
    geocoder: Arc<dyn GeocodingService>,
    last_result: Mutex<Vec<GeofencedAircraft>>,
}

impl GeofenceService {
    pub fn new(repository: Arc<dyn AircraftRepository>, geocoder: Arc<dyn GeocodingService>) -> Self {
        Self {
            repository,
            geocoder,
            last_result: Mutex::new(Vec::new()),
        }
    }

    fn last_result(&self) -> MutexGuard<'_, Vec<GeofencedAircraft>> {
        self.last_result.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Geocode a place name or postal code, then query around the first match
    pub async fn query_place(&self, query: &str, radius_km: f64) -> Result<GeofenceResult, TrackerError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(TrackerError::InvalidInput("empty place query".to_string()));
        }

        let places = self.geocoder.search(query).await?;
        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| TrackerError::InvalidInput(format!("no place found for '{}'", query)))?;

        tracing::info!("Geocoded '{}' to {} ({}, {})", query, place.name, place.lat, place.lon);
        self.run_query(place.lat, place.lon, radius_km, Some(place.name)).await
    }

    /// Live aircraft within `radius_km` of a point
    pub async fn query_area(&self, lat: f64, lon: f64, radius_km: f64) -> Result<GeofenceResult, TrackerError> {
        let place_name = match self.geocoder.reverse_geocode(lat, lon).await {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::warn!("Reverse geocoding ({}, {}) failed: {:#}", lat, lon, e);
                None
            }
        };
        self.run_query(lat, lon, radius_km, place_name).await
    }

    async fn run_query(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        place_name: Option<String>,
    ) -> Result<GeofenceResult, TrackerError> {
        let bbox = build_geofence(lat, lon, radius_km);
        // distances are measured from the requested point; a clamped box
        // is no longer centered on it
        let (center_lat, center_lon) = clamp_coordinates(lat, lon);

        let fetched = self.repository.fetch_live_in_area(&bbox).await?;
        let total = fetched.len();

        let mut aircraft: Vec<GeofencedAircraft> = fetched
            .into_iter()
            .filter_map(|record| {
                let (a_lat, a_lon) = record.position()?;
                if !bbox.contains(a_lat, a_lon) {
                    return None;
                }
                Some(GeofencedAircraft {
                    distance_km: haversine_distance_km(center_lat, center_lon, a_lat, a_lon),
                    record,
                })
            })
            .collect();
        aircraft.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

        tracing::info!(
            "Geofence ({:.4}, {:.4}, {}km): {} of {} aircraft inside",
            center_lat,
            center_lon,
            radius_km,
            aircraft.len(),
            total
        );
        *self.last_result() = aircraft.clone();

        Ok(GeofenceResult {
            center_lat,
            center_lon,
            radius_km,
            bbox,
            place_name,
            aircraft,
        })
    }

    /// The `n` aircraft of the last geofence result closest to a point
    pub fn nearest(&self, lat: f64, lon: f64, n: usize) -> Vec<GeofencedAircraft> {
        let mut candidates: Vec<GeofencedAircraft> = self
            .last_result()
            .iter()
            .filter_map(|entry| {
                let (a_lat, a_lon) = entry.record.position()?;
                Some(GeofencedAircraft {
                    record: entry.record.clone(),
                    distance_km: haversine_distance_km(lat, lon, a_lat, a_lon),
                })
            })
            .collect();
        candidates.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        candidates.truncate(n);
        candidates
    }
}
