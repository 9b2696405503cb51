// Repository traits for upstream aircraft and geocoding data
use crate::domain::aircraft::AircraftRecord;
use crate::domain::geo::GeofenceBox;
use async_trait::async_trait;
use serde::Serialize;

#[async_trait]
pub trait AircraftRepository: Send + Sync {
    /// Resolve the ICAO identifiers registered for a manufacturer
    async fn resolve_identifiers(&self, manufacturer: &str) -> anyhow::Result<Vec<String>>;

    /// Fetch live records for one batch of identifiers
    async fn fetch_live(
        &self,
        manufacturer: &str,
        identifiers: &[String],
    ) -> anyhow::Result<Vec<AircraftRecord>>;

    /// Fetch live records for everything currently inside a bounding box
    async fn fetch_live_in_area(&self, area: &GeofenceBox) -> anyhow::Result<Vec<AircraftRecord>>;
}

/// A geocoded place
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Place {
    pub lat: f64,
    pub lon: f64,
    pub name: String,
    pub bbox: Option<GeofenceBox>,
}

#[async_trait]
pub trait GeocodingService: Send + Sync {
    /// Search for places by name or postal code
    async fn search(&self, query: &str) -> anyhow::Result<Vec<Place>>;

    /// Name of the place at a coordinate
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> anyhow::Result<String>;
}
