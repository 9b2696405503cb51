// Upstream tracking API repository implementation
use crate::application::aircraft_repository::AircraftRepository;
use crate::domain::aircraft::AircraftRecord;
use crate::domain::geo::GeofenceBox;
use crate::infrastructure::config::{prepare_path, UpstreamSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpAircraftRepository {
    client: reqwest::Client,
    base_url: String,
    identifiers_path: String,
    live_path: String,
    area_path: String,
}

#[derive(Debug, Deserialize)]
struct IdentifiersResponse {
    #[serde(default)]
    icaos: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LiveResponse {
    #[serde(default)]
    aircraft: Vec<AircraftRecord>,
}

impl HttpAircraftRepository {
    pub fn new(settings: &UpstreamSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            identifiers_path: settings.identifiers_path.clone(),
            live_path: settings.live_path.clone(),
            area_path: settings.area_path.clone(),
        })
    }

    fn manufacturer_url(&self, template: &str, manufacturer: &str) -> String {
        let mut vars = HashMap::new();
        vars.insert("manufacturer".to_string(), manufacturer.to_string());
        format!("{}{}", self.base_url, prepare_path(template, &vars))
    }

    fn build_live_url(&self, manufacturer: &str, identifiers: &[String]) -> String {
        let joined = identifiers.join(",");
        format!(
            "{}?icaos={}",
            self.manufacturer_url(&self.live_path, manufacturer),
            urlencoding::encode(&joined)
        )
    }

    fn build_area_url(&self, area: &GeofenceBox) -> String {
        format!(
            "{}{}?lamin={}&lamax={}&lomin={}&lomax={}",
            self.base_url, self.area_path, area.lat_min, area.lat_max, area.lon_min, area.lon_max
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to tracking API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Tracking API request failed with status {}: {}", status, body);
        }

        response
            .json::<T>()
            .await
            .context("Failed to parse tracking API response")
    }
}

/// Normalized, de-duplicated identifiers in upstream order
fn parse_identifiers(response: IdentifiersResponse) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    response
        .icaos
        .iter()
        .filter_map(|icao| AircraftRecord::normalize_icao(icao))
        .filter(|icao| seen.insert(icao.clone()))
        .collect()
}

fn parse_live(response: LiveResponse) -> Vec<AircraftRecord> {
    response
        .aircraft
        .into_iter()
        .filter_map(|mut record| {
            record.icao = AircraftRecord::normalize_icao(&record.icao)?;
            Some(record)
        })
        .collect()
}

#[async_trait]
impl AircraftRepository for HttpAircraftRepository {
    async fn resolve_identifiers(&self, manufacturer: &str) -> Result<Vec<String>> {
        let url = self.manufacturer_url(&self.identifiers_path, manufacturer);
        let response: IdentifiersResponse = self
            .get_json(&url)
            .await
            .with_context(|| format!("Failed to resolve identifiers for {}", manufacturer))?;

        let identifiers = parse_identifiers(response);
        tracing::debug!("Resolved {} identifiers for {}", identifiers.len(), manufacturer);
        Ok(identifiers)
    }

    async fn fetch_live(&self, manufacturer: &str, identifiers: &[String]) -> Result<Vec<AircraftRecord>> {
        if identifiers.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.build_live_url(manufacturer, identifiers);
        let response: LiveResponse = self.get_json(&url).await?;
        Ok(parse_live(response))
    }

    async fn fetch_live_in_area(&self, area: &GeofenceBox) -> Result<Vec<AircraftRecord>> {
        let url = self.build_area_url(area);
        let response: LiveResponse = self.get_json(&url).await?;
        Ok(parse_live(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository() -> HttpAircraftRepository {
        HttpAircraftRepository::new(&UpstreamSettings {
            base_url: "http://tracker.local/".to_string(),
            identifiers_path: "/api/aircraft/icaos/${manufacturer}".to_string(),
            live_path: "/api/tracking/live/${manufacturer}".to_string(),
            area_path: "/api/tracking/area".to_string(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_build_urls() {
        let repo = repository();
        let ids = vec!["a1b2c3".to_string(), "d4e5f6".to_string()];

        assert_eq!(
            repo.build_live_url("CESSNA", &ids),
            "http://tracker.local/api/tracking/live/CESSNA?icaos=a1b2c3%2Cd4e5f6"
        );

        let area = GeofenceBox {
            lat_min: 1.5,
            lat_max: 2.5,
            lon_min: -3.0,
            lon_max: 4.0,
        };
        assert_eq!(
            repo.build_area_url(&area),
            "http://tracker.local/api/tracking/area?lamin=1.5&lamax=2.5&lomin=-3&lomax=4"
        );
    }

    #[test]
    fn test_parse_identifiers_normalizes() {
        let response: IdentifiersResponse =
            serde_json::from_str(r#"{"icaos": [" A1B2C3 ", "", "a1b2c3", "FFFFFF"]}"#).unwrap();
        assert_eq!(parse_identifiers(response), vec!["a1b2c3", "ffffff"]);

        let empty: IdentifiersResponse = serde_json::from_str("{}").unwrap();
        assert!(parse_identifiers(empty).is_empty());
    }

    #[test]
    fn test_parse_live_drops_blank_identifiers() {
        let response: LiveResponse = serde_json::from_str(
            r#"{"aircraft": [
                {"icao": "ABC123", "lat": 37.6, "lon": -97.4, "alt": 1200.0, "model": "172S"},
                {"icao": "  ", "lat": 1.0, "lon": 1.0}
            ]}"#,
        )
        .unwrap();

        let records = parse_live(response);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].icao, "abc123");
        assert_eq!(records[0].position(), Some((37.6, -97.4)));
        assert_eq!(records[0].model.as_deref(), Some("172S"));
    }
}
