// Nominatim geocoding client
use crate::application::aircraft_repository::{GeocodingService, Place};
use crate::domain::geo::GeofenceBox;
use crate::infrastructure::config::GeocodingSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    result_limit: u32,
}

/// Nominatim encodes every number as a string
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
    /// `[south, north, west, east]`
    #[serde(default)]
    boundingbox: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct NominatimReverse {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl NominatimGeocoder {
    pub fn new(settings: &GeocodingSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            user_agent: settings.user_agent.clone(),
            result_limit: settings.result_limit,
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        tracing::debug!("GET {}", url);

        // Nominatim's usage policy requires an identifying user agent
        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to geocoder")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Geocoder request failed with status {}: {}", status, body);
        }
        Ok(response)
    }
}

fn to_place(raw: NominatimPlace) -> Option<Place> {
    let lat = raw.lat.parse::<f64>().ok()?;
    let lon = raw.lon.parse::<f64>().ok()?;

    let bbox = raw.boundingbox.and_then(|values| {
        let parsed: Vec<f64> = values.iter().filter_map(|v| v.parse().ok()).collect();
        match parsed.as_slice() {
            [south, north, west, east] => Some(GeofenceBox {
                lat_min: *south,
                lat_max: *north,
                lon_min: *west,
                lon_max: *east,
            }),
            _ => None,
        }
    });

    Some(Place {
        lat,
        lon,
        name: raw.display_name,
        bbox,
    })
}

fn parse_search(body: &str) -> Result<Vec<Place>> {
    let raw: Vec<NominatimPlace> = serde_json::from_str(body).context("Failed to parse geocoder response")?;
    Ok(raw.into_iter().filter_map(to_place).collect())
}

fn parse_reverse(body: &str) -> Result<String> {
    let raw: NominatimReverse = serde_json::from_str(body).context("Failed to parse geocoder response")?;
    if let Some(error) = raw.error {
        anyhow::bail!("Reverse geocoding failed: {}", error);
    }
    raw.display_name
        .filter(|name| !name.is_empty())
        .context("Reverse geocoding returned no place name")
}

#[async_trait]
impl GeocodingService for NominatimGeocoder {
    async fn search(&self, query: &str) -> Result<Vec<Place>> {
        let url = format!(
            "{}/search?format=json&limit={}&q={}",
            self.base_url,
            self.result_limit,
            urlencoding::encode(query)
        );
        let body = self.get(&url).await?.text().await?;
        parse_search(&body)
    }

    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<String> {
        let url = format!("{}/reverse?format=json&lat={}&lon={}", self.base_url, lat, lon);
        let body = self.get(&url).await?.text().await?;
        parse_reverse(&body)
    }
}
