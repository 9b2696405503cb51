// Aircraft domain model
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aircraft records keyed by ICAO identifier
pub type AircraftMap = HashMap<String, AircraftRecord>;

/// A single aircraft as seen by the tracker.
///
/// Fields fall into two categories with different merge rules: dynamic
/// (position) fields listed in [`DynamicField`] and static (identity) fields
/// listed in [`StaticField`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AircraftRecord {
    pub icao: String,

    // Dynamic fields
    #[serde(default, rename = "lat")]
    pub latitude: Option<f64>,
    #[serde(default, rename = "lon")]
    pub longitude: Option<f64>,
    #[serde(default, rename = "alt")]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub velocity: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub on_ground: Option<bool>,
    #[serde(default, rename = "last_contact")]
    pub last_contact_time: Option<i64>,

    // Static fields
    #[serde(default)]
    pub registration: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default, rename = "N-NUMBER")]
    pub n_number: Option<String>,
    #[serde(default)]
    pub aircraft_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner_type: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,

    /// Epoch milliseconds of the last merge that touched this record
    #[serde(default)]
    pub last_updated: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicField {
    Latitude,
    Longitude,
    Altitude,
    Velocity,
    Heading,
    OnGround,
    LastContactTime,
}

impl DynamicField {
    pub const ALL: [DynamicField; 7] = [
        DynamicField::Latitude,
        DynamicField::Longitude,
        DynamicField::Altitude,
        DynamicField::Velocity,
        DynamicField::Heading,
        DynamicField::OnGround,
        DynamicField::LastContactTime,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticField {
    Registration,
    Model,
    Manufacturer,
    NNumber,
    AircraftType,
    Name,
    OwnerType,
    Operator,
    City,
    State,
}

impl StaticField {
    pub const ALL: [StaticField; 10] = [
        StaticField::Registration,
        StaticField::Model,
        StaticField::Manufacturer,
        StaticField::NNumber,
        StaticField::AircraftType,
        StaticField::Name,
        StaticField::OwnerType,
        StaticField::Operator,
        StaticField::City,
        StaticField::State,
    ];
}

impl AircraftRecord {
    pub fn new(icao: impl Into<String>) -> Self {
        Self {
            icao: icao.into(),
            ..Default::default()
        }
    }

    pub fn with_position(mut self, latitude: f64, longitude: f64, altitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self.altitude = Some(altitude);
        self
    }

    /// Lower-cased, trimmed identifier; `None` if nothing is left
    pub fn normalize_icao(icao: &str) -> Option<String> {
        let icao = icao.trim().to_lowercase();
        if icao.is_empty() { None } else { Some(icao) }
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    /// Copy one dynamic field from `other` if it carries a value
    pub fn take_dynamic(&mut self, other: &AircraftRecord, field: DynamicField) {
        match field {
            DynamicField::Latitude => overwrite(&mut self.latitude, other.latitude),
            DynamicField::Longitude => overwrite(&mut self.longitude, other.longitude),
            DynamicField::Altitude => overwrite(&mut self.altitude, other.altitude),
            DynamicField::Velocity => overwrite(&mut self.velocity, other.velocity),
            DynamicField::Heading => overwrite(&mut self.heading, other.heading),
            DynamicField::OnGround => overwrite(&mut self.on_ground, other.on_ground),
            DynamicField::LastContactTime => {
                overwrite(&mut self.last_contact_time, other.last_contact_time)
            }
        }
    }

    pub fn static_value(&self, field: StaticField) -> Option<&str> {
        self.static_slot(field).as_deref()
    }

    fn static_slot(&self, field: StaticField) -> &Option<String> {
        match field {
            StaticField::Registration => &self.registration,
            StaticField::Model => &self.model,
            StaticField::Manufacturer => &self.manufacturer,
            StaticField::NNumber => &self.n_number,
            StaticField::AircraftType => &self.aircraft_type,
            StaticField::Name => &self.name,
            StaticField::OwnerType => &self.owner_type,
            StaticField::Operator => &self.operator,
            StaticField::City => &self.city,
            StaticField::State => &self.state,
        }
    }

    pub fn static_slot_mut(&mut self, field: StaticField) -> &mut Option<String> {
        match field {
            StaticField::Registration => &mut self.registration,
            StaticField::Model => &mut self.model,
            StaticField::Manufacturer => &mut self.manufacturer,
            StaticField::NNumber => &mut self.n_number,
            StaticField::AircraftType => &mut self.aircraft_type,
            StaticField::Name => &mut self.name,
            StaticField::OwnerType => &mut self.owner_type,
            StaticField::Operator => &mut self.operator,
            StaticField::City => &mut self.city,
            StaticField::State => &mut self.state,
        }
    }

    /// Model name used for grouping, "Unknown" when not learned yet
    pub fn model_label(&self) -> &str {
        match self.model.as_deref().map(str::trim) {
            Some(model) if !model.is_empty() => model,
            _ => "Unknown",
        }
    }
}

fn overwrite<T: Copy>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

/// Current time as epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
