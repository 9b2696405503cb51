// Tracking session domain models
use super::aircraft::AircraftRecord;
use super::trail::TrailPoint;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackingSessionState {
    pub active: bool,
    pub manufacturer: Option<String>,
    pub last_full_refresh_time: Option<i64>,
    pub tracked_identifiers: BTreeSet<String>,
}

impl TrackingSessionState {
    pub fn is_tracking(&self, manufacturer: &str) -> bool {
        self.active && self.manufacturer.as_deref() == Some(manufacturer)
    }
}

/// Session state as handed to the rendering layer
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub state: TrackingSessionState,
    pub aircraft_count: usize,
    /// Set while a background refresh runs so the map view does not jump
    pub suppress_camera_fit: bool,
    pub status: String,
}

/// Payload delivered to update subscribers
#[derive(Debug, Clone, Serialize)]
pub struct AircraftUpdate {
    pub aircraft: Vec<AircraftRecord>,
    pub manufacturer: Option<String>,
    pub timestamp: i64,
    pub suppress_camera_fit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Active(String),
    Inactive,
    Error(String),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active(manufacturer) => write!(f, "active: {}", manufacturer),
            SessionStatus::Inactive => write!(f, "inactive"),
            SessionStatus::Error(message) => write!(f, "error: {}", message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    Full,
    Optimized,
    PositionsOnly,
}

/// Terminal outcome of a session operation; never an error to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshStatus {
    Updated { mode: RefreshMode, aircraft: usize, live: usize },
    Unchanged,
    Skipped,
    Inactive,
    Failed(String),
}

impl RefreshStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, RefreshStatus::Failed(_))
    }
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshStatus::Updated { mode, aircraft, live } => {
                let mode = match mode {
                    RefreshMode::Full => "Full refresh",
                    RefreshMode::Optimized => "Optimized refresh",
                    RefreshMode::PositionsOnly => "Position refresh",
                };
                write!(f, "{}: {} aircraft tracked, {} live", mode, aircraft, live)
            }
            RefreshStatus::Unchanged => write!(f, "Already tracking"),
            RefreshStatus::Skipped => write!(f, "Refresh already in progress"),
            RefreshStatus::Inactive => write!(f, "No active tracking session"),
            RefreshStatus::Failed(message) => write!(f, "Refresh failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub total: usize,
    pub live: usize,
}

/// A tracked aircraft with its trail, for detail panels
#[derive(Debug, Clone, Serialize)]
pub struct ExtendedAircraft {
    #[serde(flatten)]
    pub record: AircraftRecord,
    pub trail: Vec<TrailPoint>,
    /// Seen in the most recent live fetch
    pub live: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_status_strings() {
        let status = RefreshStatus::Updated { mode: RefreshMode::Optimized, aircraft: 3, live: 2 };
        assert_eq!(status.to_string(), "Optimized refresh: 3 aircraft tracked, 2 live");
        assert_eq!(
            RefreshStatus::Failed("boom".to_string()).to_string(),
            "Refresh failed: boom"
        );
        assert!(RefreshStatus::Failed(String::new()).is_failure());
        assert!(!RefreshStatus::Skipped.is_failure());
    }

    #[test]
    fn test_session_status_strings() {
        assert_eq!(SessionStatus::Active("Cessna".to_string()).to_string(), "active: Cessna");
        assert_eq!(SessionStatus::Inactive.to_string(), "inactive");
    }

    #[test]
    fn test_is_tracking() {
        let mut state = TrackingSessionState::default();
        assert!(!state.is_tracking("Cessna"));
        state.active = true;
        state.manufacturer = Some("Cessna".to_string());
        assert!(state.is_tracking("Cessna"));
        assert!(!state.is_tracking("Piper"));
    }
}
