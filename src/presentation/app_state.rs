// Application state for HTTP handlers
use crate::application::geofence_service::GeofenceService;
use crate::application::tracking_session::TrackingSession;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<TrackingSession>,
    pub geofence: Arc<GeofenceService>,
}
