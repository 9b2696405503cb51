// Application layer - Tracking use cases and the traits they depend on
pub mod aircraft_repository;
pub mod aircraft_store;
pub mod batched_fetcher;
pub mod field_merger;
pub mod geofence_service;
pub mod key_value_store;
pub mod request_coordinator;
pub mod tracking_session;
pub mod trail_recorder;
