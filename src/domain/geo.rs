// Geofence geometry: bounding boxes, haversine distance, coordinate checks
use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Latitude/longitude bounding box in degrees, all edges inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeofenceBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl GeofenceBox {
    pub fn center(&self) -> (f64, f64) {
        (
            (self.lat_min + self.lat_max) / 2.0,
            (self.lon_min + self.lon_max) / 2.0,
        )
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        point_in_box(lat, lon, self)
    }
}

/// Build a bounding box around a circle of `radius_km`.
///
/// Invalid input is logged and then clamped rather than rejected: NaN centers
/// fall back to 0, the center is pulled into range and a negative radius is
/// treated as zero. The longitude delta is widened by `1 / cos(lat)` so the
/// box keeps its ground width at higher latitudes; near the poles it spans
/// the whole longitude range.
pub fn build_geofence(center_lat: f64, center_lon: f64, radius_km: f64) -> GeofenceBox {
    if !validate_coordinates(center_lat, center_lon) {
        tracing::warn!(
            "Invalid geofence center ({}, {}), clamping to valid range",
            center_lat,
            center_lon
        );
    }

    let (lat, lon) = clamp_coordinates(center_lat, center_lon);
    let radius = if radius_km.is_finite() { radius_km.max(0.0) } else { 0.0 };

    let lat_delta = (radius / EARTH_RADIUS_KM).to_degrees();
    let cos_lat = lat.to_radians().cos();
    let lon_delta = if cos_lat > 1e-9 { lat_delta / cos_lat } else { 360.0 };

    GeofenceBox {
        lat_min: (lat - lat_delta).clamp(-90.0, 90.0),
        lat_max: (lat + lat_delta).clamp(-90.0, 90.0),
        lon_min: (lon - lon_delta).clamp(-180.0, 180.0),
        lon_max: (lon + lon_delta).clamp(-180.0, 180.0),
    }
}

/// Pull a coordinate into range, NaN becoming 0
pub fn clamp_coordinates(lat: f64, lon: f64) -> (f64, f64) {
    (sanitize(lat).clamp(-90.0, 90.0), sanitize(lon).clamp(-180.0, 180.0))
}

fn sanitize(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value }
}

pub fn validate_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Great-circle distance in kilometers
pub fn haversine_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

pub fn point_in_box(lat: f64, lon: f64, bbox: &GeofenceBox) -> bool {
    lat >= bbox.lat_min && lat <= bbox.lat_max && lon >= bbox.lon_min && lon <= bbox.lon_max
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_geofence_symmetric_at_equator() {
        let bbox = build_geofence(0.0, 0.0, 100.0);

        let (lat, lon) = bbox.center();
        assert!(lat.abs() < EPSILON);
        assert!(lon.abs() < EPSILON);

        let lat_span = bbox.lat_max - bbox.lat_min;
        let lon_span = bbox.lon_max - bbox.lon_min;
        assert!((lat_span - lon_span).abs() < EPSILON, "{} vs {}", lat_span, lon_span);

        // 100km is roughly 0.9 degrees of latitude
        assert!((bbox.lat_max - 0.8993).abs() < 1e-3);
    }

    #[test]
    fn test_geofence_widens_longitude_at_high_latitude() {
        let bbox = build_geofence(80.0, 0.0, 100.0);
        let lat_span = bbox.lat_max - bbox.lat_min;
        let lon_span = bbox.lon_max - bbox.lon_min;
        assert!(lon_span > lat_span * 5.0, "lat span {}, lon span {}", lat_span, lon_span);
    }

    #[test]
    fn test_geofence_clamps_bounds() {
        let bbox = build_geofence(89.9, 179.9, 500.0);
        assert_eq!(bbox.lat_max, 90.0);
        assert_eq!(bbox.lon_max, 180.0);
        assert!(bbox.lat_min >= -90.0);
        assert!(bbox.lon_min >= -180.0);
    }

    #[test]
    fn test_geofence_lenient_on_invalid_input() {
        let bbox = build_geofence(f64::NAN, 500.0, -10.0);
        assert_eq!(bbox.lat_min, 0.0);
        assert_eq!(bbox.lat_max, 0.0);
        assert_eq!(bbox.lon_min, 180.0);
        assert_eq!(bbox.lon_max, 180.0);
    }

    #[test]
    fn test_clamp_coordinates() {
        assert_eq!(clamp_coordinates(91.0, -200.0), (90.0, -180.0));
        assert_eq!(clamp_coordinates(f64::NAN, 12.5), (0.0, 12.5));
        assert_eq!(clamp_coordinates(-33.9, 151.2), (-33.9, 151.2));
    }

    #[test]
    fn test_geofence_at_pole_spans_all_longitudes() {
        let bbox = build_geofence(90.0, 10.0, 50.0);
        assert_eq!(bbox.lon_min, -180.0);
        assert_eq!(bbox.lon_max, 180.0);
    }

    #[test]
    fn test_validate_coordinates() {
        assert!(validate_coordinates(45.0, -120.0));
        assert!(validate_coordinates(-90.0, 180.0));
        assert!(!validate_coordinates(90.1, 0.0));
        assert!(!validate_coordinates(0.0, -180.5));
        assert!(!validate_coordinates(f64::NAN, 0.0));
        assert!(!validate_coordinates(0.0, f64::INFINITY));
    }

    #[test]
    fn test_haversine_london_paris() {
        let dist = haversine_distance_km(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((dist - 343.5).abs() < 5.0, "Distance: {} km", dist);
    }

    #[test]
    fn test_haversine_same_point() {
        assert!(haversine_distance_km(51.5, -0.1, 51.5, -0.1).abs() < EPSILON);
    }

    #[test]
    fn test_point_in_box_inclusive_edges() {
        let bbox = GeofenceBox { lat_min: 10.0, lat_max: 20.0, lon_min: 30.0, lon_max: 40.0 };
        assert!(point_in_box(10.0, 30.0, &bbox));
        assert!(point_in_box(20.0, 40.0, &bbox));
        assert!(point_in_box(15.0, 35.0, &bbox));
        assert!(!point_in_box(9.999, 35.0, &bbox));
        assert!(!point_in_box(15.0, 40.001, &bbox));
    }
}
