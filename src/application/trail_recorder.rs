// Trail recorder - bounded per-aircraft position history
use crate::domain::aircraft::AircraftRecord;
use crate::domain::geo::EARTH_RADIUS_KM;
use crate::domain::trail::{FadedPoint, PersistedTrails, TrailPoint};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_MAX_TRAIL_LENGTH: usize = 100;
pub const DEFAULT_FADE_WINDOW_MS: i64 = 5 * 60 * 1000;
pub const DEFAULT_PERSIST_MAX_AIRCRAFT: usize = 20;

// Backfill shape for aircraft without organic history
const BACKFILL_POINTS: i64 = 5;
const BACKFILL_STEP_MS: i64 = 15_000;

pub struct TrailRecorder {
    trails: Mutex<HashMap<String, VecDeque<TrailPoint>>>,
    max_trail_length: usize,
    fade_window_ms: i64,
}

impl Default for TrailRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRAIL_LENGTH, DEFAULT_FADE_WINDOW_MS)
    }
}

impl TrailRecorder {
    pub fn new(max_trail_length: usize, fade_window_ms: i64) -> Self {
        Self {
            trails: Mutex::new(HashMap::new()),
            max_trail_length: max_trail_length.max(1),
            fade_window_ms,
        }
    }

    fn trails(&self) -> MutexGuard<'_, HashMap<String, VecDeque<TrailPoint>>> {
        self.trails.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Push a point, evicting the oldest ones beyond the length limit
    pub fn append(&self, icao: &str, point: TrailPoint) {
        let mut trails = self.trails();
        let trail = trails.entry(icao.to_string()).or_default();
        trail.push_back(point);
        while trail.len() > self.max_trail_length {
            trail.pop_front();
        }
    }

    /// Append the current position of every record that has one
    pub fn record_positions(&self, records: &[AircraftRecord], now: i64) -> usize {
        let mut recorded = 0;
        for record in records {
            if let Some((lat, lon)) = record.position() {
                self.append(&record.icao, TrailPoint::new(lat, lon, record.altitude.unwrap_or(0.0), now));
                recorded += 1;
            }
        }
        recorded
    }

    pub fn get_trail(&self, icao: &str) -> Vec<TrailPoint> {
        self.trails()
            .get(icao)
            .map(|trail| trail.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Trail points with their age-based render weight
    pub fn faded_trail(&self, icao: &str, now: i64) -> Vec<FadedPoint> {
        self.get_trail(icao)
            .into_iter()
            .map(|point| FadedPoint {
                weight: point.fade_weight(now, self.fade_window_ms),
                point,
            })
            .collect()
    }

    /// Synthesize a short history for aircraft that have a position but no
    /// trail yet, dead-reckoning backwards along heading and speed. Best
    /// effort only; organic points replace it as they arrive.
    pub fn force_generate(&self, records: &[AircraftRecord], now: i64) -> usize {
        let mut trails = self.trails();
        let mut generated = 0;

        for record in records {
            let Some((lat, lon)) = record.position() else {
                continue;
            };
            if trails.get(&record.icao).is_some_and(|trail| !trail.is_empty()) {
                continue;
            }

            let altitude = record.altitude.unwrap_or(0.0);
            let trail: VecDeque<TrailPoint> = match (record.velocity, record.heading) {
                (Some(speed), Some(heading)) if speed > 0.0 => (0..BACKFILL_POINTS)
                    .rev()
                    .map(|step| {
                        let seconds_back = (step * BACKFILL_STEP_MS) as f64 / 1000.0;
                        let (p_lat, p_lon) = project_back(lat, lon, heading, speed * seconds_back);
                        TrailPoint::new(p_lat, p_lon, altitude, now - step * BACKFILL_STEP_MS)
                    })
                    .collect(),
                _ => VecDeque::from([TrailPoint::new(lat, lon, altitude, now)]),
            };

            trails.insert(record.icao.clone(), trail);
            generated += 1;
        }

        if generated > 0 {
            tracing::debug!("Generated backfill trails for {} aircraft", generated);
        }
        generated
    }

    /// Drop trails of aircraft that are no longer tracked
    pub fn retain(&self, icaos: &BTreeSet<String>) {
        self.trails().retain(|icao, _| icaos.contains(icao));
    }

    pub fn clear(&self) {
        self.trails().clear();
    }

    pub fn trail_count(&self) -> usize {
        self.trails().len()
    }

    /// Snapshot of the most recently updated trails, bounded to
    /// `max_aircraft` trails of at most `max_points` points each
    pub fn snapshot(&self, max_aircraft: usize, max_points: usize, now: i64) -> PersistedTrails {
        let trails = self.trails();
        let mut newest: Vec<(&String, &VecDeque<TrailPoint>)> =
            trails.iter().filter(|(_, trail)| !trail.is_empty()).collect();
        newest.sort_by_key(|(_, trail)| std::cmp::Reverse(trail.back().map(|p| p.timestamp)));

        let trails = newest
            .into_iter()
            .take(max_aircraft)
            .map(|(icao, trail)| {
                let skip = trail.len().saturating_sub(max_points);
                (icao.clone(), trail.iter().skip(skip).copied().collect())
            })
            .collect();
        PersistedTrails { trails, timestamp: now }
    }

    /// Replace the in-memory trails with a persisted snapshot. Returns the
    /// number of restored trails.
    pub fn restore(&self, persisted: PersistedTrails) -> usize {
        let mut trails = self.trails();
        trails.clear();
        for (icao, points) in persisted.trails {
            if points.is_empty() {
                continue;
            }
            let skip = points.len().saturating_sub(self.max_trail_length);
            trails.insert(icao, points.into_iter().skip(skip).collect());
        }
        trails.len()
    }
}

/// Position `distance_m` meters behind a point travelling on `heading_deg`
fn project_back(lat: f64, lon: f64, heading_deg: f64, distance_m: f64) -> (f64, f64) {
    let bearing = (heading_deg + 180.0).to_radians();
    let angular = (distance_m / 1000.0 / EARTH_RADIUS_KM).to_degrees();
    let d_lat = angular * bearing.cos();
    let cos_lat = lat.to_radians().cos().max(1e-6);
    let d_lon = angular * bearing.sin() / cos_lat;
    ((lat + d_lat).clamp(-90.0, 90.0), (lon + d_lon).clamp(-180.0, 180.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(i: i64) -> TrailPoint {
        TrailPoint::new(i as f64 * 0.01, i as f64 * 0.02, 1000.0, i)
    }

    #[test]
    fn test_trail_bounded_fifo() {
        let recorder = TrailRecorder::new(100, DEFAULT_FADE_WINDOW_MS);
        for i in 0..150 {
            recorder.append("abc", point(i));
        }

        let trail = recorder.get_trail("abc");
        assert_eq!(trail.len(), 100);
        assert_eq!(trail.first().map(|p| p.timestamp), Some(50));
        assert_eq!(trail.last().map(|p| p.timestamp), Some(149));
        assert!(trail.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_unknown_trail_is_empty() {
        let recorder = TrailRecorder::default();
        assert!(recorder.get_trail("nope").is_empty());
    }

    #[test]
    fn test_record_positions_skips_missing_positions() {
        let recorder = TrailRecorder::default();
        let records = vec![
            AircraftRecord::new("a").with_position(1.0, 2.0, 300.0),
            AircraftRecord::new("b"),
        ];

        assert_eq!(recorder.record_positions(&records, 42), 1);
        assert_eq!(recorder.get_trail("a"), vec![TrailPoint::new(1.0, 2.0, 300.0, 42)]);
        assert!(recorder.get_trail("b").is_empty());
    }

    #[test]
    fn test_faded_trail_weights() {
        let recorder = TrailRecorder::new(10, 10_000);
        recorder.append("abc", TrailPoint::new(0.0, 0.0, 0.0, 0));
        recorder.append("abc", TrailPoint::new(0.0, 0.0, 0.0, 10_000));

        let faded = recorder.faded_trail("abc", 10_000);
        assert_eq!(faded[0].weight, 0.0);
        assert_eq!(faded[1].weight, 1.0);
        // fade never removes points
        assert_eq!(faded.len(), 2);
    }

    #[test]
    fn test_force_generate_backfills_along_heading() {
        let recorder = TrailRecorder::default();
        let mut moving = AircraftRecord::new("moving").with_position(40.0, -100.0, 5000.0);
        moving.velocity = Some(100.0);
        moving.heading = Some(0.0);
        let parked = AircraftRecord::new("parked").with_position(41.0, -101.0, 0.0);
        recorder.append("existing", point(1));
        let existing = AircraftRecord::new("existing").with_position(0.0, 0.0, 0.0);

        let generated = recorder.force_generate(&[moving, parked, existing], 100_000);
        assert_eq!(generated, 2);

        let trail = recorder.get_trail("moving");
        assert_eq!(trail.len(), BACKFILL_POINTS as usize);
        // heading north: history lies to the south, ending at the current position
        assert!(trail[0].latitude < trail[4].latitude);
        assert!((trail[4].latitude - 40.0).abs() < 1e-9);
        assert_eq!(trail[4].timestamp, 100_000);

        assert_eq!(recorder.get_trail("parked").len(), 1);
        assert_eq!(recorder.get_trail("existing").len(), 1);
    }

    #[test]
    fn test_retain_and_clear() {
        let recorder = TrailRecorder::default();
        recorder.append("a", point(1));
        recorder.append("b", point(2));

        recorder.retain(&BTreeSet::from(["a".to_string()]));
        assert_eq!(recorder.trail_count(), 1);
        assert!(recorder.get_trail("b").is_empty());

        recorder.clear();
        assert_eq!(recorder.trail_count(), 0);
    }

    #[test]
    fn test_snapshot_bounds_aircraft_and_points() {
        let recorder = TrailRecorder::default();
        for aircraft in 0..25 {
            for i in 0..60 {
                recorder.append(&format!("ac{}", aircraft), point(aircraft * 1000 + i));
            }
        }

        let snapshot = recorder.snapshot(20, 50, 0);
        assert_eq!(snapshot.trails.len(), 20);

        let restored = TrailRecorder::default();
        assert_eq!(restored.restore(snapshot), 20);
        // the five oldest aircraft are dropped
        assert!(restored.get_trail("ac0").is_empty());
        let newest = restored.get_trail("ac24");
        assert_eq!(newest.len(), 50);
        assert_eq!(newest.last().map(|p| p.timestamp), Some(24_059));
    }

    #[test]
    fn test_restore_truncates_to_trail_length() {
        let mut persisted = PersistedTrails::default();
        persisted.trails.insert("a".to_string(), (0..10).map(point).collect());
        persisted.trails.insert("empty".to_string(), Vec::new());

        let recorder = TrailRecorder::new(4, DEFAULT_FADE_WINDOW_MS);
        assert_eq!(recorder.restore(persisted), 1);
        let trail = recorder.get_trail("a");
        assert_eq!(trail.len(), 4);
        assert_eq!(trail[0].timestamp, 6);
    }
}
