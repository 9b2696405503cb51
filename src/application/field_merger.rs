// Field merger - combines cached and freshly fetched aircraft records
use crate::domain::aircraft::{now_ms, AircraftMap, AircraftRecord, DynamicField, StaticField};

/// Merge an incoming record over a cached one, stamping `last_updated` with now.
pub fn merge(cached: Option<&AircraftRecord>, incoming: &AircraftRecord) -> AircraftRecord {
    merge_at(cached, incoming, now_ms())
}

/// Merge with an explicit timestamp.
///
/// Dynamic fields always take the incoming value when one is present, zero
/// included. Static fields only take non-empty incoming values so a partial
/// response cannot erase identity data learned earlier.
pub fn merge_at(cached: Option<&AircraftRecord>, incoming: &AircraftRecord, now: i64) -> AircraftRecord {
    let Some(cached) = cached else {
        let mut record = incoming.clone();
        record.last_updated = now;
        return record;
    };

    let mut merged = cached.clone();

    for field in DynamicField::ALL {
        merged.take_dynamic(incoming, field);
    }

    for field in StaticField::ALL {
        if let Some(value) = incoming.static_value(field) {
            if !value.is_empty() {
                *merged.static_slot_mut(field) = Some(value.to_string());
            }
        }
    }

    merged.last_updated = now;
    merged
}

/// Merge every incoming record into the cached map.
///
/// Cached keys missing from `incoming` are carried over unchanged.
pub fn merge_batch(cached: &AircraftMap, incoming: &AircraftMap) -> AircraftMap {
    merge_batch_at(cached, incoming, now_ms())
}

pub fn merge_batch_at(cached: &AircraftMap, incoming: &AircraftMap, now: i64) -> AircraftMap {
    let mut merged = cached.clone();
    for (icao, record) in incoming {
        let record = merge_at(cached.get(icao), record, now);
        merged.insert(icao.clone(), record);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn cached_737() -> AircraftRecord {
        let mut record = AircraftRecord::new("abc123").with_position(47.0, -122.0, 35000.0);
        record.model = Some("737".to_string());
        record.registration = Some("N737BA".to_string());
        record.owner_type = Some("Corporation".to_string());
        record.heading = Some(90.0);
        record.last_updated = NOW - 60_000;
        record
    }

    #[test]
    fn test_merge_without_cache_stamps_time() {
        let incoming = AircraftRecord::new("abc123").with_position(1.0, 2.0, 3.0);
        let merged = merge_at(None, &incoming, NOW);
        assert_eq!(merged.latitude, Some(1.0));
        assert_eq!(merged.last_updated, NOW);
    }

    #[test]
    fn test_dynamic_fields_win_even_when_zero() {
        let mut incoming = AircraftRecord::new("abc123").with_position(0.0, 0.0, 0.0);
        incoming.heading = Some(0.0);
        incoming.velocity = Some(0.0);
        incoming.on_ground = Some(false);

        let merged = merge_at(Some(&cached_737()), &incoming, NOW);
        assert_eq!(merged.latitude, Some(0.0));
        assert_eq!(merged.longitude, Some(0.0));
        assert_eq!(merged.altitude, Some(0.0));
        assert_eq!(merged.heading, Some(0.0));
        assert_eq!(merged.velocity, Some(0.0));
        assert_eq!(merged.on_ground, Some(false));
    }

    #[test]
    fn test_missing_dynamic_fields_keep_cached_values() {
        let incoming = AircraftRecord::new("abc123");
        let merged = merge_at(Some(&cached_737()), &incoming, NOW);
        assert_eq!(merged.latitude, Some(47.0));
        assert_eq!(merged.heading, Some(90.0));
    }

    #[test]
    fn test_static_fields_preserved_when_empty() {
        let mut incoming = AircraftRecord::new("abc123").with_position(48.0, -121.0, 30000.0);
        incoming.model = Some(String::new());
        incoming.registration = None;
        incoming.city = Some("Wichita".to_string());

        let merged = merge_at(Some(&cached_737()), &incoming, NOW);
        assert_eq!(merged.model.as_deref(), Some("737"));
        assert_eq!(merged.registration.as_deref(), Some("N737BA"));
        assert_eq!(merged.city.as_deref(), Some("Wichita"));
        assert_eq!(merged.last_updated, NOW);
    }

    #[test]
    fn test_static_fields_overwritten_when_present() {
        let mut incoming = AircraftRecord::new("abc123");
        incoming.model = Some("737-800".to_string());
        incoming.n_number = Some("737BA".to_string());

        let merged = merge_at(Some(&cached_737()), &incoming, NOW);
        assert_eq!(merged.model.as_deref(), Some("737-800"));
        assert_eq!(merged.n_number.as_deref(), Some("737BA"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut incoming = AircraftRecord::new("abc123").with_position(10.0, 20.0, 0.0);
        incoming.model = Some("A320".to_string());
        incoming.operator = Some("Example Air".to_string());

        let once = merge_at(Some(&cached_737()), &incoming, NOW);
        let twice = merge_at(Some(&once), &incoming, NOW);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_stamps_wall_clock() {
        let before = now_ms();
        let incoming = AircraftRecord::new("abc123").with_position(1.0, 2.0, 3.0);
        assert!(merge(Some(&cached_737()), &incoming).last_updated >= before);

        let mut batch = AircraftMap::new();
        batch.insert("abc123".to_string(), incoming);
        assert!(merge_batch(&AircraftMap::new(), &batch)["abc123"].last_updated >= before);
    }

    #[test]
    fn test_merge_batch_keeps_unseen_aircraft() {
        let mut cached = AircraftMap::new();
        cached.insert("a".to_string(), AircraftRecord::new("a").with_position(1.0, 1.0, 1.0));
        cached.insert("b".to_string(), AircraftRecord::new("b").with_position(2.0, 2.0, 2.0));

        let mut incoming = AircraftMap::new();
        incoming.insert("a".to_string(), AircraftRecord::new("a").with_position(5.0, 5.0, 5.0));
        incoming.insert("c".to_string(), AircraftRecord::new("c").with_position(3.0, 3.0, 3.0));

        let merged = merge_batch_at(&cached, &incoming, NOW);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged["a"].latitude, Some(5.0));
        assert_eq!(merged["a"].last_updated, NOW);
        assert_eq!(merged["b"], cached["b"]);
        assert_eq!(merged["c"].last_updated, NOW);
    }
}
