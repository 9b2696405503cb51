// Persistent aircraft store - cached records with expiry and quota pruning
use crate::application::key_value_store::KeyValueStore;
use crate::domain::aircraft::{now_ms, AircraftMap};
use crate::domain::error::StoreError;
use crate::domain::trail::PersistedTrails;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const CACHE_KEY: &str = "aircraft_cache";
pub const TRAILS_KEY: &str = "aircraft_trails";
pub const SESSION_ID_KEY: &str = "tracking_session_id";
pub const DEFAULT_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedBlob {
    aircraft_map: AircraftMap,
    timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Saved after dropping the oldest entries
    Pruned { removed: usize },
    /// Nothing fit even after pruning; the store was emptied
    Cleared,
    Failed,
    Unavailable,
}

/// Sole owner of persisted aircraft state: the aircraft cache, the trail
/// snapshot and the session id.
///
/// Every method degrades to a no-op with an empty/default result when the
/// backing storage is missing or broken; nothing here returns an error.
#[derive(Clone)]
pub struct PersistentAircraftStore {
    storage: Option<Arc<dyn KeyValueStore>>,
    session_scope: Option<Arc<dyn KeyValueStore>>,
    max_age_ms: i64,
}

impl PersistentAircraftStore {
    pub fn new(
        storage: Option<Arc<dyn KeyValueStore>>,
        session_scope: Option<Arc<dyn KeyValueStore>>,
        max_age_ms: i64,
    ) -> Self {
        Self {
            storage,
            session_scope,
            max_age_ms,
        }
    }

    /// Store with no backing storage at all
    pub fn unavailable() -> Self {
        Self::new(None, None, DEFAULT_MAX_AGE_MS)
    }

    pub fn save(&self, map: &AircraftMap) -> SaveOutcome {
        let Some(storage) = self.storage.as_deref() else {
            return SaveOutcome::Unavailable;
        };

        match write_blob(storage, map) {
            Ok(()) => return SaveOutcome::Saved,
            Err(StoreError::QuotaExceeded { needed, limit }) => {
                tracing::warn!("Aircraft cache exceeds storage quota ({} > {} bytes)", needed, limit);
            }
            Err(e) => {
                tracing::warn!("Failed to save aircraft cache: {}", e);
                return SaveOutcome::Failed;
            }
        }

        // trails are best effort and give way to the aircraft cache
        if evict_trails(storage) {
            match write_blob(storage, map) {
                Ok(()) => {
                    tracing::info!("Saved aircraft cache after dropping persisted trails");
                    return SaveOutcome::Saved;
                }
                Err(StoreError::QuotaExceeded { .. }) => {}
                Err(e) => {
                    tracing::warn!("Failed to save aircraft cache: {}", e);
                    return SaveOutcome::Failed;
                }
            }
        }

        let (pruned, removed) = prune_oldest(map);
        tracing::warn!("Pruning {} oldest aircraft from cache", removed);
        match write_blob(storage, &pruned) {
            Ok(()) => {
                tracing::info!("Saved aircraft cache after pruning {} entries", removed);
                SaveOutcome::Pruned { removed }
            }
            Err(e) => {
                tracing::error!("Aircraft cache still not writable after pruning ({}), clearing", e);
                if let Err(e) = storage.remove(CACHE_KEY) {
                    tracing::error!("Failed to clear aircraft cache: {}", e);
                }
                SaveOutcome::Cleared
            }
        }
    }

    /// Persisted records updated within the max age
    pub fn load(&self) -> AircraftMap {
        self.load_at(now_ms())
    }

    pub fn load_at(&self, now: i64) -> AircraftMap {
        let Some(storage) = self.storage.as_deref() else {
            return AircraftMap::new();
        };

        let json = match storage.get(CACHE_KEY) {
            Ok(Some(json)) => json,
            Ok(None) => return AircraftMap::new(),
            Err(e) => {
                tracing::warn!("Failed to read aircraft cache: {}", e);
                return AircraftMap::new();
            }
        };

        let blob: PersistedBlob = match serde_json::from_str(&json) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!("Discarding unreadable aircraft cache: {}", e);
                return AircraftMap::new();
            }
        };

        let total = blob.aircraft_map.len();
        let fresh: AircraftMap = blob
            .aircraft_map
            .into_iter()
            .filter(|(_, record)| now - record.last_updated < self.max_age_ms)
            .collect();

        if fresh.len() < total {
            tracing::debug!("Dropped {} expired aircraft from cache", total - fresh.len());
        }
        fresh
    }

    /// Remove the aircraft cache and the persisted trails
    pub fn clear(&self) {
        let Some(storage) = self.storage.as_deref() else {
            return;
        };
        for key in [CACHE_KEY, TRAILS_KEY] {
            if let Err(e) = storage.remove(key) {
                tracing::warn!("Failed to clear {}: {}", key, e);
            }
        }
    }

    /// Write a trail snapshot. Returns `false` when nothing was written.
    pub fn save_trails(&self, trails: &PersistedTrails) -> bool {
        let Some(storage) = self.storage.as_deref() else {
            return false;
        };

        let json = match serde_json::to_string(trails) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to serialize trails: {}", e);
                return false;
            }
        };

        match storage.set(TRAILS_KEY, &json) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to persist trails: {}", e);
                false
            }
        }
    }

    /// Last written trail snapshot, if any is readable
    pub fn load_trails(&self) -> Option<PersistedTrails> {
        let storage = self.storage.as_deref()?;

        let json = match storage.get(TRAILS_KEY) {
            Ok(json) => json?,
            Err(e) => {
                tracing::warn!("Failed to read persisted trails: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&json) {
            Ok(trails) => Some(trails),
            Err(e) => {
                tracing::warn!("Discarding unreadable persisted trails: {}", e);
                None
            }
        }
    }

    /// Identifier stable for the lifetime of the session scope.
    ///
    /// Without a session scope a fresh id is returned on every call.
    pub fn get_or_create_session_id(&self) -> String {
        let Some(scope) = self.session_scope.as_deref() else {
            return new_session_id();
        };

        match scope.get(SESSION_ID_KEY) {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to read session id: {}", e),
        }

        let id = new_session_id();
        if let Err(e) = scope.set(SESSION_ID_KEY, &id) {
            tracing::warn!("Failed to store session id: {}", e);
        }
        id
    }
}

fn new_session_id() -> String {
    format!("session-{}", uuid::Uuid::new_v4())
}

/// Drop the persisted trails to free quota. Returns whether any were stored.
fn evict_trails(storage: &dyn KeyValueStore) -> bool {
    if !matches!(storage.get(TRAILS_KEY), Ok(Some(_))) {
        return false;
    }
    match storage.remove(TRAILS_KEY) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to drop persisted trails: {}", e);
            false
        }
    }
}

fn write_blob(storage: &dyn KeyValueStore, map: &AircraftMap) -> Result<(), StoreError> {
    let blob = PersistedBlob {
        aircraft_map: map.clone(),
        timestamp: now_ms(),
    };
    let json = serde_json::to_string(&blob)
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    storage.set(CACHE_KEY, &json)
}

/// Drop the oldest quarter (rounded up) of entries by `last_updated`
fn prune_oldest(map: &AircraftMap) -> (AircraftMap, usize) {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by_key(|(_, record)| record.last_updated);

    let removed = map.len().div_ceil(4);
    let kept = entries
        .into_iter()
        .skip(removed)
        .map(|(icao, record)| (icao.clone(), record.clone()))
        .collect();
    (kept, removed)
}
