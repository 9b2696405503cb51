// Key-value storage abstraction for persisted tracker state
use crate::domain::error::StoreError;

/// Size-limited string store, the local equivalent of browser storage.
///
/// Writes may fail with [`StoreError::QuotaExceeded`]; callers decide how to
/// degrade.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
