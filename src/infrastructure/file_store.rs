// File-backed key-value store with a total size quota
use crate::application::key_value_store::KeyValueStore;
use crate::domain::error::StoreError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One file per key under a directory. The quota covers all files the store
/// owns, mirroring the few-megabyte limit of browser storage.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
    quota_bytes: usize,
}

impl FileKeyValueStore {
    pub fn open(dir: impl AsRef<Path>, quota_bytes: usize) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, quota_bytes })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }

    fn used_bytes_excluding(&self, excluded: &Path) -> Result<usize, StoreError> {
        let mut total = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path == excluded || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            total += entry.metadata()?.len() as usize;
        }
        Ok(total)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let needed = self.used_bytes_excluding(&path)? + value.len();
        if needed > self.quota_bytes {
            return Err(StoreError::QuotaExceeded {
                needed,
                limit: self.quota_bytes,
            });
        }

        // readers never observe a partially written value
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
