//! File-backed [`KeyValueStore`]: one JSON object `{ "key": "raw value", ... }`.
//!
//! The whole map lives in memory; every mutation rewrites the file with the
//! write-to-temp-then-rename pattern so a crash never leaves a half-written
//! store behind. If the rewrite fails the in-memory change is rolled back.
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use super::backend::{stored_size, KeyValueStore, StoreError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("Failed to read storage file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is not a JSON object of strings: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// FileStore
// ============================================================================

pub struct FileStore {
    path: PathBuf,
    capacity_bytes: Option<u64>,
    entries: Mutex<BTreeMap<String, String>>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("capacity_bytes", &self.capacity_bytes)
            .finish()
    }
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// - Missing file → empty store (the file is created on first write)
    /// - Empty file → empty store
    /// - Anything other than a JSON object of strings → `Err(FileStoreError::Parse)`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FileStoreError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No storage file found, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(FileStoreError::Io(e)),
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "Opened storage file");
        Ok(Self {
            path,
            capacity_bytes: None,
            entries: Mutex::new(entries),
        })
    }

    /// Enforce a hard capacity on the total stored value size.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity_bytes = Some(bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("storage file lock poisoned".to_string()))
    }

    /// Apply `mutate` to the map and persist it, all under one lock.
    ///
    /// `mutate` may refuse the change by returning an error before touching
    /// the map; a failed persist rolls the map back.
    fn commit<F>(&self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> Result<(), StoreError>,
    {
        let mut entries = self.lock()?;
        let previous = entries.clone();
        mutate(&mut entries)?;

        if let Err(e) = write_atomic(&self.path, &entries) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to persist storage file");
            *entries = previous;
            return Err(StoreError::Unavailable(e.to_string()));
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let capacity = self.capacity_bytes;
        self.commit(|entries| {
            if let Some(capacity) = capacity {
                let others: u64 = entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(_, v)| stored_size(v))
                    .sum();
                if others + stored_size(value) > capacity {
                    return Err(StoreError::QuotaExceeded);
                }
            }
            entries.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        if !self.lock()?.contains_key(key) {
            return Ok(());
        }
        self.commit(|entries| {
            entries.remove(key);
            Ok(())
        })
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

/// Serialize `entries` and atomically replace `dst` with the result.
///
/// Uses a randomized temp filename next to `dst` created with `create_new`, so
/// an existing file (or symlink) at the temp path makes the write fail instead
/// of following it.
fn write_atomic(dst: &Path, entries: &BTreeMap<String, String>) -> std::io::Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = serde_json::to_vec(entries)?;

    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)?;

    let written = temp_file
        .write_all(&content)
        .and_then(|_| temp_file.sync_all());
    drop(temp_file);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    // On Windows, rename fails if destination exists
    #[cfg(windows)]
    if dst.exists() {
        if let Err(e) = std::fs::remove_file(dst) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }
    }

    std::fs::rename(&temp_path, dst).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp_path);
    })
}
