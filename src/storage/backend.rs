//! Storage port: the raw string key-value store the persistence layer sits on.
//!
//! Everything above this trait speaks JSON and typed records; everything below
//! it only knows strings. Production code backs it with [`FileStore`], tests and
//! in-process callers with [`MemoryStore`].
//!
//! [`FileStore`]: super::FileStore
use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Failure of a single store primitive.
///
/// A successful write is `Ok(())`; the two failure modes the persistence layer
/// reacts to differently are kept distinct so the cleanup-and-retry policy can
/// match on [`StoreError::QuotaExceeded`] alone.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store refused the write because it would exceed its capacity
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    /// The store is disabled, blocked or otherwise unusable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Port Trait
// ============================================================================

/// A string-keyed, string-valued persistent store.
///
/// Methods take `&self`; implementations handle their own interior locking.
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value under `key`, `Ok(None)` if absent.
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value` under `key`, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`. Removing an absent key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    /// List every key currently held.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Size of a stored string in bytes, counting 2 bytes per UTF-16 code unit.
pub fn stored_size(value: &str) -> u64 {
    value.encode_utf16().count() as u64 * 2
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, String>,
    capacity_bytes: Option<u64>,
    available: bool,
}

/// In-memory [`KeyValueStore`].
///
/// Optionally enforces a hard capacity (measured like [`stored_size`] over all
/// values) and can be switched unavailable, so callers can drive the quota and
/// outage paths deterministically.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                available: true,
                ..MemoryState::default()
            }),
        }
    }

    /// Create a store that rejects writes pushing total value size past `bytes`.
    pub fn with_capacity(bytes: u64) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            state.capacity_bytes = Some(bytes);
        }
        store
    }

    /// Toggle availability. An unavailable store fails every primitive.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.available = available;
        }
    }

    /// Write a raw string, bypassing capacity checks. Used to plant corrupt data.
    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.entries.insert(key.to_string(), value.to_string());
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        let state = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        if !state.available {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }
        Ok(state)
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if let Some(capacity) = state.capacity_bytes {
            let others: u64 = state
                .entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| stored_size(v))
                .sum();
            if others + stored_size(value) > capacity {
                return Err(StoreError::QuotaExceeded);
            }
        }
        state.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.entries.keys().cloned().collect())
    }
}
