use serde::de::DeserializeOwned;
use serde::Serialize;

use super::backend::{stored_size, KeyValueStore, StoreError};
use super::keys::StorageKey;
use super::types::{ContactMessage, StorageError, StorageInfo, StorageLimits};
use crate::util::format_bytes;

/// Sentinel written and removed by the availability probe
const PROBE_KEY: &str = "__storage_test__";

// ============================================================================
// Storage
// ============================================================================

/// Typed JSON persistence over a [`KeyValueStore`].
///
/// Every public operation degrades instead of failing loudly: reads fall back to
/// the caller's value, writes report `false`. Writes are admitted against an
/// estimated budget (`limits.quota_bytes`), and a refused write gets exactly one
/// cleanup-and-retry.
///
/// There is no locking across operations. Read-modify-write sequences assume a
/// single caller; two callers racing on one key can lose an update.
pub struct Storage<S> {
    store: S,
    limits: StorageLimits,
}

impl<S: KeyValueStore> Storage<S> {
    pub fn new(store: S) -> Self {
        Self::with_limits(store, StorageLimits::default())
    }

    pub fn with_limits(store: S, limits: StorageLimits) -> Self {
        Self { store, limits }
    }

    /// The backing store, for callers that need raw access.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn limits(&self) -> StorageLimits {
        self.limits
    }

    // ========================================================================
    // Availability
    // ========================================================================

    /// Probe the store with a throwaway write-then-remove.
    ///
    /// Any failure (disabled store, exhausted capacity) counts as unavailable.
    pub fn is_available(&self) -> bool {
        let probe = self
            .store
            .set_item(PROBE_KEY, PROBE_KEY)
            .and_then(|_| self.store.remove_item(PROBE_KEY));

        match probe {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Key-value store is unavailable");
                false
            }
        }
    }

    // ========================================================================
    // Typed Access
    // ========================================================================

    /// Read and decode the value under `key`, reporting why it is missing.
    ///
    /// An empty stored string counts as never written.
    pub fn try_get<T: DeserializeOwned>(&self, key: impl AsRef<str>) -> Result<T, StorageError> {
        let key = key.as_ref();
        if !self.is_available() {
            return Err(StorageError::Unavailable);
        }

        let raw = match self.store.get_item(key) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return Err(StorageError::NotFound(key.to_string())),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read from storage");
                return Err(StorageError::Unavailable);
            }
        };

        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|source| StorageError::Corrupt {
                key: key.to_string(),
                source,
            })?;

        serde_json::from_value(value).map_err(|source| StorageError::SchemaMismatch {
            key: key.to_string(),
            source,
        })
    }

    /// Read the value under `key`, or `fallback` if it is absent, unreadable,
    /// not JSON, or the wrong shape. Never fails.
    pub fn get<T: DeserializeOwned>(&self, key: impl AsRef<str>, fallback: T) -> T {
        let key = key.as_ref();
        match self.try_get(key) {
            Ok(value) => value,
            Err(e @ (StorageError::Corrupt { .. } | StorageError::SchemaMismatch { .. })) => {
                tracing::warn!(key = %key, error = %e, "Discarding unreadable stored value");
                fallback
            }
            Err(_) => fallback,
        }
    }

    /// Serialize `value` and write it under `key`.
    ///
    /// Returns `false` if the store is unavailable, the value cannot be
    /// serialized, or the quota cannot be satisfied even after cleanup. On
    /// failure the previous value is left untouched.
    pub fn set<T: Serialize + ?Sized>(&self, key: impl AsRef<str>, value: &T) -> bool {
        let key = key.as_ref();
        if !self.is_available() {
            return false;
        }

        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to serialize value for storage");
                return false;
            }
        };

        self.write(key, &serialized, true)
    }

    /// Delete `key`. Returns `false` if the store is unavailable or refused.
    pub fn remove(&self, key: impl AsRef<str>) -> bool {
        let key = key.as_ref();
        if !self.is_available() {
            return false;
        }
        match self.store.remove_item(key) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to remove from storage");
                false
            }
        }
    }

    /// Admission check, write, and the single retry after cleanup.
    ///
    /// `allow_cleanup` is false for the write cleanup itself performs.
    fn write(&self, key: &str, serialized: &str, allow_cleanup: bool) -> bool {
        let current_size = match self.store.get_item(key) {
            Ok(current) => current.as_deref().map(stored_size).unwrap_or(0),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read current value before write");
                return false;
            }
        };
        let additional = stored_size(serialized) as i64 - current_size as i64;

        if additional > self.remaining() {
            if !allow_cleanup {
                tracing::error!(key = %key, additional, "Storage quota exceeded");
                return false;
            }
            tracing::warn!(
                key = %key,
                additional,
                "Storage quota would be exceeded, attempting cleanup"
            );
            self.cleanup();

            if additional > self.remaining() {
                tracing::error!(key = %key, additional, "Storage quota exceeded even after cleanup");
                return false;
            }
        }

        match self.store.set_item(key, serialized) {
            Ok(()) => true,
            Err(StoreError::QuotaExceeded) if allow_cleanup => {
                tracing::error!(key = %key, "Store rejected write: quota exceeded");
                self.cleanup();
                match self.store.set_item(key, serialized) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(key = %key, error = %e, "Write failed after cleanup");
                        false
                    }
                }
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to write to storage");
                false
            }
        }
    }

    // ========================================================================
    // Quota Estimation
    // ========================================================================

    /// Estimated bytes in use: every stored value at 2 bytes per UTF-16 unit.
    pub fn usage(&self) -> u64 {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::debug!(error = %e, "Unable to list keys for usage estimate");
                return 0;
            }
        };

        keys.iter()
            .filter_map(|key| self.store.get_item(key).ok().flatten())
            .map(|value| stored_size(&value))
            .sum()
    }

    /// Estimated bytes left before the assumed ceiling; negative once over it.
    pub fn remaining(&self) -> i64 {
        self.limits.quota_bytes as i64 - self.usage() as i64
    }

    /// True when less than `limits.near_limit_bytes` remain.
    pub fn is_near_limit(&self) -> bool {
        self.remaining() < self.limits.near_limit_bytes as i64
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Reclaim space by trimming the contact message log to the most recent
    /// `limits.message_retention` entries (newest first).
    ///
    /// This is the only reclamation step; articles, the reading list and
    /// upvotes are never touched. Returns the number of messages discarded.
    pub fn cleanup(&self) -> usize {
        let key = StorageKey::ContactMessages.as_str();
        let mut messages: Vec<ContactMessage> = self.get(key, Vec::new());
        let retention = self.limits.message_retention;
        if messages.len() <= retention {
            return 0;
        }

        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let removed = messages.len() - retention;
        messages.truncate(retention);

        let trimmed = match serde_json::to_string(&messages) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "Cleanup failed to serialize message log");
                return 0;
            }
        };

        if self.write(key, &trimmed, false) {
            tracing::info!(removed, kept = retention, "Trimmed contact message log");
            removed
        } else {
            tracing::warn!("Cleanup failed to write trimmed message log");
            0
        }
    }

    // ========================================================================
    // Introspection & Reset
    // ========================================================================

    /// Used/remaining space and percentage of the ceiling. Performs no writes.
    pub fn storage_info(&self) -> StorageInfo {
        let used = self.usage();
        let remaining = self.limits.quota_bytes as i64 - used as i64;
        let percent_used = (used as f64 / self.limits.quota_bytes.max(1) as f64 * 100.0).round();

        StorageInfo {
            used: format_bytes(used as i64),
            remaining: format_bytes(remaining),
            percent_used: percent_used as u64,
            used_bytes: used,
            remaining_bytes: remaining,
        }
    }

    /// Remove every key in the catalogue.
    ///
    /// Each key is attempted even if an earlier removal failed. Returns `true`
    /// only if all removals succeeded.
    pub fn clear_all(&self) -> bool {
        let mut failed = 0usize;
        for key in StorageKey::ALL {
            if !self.remove(key) {
                tracing::warn!(key = %key, "Failed to clear key");
                failed += 1;
            }
        }

        if failed == 0 {
            tracing::info!("Cleared all app data");
        }
        failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn storage() -> Storage<MemoryStore> {
        Storage::new(MemoryStore::new())
    }

    fn message(i: i64) -> ContactMessage {
        ContactMessage {
            name: format!("Reader {i}"),
            email: format!("reader{i}@example.com"),
            subject: "Hello".to_string(),
            message: "A message long enough".to_string(),
            timestamp: 1_700_000_000_000 + i,
            id: format!("msg-{i}"),
        }
    }

    #[test]
    fn test_probe_leaves_no_sentinel() {
        let storage = storage();
        assert!(storage.is_available());
        assert!(storage.store().keys().unwrap().is_empty());
    }

    #[test]
    fn test_set_then_get() {
        let storage = storage();
        assert!(storage.set("k", &json!({"a": [1, 2, 3]})));
        let value: serde_json::Value = storage.get("k", json!(null));
        assert_eq!(value, json!({"a": [1, 2, 3]}));
    }

    #[test]
    fn test_try_get_distinguishes_failures() {
        let storage = storage();
        storage.store().insert_raw("corrupt", "{not json");
        storage.store().insert_raw("shape", "\"a string\"");
        storage.store().insert_raw("empty", "");

        assert!(matches!(
            storage.try_get::<Vec<String>>("missing"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.try_get::<Vec<String>>("empty"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.try_get::<Vec<String>>("corrupt"),
            Err(StorageError::Corrupt { .. })
        ));
        assert!(matches!(
            storage.try_get::<Vec<String>>("shape"),
            Err(StorageError::SchemaMismatch { .. })
        ));

        storage.store().set_available(false);
        assert!(matches!(
            storage.try_get::<Vec<String>>("missing"),
            Err(StorageError::Unavailable)
        ));
    }

    #[test]
    fn test_get_falls_back_on_wrong_shape() {
        let storage = storage();
        storage.store().insert_raw("k", "{\"not\": \"a list\"}");
        let value: Vec<String> = storage.get("k", vec!["fallback".to_string()]);
        assert_eq!(value, vec!["fallback".to_string()]);
    }

    #[test]
    fn test_unavailable_store_degrades() {
        let storage = storage();
        assert!(storage.set("k", &1));
        storage.store().set_available(false);

        assert_eq!(storage.get("k", 42), 42);
        assert!(!storage.set("k", &2));
        assert!(!storage.remove("k"));
        assert_eq!(storage.usage(), 0);
    }

    #[test]
    fn test_admission_check_refuses_and_keeps_old_value() {
        let limits = StorageLimits {
            quota_bytes: 100,
            ..StorageLimits::default()
        };
        let storage = Storage::with_limits(MemoryStore::new(), limits);

        assert!(storage.set("k", "short"));
        let big = "x".repeat(60);
        assert!(!storage.set("k", &big));
        assert_eq!(storage.get("k", String::new()), "short");
    }

    #[test]
    fn test_admission_cleanup_frees_space() {
        let messages: Vec<ContactMessage> = (0..15).map(message).collect();
        let log_size = stored_size(&serde_json::to_string(&messages).unwrap());
        let trimmed_size = stored_size(&serde_json::to_string(&messages[5..]).unwrap());
        let freed = log_size - trimmed_size;

        // Budget fits the full log plus a value that only fits after cleanup
        let extra = "y".repeat((freed / 2 / 2) as usize);
        let extra_size = stored_size(&serde_json::to_string(&extra).unwrap());
        let limits = StorageLimits {
            quota_bytes: log_size + extra_size - 2,
            ..StorageLimits::default()
        };
        let storage = Storage::with_limits(MemoryStore::new(), limits);
        assert!(storage.set(StorageKey::ContactMessages, &messages));

        assert!(storage.set("extra", &extra));
        let kept: Vec<ContactMessage> = storage.get(StorageKey::ContactMessages, Vec::new());
        assert_eq!(kept.len(), 10);
    }

    #[test]
    fn test_quota_exceeded_from_store_retries_once_after_cleanup() {
        let messages: Vec<ContactMessage> = (0..15).map(message).collect();
        let log_size = stored_size(&serde_json::to_string(&messages).unwrap());
        // Store capacity is tighter than the estimate; leave room for the probe
        let store = MemoryStore::with_capacity(log_size + 200);
        let storage = Storage::new(store);
        assert!(storage.set(StorageKey::ContactMessages, &messages));

        let value = "z".repeat(400);
        assert!(storage.set("big", &value));
        let kept: Vec<ContactMessage> = storage.get(StorageKey::ContactMessages, Vec::new());
        assert_eq!(kept.len(), 10);
    }

    #[test]
    fn test_quota_exceeded_twice_reports_failure() {
        let store = MemoryStore::with_capacity(400);
        let storage = Storage::new(store);
        assert!(storage.set("a", "small"));

        let value = "z".repeat(500);
        assert!(!storage.set("b", &value));
        assert_eq!(storage.get("b", String::from("none")), "none");
        assert_eq!(storage.get("a", String::new()), "small");
    }

    #[test]
    fn test_cleanup_keeps_newest_sorted_descending() {
        let storage = storage();
        let mut messages: Vec<ContactMessage> = (0..15).map(message).collect();
        messages.reverse();
        messages.swap(0, 7);
        assert!(storage.set(StorageKey::ContactMessages, &messages));

        assert_eq!(storage.cleanup(), 5);
        let kept: Vec<ContactMessage> = storage.get(StorageKey::ContactMessages, Vec::new());
        let ids: Vec<_> = kept.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "msg-14", "msg-13", "msg-12", "msg-11", "msg-10", "msg-9", "msg-8", "msg-7",
                "msg-6", "msg-5"
            ]
        );
    }

    #[test]
    fn test_cleanup_noop_under_retention() {
        let storage = storage();
        let messages: Vec<ContactMessage> = (0..10).map(message).collect();
        assert!(storage.set(StorageKey::ContactMessages, &messages));
        let before = storage.store().get_item("contactMessages").unwrap();

        assert_eq!(storage.cleanup(), 0);
        assert_eq!(storage.store().get_item("contactMessages").unwrap(), before);
    }

    #[test]
    fn test_cleanup_leaves_primary_data() {
        let storage = storage();
        let messages: Vec<ContactMessage> = (0..12).map(message).collect();
        assert!(storage.set(StorageKey::ContactMessages, &messages));
        assert!(storage.set(StorageKey::Upvotes, &vec!["a", "b"]));

        storage.cleanup();
        let upvotes: Vec<String> = storage.get(StorageKey::Upvotes, Vec::new());
        assert_eq!(upvotes, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_usage_counts_values_only() {
        let storage = storage();
        assert!(storage.set("key", "abc")); // stored as "\"abc\"" = 5 units
        assert_eq!(storage.usage(), 10);
        assert_eq!(storage.remaining(), 5 * 1024 * 1024 - 10);
    }

    #[test]
    fn test_storage_info_formats() {
        let storage = storage();
        let info = storage.storage_info();
        assert_eq!(info.used, "0 B");
        assert_eq!(info.remaining, "5.00 MB");
        assert_eq!(info.percent_used, 0);

        let payload = "p".repeat(1024 * 1024);
        assert!(storage.set("big", &payload));
        let info = storage.storage_info();
        assert_eq!(info.used, "2.00 MB");
        assert_eq!(info.percent_used, 40);
    }

    #[test]
    fn test_near_limit() {
        let limits = StorageLimits {
            quota_bytes: 1000,
            near_limit_bytes: 500,
            ..StorageLimits::default()
        };
        let storage = Storage::with_limits(MemoryStore::new(), limits);
        assert!(!storage.is_near_limit());
        assert!(storage.set("k", &"n".repeat(300)));
        assert!(storage.is_near_limit());
    }

    #[test]
    fn test_clear_all_removes_catalogue_keys_only() {
        let storage = storage();
        for key in StorageKey::ALL {
            assert!(storage.set(key, &1));
        }
        assert!(storage.set("unrelated", &2));

        assert!(storage.clear_all());
        assert_eq!(storage.store().keys().unwrap(), vec!["unrelated".to_string()]);
    }

    #[test]
    fn test_clear_all_reports_failure_when_unavailable() {
        let storage = storage();
        storage.store().set_available(false);
        assert!(!storage.clear_all());
    }
}
