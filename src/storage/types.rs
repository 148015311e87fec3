use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Typed failure of a persistence-layer read or entity write.
///
/// The plain `get`/`set` accessors never surface this; it is returned by
/// `try_get` (so callers can tell "never written" from "corrupt" from "wrong
/// shape") and by the entity operations that persist a collection.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying store is disabled or failed its availability probe
    #[error("Storage is unavailable")]
    Unavailable,

    /// Nothing has been written under this key
    #[error("No value stored under '{0}'")]
    NotFound(String),

    /// The stored text is not valid JSON
    #[error("Value under '{key}' is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The stored JSON does not have the expected shape
    #[error("Value under '{key}' has an unexpected shape: {source}")]
    SchemaMismatch {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A write was refused (quota exhausted even after cleanup, or store failure)
    #[error("Failed to persist '{0}'")]
    WriteFailed(String),
}

// ============================================================================
// Persisted Records
// ============================================================================

/// A curated article as cached and saved to the reading list.
///
/// Only the fields the persistence layer and its callers reason about are
/// typed; anything else in the record is carried through `extra` untouched so
/// that import/export never drops data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub publisher: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub authors: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub abstract_preview: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(default)]
    pub upvotes: i64,
    /// Epoch milliseconds; may be fractional
    #[serde(default)]
    pub timestamp: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Article {
    /// Minimal record with only identity fields set.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            publisher: String::new(),
            authors: Vec::new(),
            abstract_preview: String::new(),
            category: String::new(),
            upvotes: 0,
            timestamp: 0.0,
            extra: Map::new(),
        }
    }
}

/// Contact form fields as submitted, before the layer stamps them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDraft {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

/// A stored contact form submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMessage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub id: String,
}

// ============================================================================
// Limits & Reports
// ============================================================================

/// Budget and retention settings for a [`Storage`](super::Storage).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageLimits {
    /// Assumed ceiling of the underlying store
    pub quota_bytes: u64,
    /// Contact messages kept by cleanup
    pub message_retention: usize,
    /// Remaining space below which the store counts as nearly full
    pub near_limit_bytes: u64,
}

impl StorageLimits {
    pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;
    pub const DEFAULT_MESSAGE_RETENTION: usize = 10;
    pub const DEFAULT_NEAR_LIMIT_BYTES: u64 = 100 * 1024;
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self {
            quota_bytes: Self::DEFAULT_QUOTA_BYTES,
            message_retention: Self::DEFAULT_MESSAGE_RETENTION,
            near_limit_bytes: Self::DEFAULT_NEAR_LIMIT_BYTES,
        }
    }
}

/// Snapshot of space usage, derived from the usage estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    /// Human-formatted used space
    pub used: String,
    /// Human-formatted remaining space (negative once over the ceiling)
    pub remaining: String,
    /// Rounded percentage of the ceiling in use
    pub percent_used: u64,
    pub used_bytes: u64,
    pub remaining_bytes: i64,
}

/// Result of a membership toggle (saved article, upvote).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Added,
    Removed,
}

/// Result of a newsletter subscription attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    New,
    AlreadySubscribed,
}
