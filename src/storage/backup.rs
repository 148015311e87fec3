//! Reading-list backup: export to a portable JSON file and merge it back in.
//!
//! Backup document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "exportDate": "2026-10-18T09:30:00.000Z",
//!   "library": [ { "id": "...", "title": "...", ... } ],
//!   "upvotes": [ "article-id", ... ]
//! }
//! ```
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::backend::KeyValueStore;
use super::keys::StorageKey;
use super::service::Storage;
use super::types::{Article, StorageError};

/// Format version written by export
pub const BACKUP_VERSION: u32 = 1;

// ============================================================================
// Error Types
// ============================================================================

/// Why an import was rejected. `Display` is the user-facing message.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read file")]
    Read(#[source] std::io::Error),

    #[error("Failed to parse backup file")]
    Parse(#[source] serde_json::Error),

    #[error("Invalid backup file format")]
    InvalidFormat,

    #[error("Failed to save imported data")]
    Write(#[source] StorageError),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to serialize backup: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write backup file: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Backup Document
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub version: u32,
    /// ISO-8601 UTC timestamp with millisecond precision
    pub export_date: String,
    pub library: Vec<Article>,
    pub upvotes: Vec<String>,
}

/// `<app_name>-backup-<YYYY-MM-DD>.json`
pub fn backup_file_name(app_name: &str, date: NaiveDate) -> String {
    format!("{}-backup-{}.json", app_name, date.format("%Y-%m-%d"))
}

/// Counts from a successful import.
///
/// `articles` and `upvotes` are the sizes of the imported file's lists, which is
/// what the user-facing message reports; `added_*` are the entries that were
/// actually new locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub articles: usize,
    pub upvotes: usize,
    pub added_articles: usize,
    pub added_upvotes: usize,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Imported {} articles and {} upvotes",
            self.articles, self.upvotes
        )
    }
}

/// Flat `{ success, message }` result handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub success: bool,
    pub message: String,
}

impl From<Result<ImportSummary, ImportError>> for ImportOutcome {
    fn from(result: Result<ImportSummary, ImportError>) -> Self {
        match result {
            Ok(summary) => Self {
                success: true,
                message: summary.to_string(),
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
            },
        }
    }
}

/// JavaScript-style truthiness, used for the required-field check.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

// ============================================================================
// Export / Import
// ============================================================================

impl<S: KeyValueStore> Storage<S> {
    /// Snapshot the reading list and upvotes. Never writes.
    pub fn export_library(&self) -> Backup {
        Backup {
            version: BACKUP_VERSION,
            export_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            library: self.library(),
            upvotes: self.upvotes(),
        }
    }

    /// Write a pretty-printed backup into `dir` and return its path.
    pub async fn write_backup(&self, dir: &Path, app_name: &str) -> Result<PathBuf, ExportError> {
        let backup = self.export_library();
        let date = DateTime::parse_from_rfc3339(&backup.export_date)
            .map(|d| d.date_naive())
            .unwrap_or_else(|_| Utc::now().date_naive());
        let path = dir.join(backup_file_name(app_name, date));

        let json = serde_json::to_string_pretty(&backup)?;
        tokio::fs::write(&path, json).await?;

        tracing::info!(
            path = %path.display(),
            articles = backup.library.len(),
            upvotes = backup.upvotes.len(),
            "Exported library backup"
        );
        Ok(path)
    }

    /// Read the backup at `path` and merge it. Never fails; see [`ImportOutcome`].
    pub async fn import_library(&self, path: &Path) -> ImportOutcome {
        let result = match tokio::fs::read_to_string(path).await {
            Ok(content) => self.import_library_str(&content),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read backup file");
                Err(ImportError::Read(e))
            }
        };
        result.into()
    }

    /// Validate `content` as a backup and merge it into local storage.
    ///
    /// Articles are merged by id, keeping whichever copy was seen first (local
    /// entries win, then earlier file entries). Upvotes are merged as an
    /// order-preserving set union. Nothing is written unless validation passes
    /// and the local library and upvotes can themselves be read.
    pub fn import_library_str(&self, content: &str) -> Result<ImportSummary, ImportError> {
        let data: Value = serde_json::from_str(content).map_err(ImportError::Parse)?;

        if !is_truthy(data.get("version"))
            || !is_truthy(data.get("library"))
            || !is_truthy(data.get("upvotes"))
        {
            tracing::warn!("Rejected backup missing version, library or upvotes");
            return Err(ImportError::InvalidFormat);
        }

        let imported_library: Vec<Article> =
            serde_json::from_value(data["library"].clone()).map_err(|e| {
                tracing::warn!(error = %e, "Backup library has an unexpected shape");
                ImportError::InvalidFormat
            })?;
        let imported_upvotes: Vec<String> =
            serde_json::from_value(data["upvotes"].clone()).map_err(|e| {
                tracing::warn!(error = %e, "Backup upvotes have an unexpected shape");
                ImportError::InvalidFormat
            })?;

        let mut library: Vec<Article> = self
            .load_for_update(StorageKey::Library)
            .map_err(ImportError::Write)?;
        let existing_upvotes: Vec<String> = self
            .load_for_update(StorageKey::Upvotes)
            .map_err(ImportError::Write)?;

        let before_articles = library.len();
        let mut seen: HashSet<String> = library.iter().map(|a| a.id.clone()).collect();
        for article in &imported_library {
            if seen.insert(article.id.clone()) {
                library.push(article.clone());
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let upvotes: Vec<String> = existing_upvotes
            .iter()
            .chain(imported_upvotes.iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        let added_upvotes = upvotes
            .len()
            .saturating_sub(existing_upvotes.iter().collect::<HashSet<_>>().len());

        if !self.set(StorageKey::Library, &library) {
            return Err(ImportError::Write(StorageError::WriteFailed(
                StorageKey::Library.as_str().to_string(),
            )));
        }
        if !self.set(StorageKey::Upvotes, &upvotes) {
            return Err(ImportError::Write(StorageError::WriteFailed(
                StorageKey::Upvotes.as_str().to_string(),
            )));
        }

        let summary = ImportSummary {
            articles: imported_library.len(),
            upvotes: imported_upvotes.len(),
            added_articles: library.len() - before_articles,
            added_upvotes,
        };
        tracing::info!(
            articles = summary.articles,
            upvotes = summary.upvotes,
            added_articles = summary.added_articles,
            added_upvotes = summary.added_upvotes,
            "Imported library backup"
        );
        Ok(summary)
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

    #[test]
    fn test_backup_file_name() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(
            backup_file_name("thedesigntimes", date),
            "thedesigntimes-backup-2026-03-07.json"
        );
    }

    #[test]
    fn test_export_snapshot_does_not_write() {
        let storage = storage();
        storage.toggle_saved(&Article::new("a", "A")).unwrap();
        storage.toggle_upvote("a").unwrap();
        let keys_before = storage.store().keys().unwrap();

        let backup = storage.export_library();
        assert_eq!(backup.version, 1);
        assert_eq!(backup.library.len(), 1);
        assert_eq!(backup.upvotes, vec!["a".to_string()]);
        assert!(backup.export_date.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(&backup.export_date).is_ok());
        assert_eq!(storage.store().keys().unwrap(), keys_before);
    }

    #[test]
    fn test_export_uses_camel_case() {
        let storage = storage();
        let value = serde_json::to_value(storage.export_library()).unwrap();
        assert!(value.get("exportDate").is_some());
        assert_eq!(value["library"], json!([]));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(null))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(Some(&json!(false))));
        assert!(is_truthy(Some(&json!(1))));
        assert!(is_truthy(Some(&json!([]))));
        assert!(is_truthy(Some(&json!({}))));
    }

    #[test]
    fn test_import_rejects_zero_version() {
        let storage = storage();
        let err = storage
            .import_library_str(r#"{"version": 0, "library": [], "upvotes": []}"#)
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidFormat));
    }

    #[test]
    fn test_import_accepts_empty_lists() {
        let storage = storage();
        let summary = storage
            .import_library_str(r#"{"version": 1, "library": [], "upvotes": []}"#)
            .unwrap();
        assert_eq!(summary.to_string(), "Imported 0 articles and 0 upvotes");
    }

    #[test]
    fn test_import_rejects_wrong_shapes() {
        let storage = storage();
        let err = storage
            .import_library_str(r#"{"version": 1, "library": "nope", "upvotes": []}"#)
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidFormat));

        let err = storage
            .import_library_str(r#"{"version": 1, "library": [], "upvotes": [1, 2]}"#)
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidFormat));
        assert!(storage.store().keys().unwrap().is_empty());
    }

    #[test]
    fn test_import_parse_failure_message() {
        let storage = storage();
        let outcome: ImportOutcome = storage.import_library_str("{oops").into();
        assert_eq!(
            outcome,
            ImportOutcome {
                success: false,
                message: "Failed to parse backup file".to_string(),
            }
        );
    }

    #[test]
    fn test_import_dedupes_within_file() {
        let storage = storage();
        let content = json!({
            "version": 1,
            "library": [
                {"id": "x", "title": "first"},
                {"id": "x", "title": "second"}
            ],
            "upvotes": ["x", "x"]
        })
        .to_string();

        let summary = storage.import_library_str(&content).unwrap();
        assert_eq!(summary.articles, 2);
        assert_eq!(summary.added_articles, 1);
        assert_eq!(summary.added_upvotes, 1);
        assert_eq!(storage.library()[0].title, "first");
        assert_eq!(storage.upvotes(), vec!["x".to_string()]);
    }

    #[test]
    fn test_import_write_failure_reported() {
        let storage = Storage::with_limits(
            MemoryStore::new(),
            crate::storage::StorageLimits {
                quota_bytes: 10,
                ..Default::default()
            },
        );
        let content = json!({
            "version": 1,
            "library": [{"id": "x", "title": "a long enough title"}],
            "upvotes": []
        })
        .to_string();

        let err = storage.import_library_str(&content).unwrap_err();
        assert!(matches!(err, ImportError::Write(_)));
        assert_eq!(err.to_string(), "Failed to save imported data");
    }

    #[test]
    fn test_import_keeps_unreadable_local_library() {
        let storage = storage();
        let raw = r#"[{"id":"fp-001","title":"A","upvotes":1200.5}]"#;
        storage.store().insert_raw(StorageKey::Library.as_str(), raw);

        let content = json!({
            "version": 1,
            "library": [{"id": "x", "title": "incoming"}],
            "upvotes": ["x"]
        })
        .to_string();

        let err = storage.import_library_str(&content).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Write(StorageError::SchemaMismatch { .. })
        ));
        assert_eq!(
            storage.store().get_item(StorageKey::Library.as_str()).unwrap().as_deref(),
            Some(raw)
        );
        assert_eq!(storage.store().get_item(StorageKey::Upvotes.as_str()).unwrap(), None);
    }
}
