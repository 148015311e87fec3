mod backend;
mod backup;
mod collections;
mod file_store;
mod keys;
mod service;
mod types;

pub use backend::{stored_size, KeyValueStore, MemoryStore, StoreError};
pub use backup::{
    backup_file_name, Backup, ExportError, ImportError, ImportOutcome, ImportSummary,
    BACKUP_VERSION,
};
pub use file_store::{FileStore, FileStoreError};
pub use keys::StorageKey;
pub use service::Storage;
pub use types::{
    Article, ContactDraft, ContactMessage, StorageError, StorageInfo, StorageLimits,
    Subscription, Toggle,
};
