//! Small helpers shared by the persistence layer and the CLI.
//!
//! - **Byte formatting**: human-readable sizes for storage reports
//! - **Email normalisation**: canonical form for the subscriber list

mod format;

pub use format::{format_bytes, normalize_email};
