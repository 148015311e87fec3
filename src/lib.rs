//! Local persistence for The Design Times: reading list, upvotes, newsletter
//! sign-ups and contact messages stored as JSON in a string key-value store,
//! with quota accounting, cleanup, and library backup/restore.

pub mod config;
pub mod storage;
pub mod util;
