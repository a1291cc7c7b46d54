// src/persist/mod.rs

//! Collection files.
//!
//! Each collection lives in `<tasks_path>/<collection>.tasks.json`, in the
//! [`CollectionDef`](crate::task::CollectionDef) format. Loading applies a
//! file as a full sync of that collection; saving writes every collection
//! back from the task store.

pub mod gateway;

pub use gateway::{LoadReport, Persistence, snapshot_collection};

use std::path::{Path, PathBuf};

/// Suffix of collection files.
pub const FILE_SUFFIX: &str = ".tasks.json";

/// `<dir>/<collection>.tasks.json`
pub fn collection_path(dir: &Path, collection: &str) -> PathBuf {
    dir.join(format!("{collection}{FILE_SUFFIX}"))
}

/// Whether `path` looks like a collection file.
pub fn is_collection_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(FILE_SUFFIX) && n.len() > FILE_SUFFIX.len())
        .unwrap_or(false)
}
