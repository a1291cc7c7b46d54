// src/persist/gateway.rs

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{collection_path, is_collection_file};
use crate::errors::{Result, WardenError};
use crate::fs::{FileSystem, RealFileSystem};
use crate::task::{Collection, CollectionDef, SyncReport, TaskStore};
use crate::trigger::TriggerManager;

/// Outcome of loading a directory of collection files.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<SyncReport>,
    /// File and reason, for every file that could not be applied.
    pub failed: Vec<(PathBuf, String)>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Projection of the task store onto a directory of collection files.
#[derive(Debug, Clone)]
pub struct Persistence {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
}

impl Persistence {
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            dir: dir.into(),
        }
    }

    /// Persistence on the real filesystem.
    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(RealFileSystem), dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, collection: &str) -> PathBuf {
        collection_path(&self.dir, collection)
    }

    /// Parse one collection file without applying it.
    pub fn read_collection_file(&self, path: &Path) -> Result<CollectionDef> {
        let contents = self
            .fs
            .read_to_string(path)
            .map_err(|e| fs_error(path, e))?;
        serde_json::from_str(&contents)
            .map_err(|e| WardenError::Validation(format!("{}: {e}", path.display())))
    }

    /// Parse a collection file and apply it as a full sync.
    ///
    /// Either the whole file is applied or nothing is.
    pub fn load_collection_from_file(
        &self,
        path: &Path,
        store: &mut TaskStore,
        triggers: &mut TriggerManager,
    ) -> Result<SyncReport> {
        let def = self.read_collection_file(path)?;
        warn_on_name_mismatch(path, &def.collection);
        store.sync_collection(def, triggers)
    }

    /// Load every collection file in the directory.
    ///
    /// All files are applied as one batch, so tasks may depend on tasks of
    /// any other file, including each other's. A file that cannot be applied
    /// is reported without holding back the rest. A missing directory loads
    /// nothing.
    pub fn load_tasks(
        &self,
        store: &mut TaskStore,
        triggers: &mut TriggerManager,
    ) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        if !self.fs.is_dir(&self.dir) {
            warn!(dir = %self.dir.display(), "tasks directory does not exist; nothing loaded");
            return Ok(report);
        }

        let mut paths = Vec::new();
        let mut defs = Vec::new();
        let entries = self
            .fs
            .read_dir(&self.dir)
            .map_err(|e| fs_error(&self.dir, e))?;
        for path in entries {
            if !is_collection_file(&path) || !self.fs.is_file(&path) {
                continue;
            }
            match self.read_collection_file(&path) {
                Ok(def) => {
                    warn_on_name_mismatch(&path, &def.collection);
                    paths.push(path);
                    defs.push(def);
                }
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "failed to parse collection file");
                    report.failed.push((path, err.to_string()));
                }
            }
        }

        let batch = store.sync_collections(defs, triggers);
        report.loaded = batch.applied;
        for (index, err) in batch.rejected {
            let Some(path) = paths.get(index).cloned() else {
                continue;
            };
            warn!(file = %path.display(), error = %err, "failed to load collection file");
            report.failed.push((path, err.to_string()));
        }

        info!(
            dir = %self.dir.display(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "tasks loaded"
        );
        Ok(report)
    }

    /// Write one collection file.
    pub fn save_collection(&self, collection: &Collection) -> Result<PathBuf> {
        let path = self.path_for(&collection.name);
        let body = serde_json::to_string_pretty(&snapshot_collection(collection))?;
        self.fs
            .write(&path, body.as_bytes())
            .map_err(|e| fs_error(&path, e))?;
        Ok(path)
    }

    /// Write every collection in the store.
    pub fn save_tasks(&self, store: &TaskStore) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for collection in store.collections() {
            written.push(self.save_collection(collection)?);
        }
        debug!(dir = %self.dir.display(), files = written.len(), "tasks saved");
        Ok(written)
    }

    /// Remove the file of a deleted collection. Returns whether it existed.
    pub fn remove_collection_file(&self, collection: &str) -> Result<bool> {
        let path = self.path_for(collection);
        if !self.fs.exists(&path) {
            return Ok(false);
        }
        self.fs.remove_file(&path).map_err(|e| fs_error(&path, e))?;
        info!(file = %path.display(), "collection file removed");
        Ok(true)
    }
}

/// File form of a collection: each task's own definition plus its current
/// `enabled` flag.
pub fn snapshot_collection(collection: &Collection) -> CollectionDef {
    let tasks = collection
        .tasks
        .iter()
        .map(|(name, task)| {
            let mut def = task.definition().clone();
            def.set("enabled", task.enabled);
            (name.clone(), def)
        })
        .collect();

    CollectionDef {
        collection: collection.name.clone(),
        defaults: collection.defaults.clone(),
        config: collection.config,
        tasks,
    }
}

/// Report a filesystem failure as an I/O error naming the path, keeping the
/// underlying error kind when there is one.
fn fs_error(path: &Path, err: anyhow::Error) -> WardenError {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<io::Error>())
        .map_or(io::ErrorKind::Other, io::Error::kind);
    WardenError::Io(io::Error::new(
        kind,
        format!("{}: {err:#}", path.display()),
    ))
}

fn warn_on_name_mismatch(path: &Path, collection: &str) {
    let expected = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix(super::FILE_SUFFIX));
    if expected.is_some_and(|stem| stem != collection) {
        warn!(
            file = %path.display(),
            collection = %collection,
            "collection name does not match file name; saving will use the collection name"
        );
    }
}
