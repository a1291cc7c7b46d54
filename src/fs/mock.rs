// src/fs/mock.rs

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};

use super::FileSystem;

/// In-memory filesystem for tests.
///
/// Directories exist implicitly as ancestors of files, or explicitly via
/// [`MockFileSystem::add_dir`]. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
    read_only: bool,
}

impl MockState {
    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
            || self.files.keys().any(|f| f.ancestors().skip(1).any(|a| a == path))
    }
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.state()
            .files
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        self.state().dirs.insert(path.as_ref().to_path_buf());
    }

    /// Make writes and removals fail with `PermissionDenied`.
    pub fn set_read_only(&self, read_only: bool) {
        self.state().read_only = read_only;
    }

    fn check_writable(&self, path: &Path) -> Result<()> {
        if self.state().read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("read-only filesystem: {:?}", path),
            )
            .into());
        }
        Ok(())
    }

    /// Current contents of a file, if present and valid UTF-8.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state()
            .files
            .get(path.as_ref())
            .and_then(|bytes| String::from_utf8(bytes.clone()).ok())
    }

    /// All file paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.state().files.keys().cloned().collect()
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let state = self.state();
        match state.files.get(path) {
            Some(bytes) => {
                String::from_utf8(bytes.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            None if state.is_dir(path) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(not_found(path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.check_writable(path)?;
        self.add_file(path, contents);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.check_writable(path)?;
        match self.state().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(not_found(path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state();
        state.files.contains_key(path) || state.is_dir(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.state().files.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.state().is_dir(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state();
        if !state.is_dir(path) {
            return Err(anyhow!("Not a directory or not found: {:?}", path));
        }

        let children: BTreeSet<PathBuf> = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter_map(|p| {
                p.ancestors()
                    .skip(1)
                    .zip(p.ancestors())
                    .find(|(parent, _)| *parent == path)
                    .map(|(_, child)| child.to_path_buf())
            })
            .collect();
        Ok(children.into_iter().collect())
    }
}

fn not_found(path: &Path) -> anyhow::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("File not found: {:?}", path)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_imply_their_directories() {
        let fs = MockFileSystem::new();
        fs.add_file("/tasks/a.tasks.json", "{}");
        fs.add_file("/tasks/nested/b.tasks.json", "{}");

        assert!(fs.is_dir(Path::new("/tasks")));
        assert!(fs.is_file(Path::new("/tasks/a.tasks.json")));
        assert_eq!(
            fs.read_dir(Path::new("/tasks")).unwrap(),
            vec![
                PathBuf::from("/tasks/a.tasks.json"),
                PathBuf::from("/tasks/nested")
            ]
        );

        fs.remove_file(Path::new("/tasks/a.tasks.json")).unwrap();
        assert!(!fs.exists(Path::new("/tasks/a.tasks.json")));
        assert!(fs.read_to_string(Path::new("/tasks/a.tasks.json")).is_err());
    }

    #[test]
    fn read_only_rejects_changes() {
        let fs = MockFileSystem::new();
        fs.add_file("/tasks/a.tasks.json", "{}");
        fs.set_read_only(true);

        assert!(fs.remove_file(Path::new("/tasks/a.tasks.json")).is_err());
        assert!(fs.write(Path::new("/tasks/b.tasks.json"), b"{}").is_err());
        assert_eq!(fs.paths(), vec![PathBuf::from("/tasks/a.tasks.json")]);

        fs.set_read_only(false);
        assert!(fs.remove_file(Path::new("/tasks/a.tasks.json")).is_ok());
    }
}
