//! In-memory source repository for dry runs and tests.

use crate::protocol::SourceAccessor;
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemorySource {
    files: Mutex<BTreeMap<PathBuf, String>>,
    read_only: Mutex<BTreeSet<PathBuf>>,
    failing_writes: Mutex<BTreeSet<PathBuf>>,
    failing_copies: Mutex<BTreeSet<PathBuf>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.put(path, content);
        self
    }

    pub fn put(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.into(), content.into());
        }
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .ok()
            .and_then(|files| files.get(path.as_ref()).cloned())
    }

    /// Full copy of every file, for before/after comparisons.
    pub fn snapshot(&self) -> BTreeMap<PathBuf, String> {
        self.files
            .lock()
            .map(|files| files.clone())
            .unwrap_or_default()
    }

    pub fn set_read_only(&self, path: impl Into<PathBuf>) {
        if let Ok(mut set) = self.read_only.lock() {
            set.insert(path.into());
        }
    }

    /// Make every write to `path` fail even though it reports as writable.
    pub fn fail_writes_to(&self, path: impl Into<PathBuf>) {
        if let Ok(mut set) = self.failing_writes.lock() {
            set.insert(path.into());
        }
    }

    /// Make every copy onto `path` fail, so a backup of it can be taken but never restored.
    pub fn fail_copies_to(&self, path: impl Into<PathBuf>) {
        if let Ok(mut set) = self.failing_copies.lock() {
            set.insert(path.into());
        }
    }

    fn lock_files(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<PathBuf, String>>> {
        self.files
            .lock()
            .map_err(|_| anyhow!("memory source lock poisoned"))
    }
}

impl SourceAccessor for MemorySource {
    fn read_file(&self, path: &Path) -> Result<String> {
        self.lock_files()?
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("No such file: {}", path.display()))
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        let blocked = self
            .failing_writes
            .lock()
            .map(|set| set.contains(path))
            .unwrap_or(false);
        if blocked || !self.is_writable(path) {
            return Err(anyhow!("Write refused: {}", path.display()));
        }
        self.lock_files()?
            .insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let blocked = self
            .failing_copies
            .lock()
            .map(|set| set.contains(dst))
            .unwrap_or(false);
        if blocked {
            return Err(anyhow!("Copy refused: {}", dst.display()));
        }
        let mut files = self.lock_files()?;
        let content = files
            .get(src)
            .cloned()
            .ok_or_else(|| anyhow!("No such file: {}", src.display()))?;
        files.insert(dst.to_path_buf(), content);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files
            .lock()
            .map(|files| files.contains_key(path))
            .unwrap_or(false)
    }

    fn is_writable(&self, path: &Path) -> bool {
        !self
            .read_only
            .lock()
            .map(|set| set.contains(path))
            .unwrap_or(true)
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(self
            .lock_files()?
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.lock_files()?
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| anyhow!("No such file: {}", path.display()))
    }
}
