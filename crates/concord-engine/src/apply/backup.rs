//! Attempt-scoped file snapshots.
//!
//! A [`BackupSet`] belongs to exactly one attempt and is passed explicitly through
//! that attempt's call chain. Backup files stay on disk after the attempt ends and
//! are only removed by [`BackupManager::prune`].

use anyhow::Result;
use chrono::Utc;
use concord_adapters::util::sanitize_component;
use concord_core::{Backup, ConcordError, SourceAccessor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Snapshots taken during one attempt, in the order the files were first touched.
#[derive(Debug, Clone)]
pub struct BackupSet {
    attempt_id: String,
    backups: Vec<Backup>,
}

impl BackupSet {
    fn new() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            attempt_id: id[..8].to_string(),
            backups: Vec::new(),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.backups.iter().any(|b| b.original_path == path)
    }

    pub fn backups(&self) -> &[Backup] {
        &self.backups
    }

    pub fn backup_paths(&self) -> Vec<PathBuf> {
        self.backups.iter().map(|b| b.backup_path.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub restored: Vec<PathBuf>,
    pub errors: Vec<String>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct BackupManager {
    source: Arc<dyn SourceAccessor>,
    backup_dir: PathBuf,
    retention: usize,
}

impl BackupManager {
    pub fn new(source: Arc<dyn SourceAccessor>, backup_dir: PathBuf, retention: usize) -> Self {
        Self {
            source,
            backup_dir,
            retention,
        }
    }

    pub fn begin_attempt(&self) -> BackupSet {
        BackupSet::new()
    }

    /// Copy `path` aside unless this attempt already holds a snapshot of it.
    pub fn snapshot(&self, set: &mut BackupSet, path: &Path) -> Result<(), ConcordError> {
        if set.contains(path) {
            return Ok(());
        }
        let now = Utc::now();
        // Timestamp first so lexical order is creation order.
        let name = format!(
            "{}-{}-{}.bak",
            now.format("%Y%m%dT%H%M%S%.3fZ"),
            set.attempt_id,
            sanitize_component(&path.to_string_lossy())
        );
        let backup_path = self.backup_dir.join(name);
        self.source
            .copy_file(path, &backup_path)
            .map_err(|e| ConcordError::apply(path, format!("backup failed: {:#}", e)))?;
        tracing::debug!(file = %path.display(), backup = %backup_path.display(), "file backed up");
        set.backups.push(Backup {
            original_path: path.to_path_buf(),
            backup_path,
            timestamp: now,
        });
        Ok(())
    }

    /// Copy every snapshot back over its original, newest first. Keeps going past
    /// individual failures so one bad file does not strand the others.
    pub fn rollback(&self, set: &BackupSet) -> RollbackReport {
        let mut report = RollbackReport::default();
        for backup in set.backups.iter().rev() {
            match self
                .source
                .copy_file(&backup.backup_path, &backup.original_path)
            {
                Ok(()) => report.restored.push(backup.original_path.clone()),
                Err(err) => report.errors.push(format!(
                    "restore {}: {:#}",
                    backup.original_path.display(),
                    err
                )),
            }
        }
        if report.is_clean() {
            tracing::info!(files = report.restored.len(), "rollback completed");
        } else {
            tracing::warn!(errors = ?report.errors, "rollback had issues");
        }
        report
    }

    /// Delete the oldest backup files beyond the retention count.
    pub fn prune(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = self
            .source
            .list_files(&self.backup_dir)?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "bak"))
            .collect();
        if files.len() <= self.retention {
            return Ok(Vec::new());
        }
        files.sort();
        let excess = files.len() - self.retention;
        let mut removed = Vec::with_capacity(excess);
        for path in files.into_iter().take(excess) {
            self.source.remove_file(&path)?;
            removed.push(path);
        }
        tracing::info!(removed = removed.len(), kept = self.retention, "pruned backups");
        Ok(removed)
    }
}
