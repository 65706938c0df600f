//! Filesystem-backed source repository.

use crate::util::resolve_under_root;
use anyhow::{anyhow, Context, Result};
use concord_core::SourceAccessor;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Reads and writes business-logic files under one root directory.
///
/// Paths are repository-relative; absolute paths and `..` are refused.
#[derive(Debug, Clone)]
pub struct FsSourceAccessor {
    root: PathBuf,
}

impl FsSourceAccessor {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve source root '{}'", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        resolve_under_root(&self.root, path).map_err(|e| anyhow!(e))
    }
}

impl SourceAccessor for FsSourceAccessor {
    fn read_file(&self, path: &Path) -> Result<String> {
        let absolute = self.resolve(path)?;
        fs::read_to_string(&absolute)
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Write through a sibling temp file and rename, so readers never see half a file.
    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        let absolute = self.resolve(path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for {}", path.display()))?;
        }
        let file_name = absolute
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("Invalid file name: {}", path.display()))?;
        let tmp_path = absolute.with_file_name(format!(".{}.concord-tmp", file_name));
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .with_context(|| format!("Failed to open temp file for {}", path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        file.sync_all().ok();
        drop(file);

        if let Ok(meta) = fs::metadata(&absolute) {
            let _ = fs::set_permissions(&tmp_path, meta.permissions());
        }
        if let Err(err) = fs::rename(&tmp_path, &absolute) {
            let _ = fs::remove_file(&tmp_path);
            return Err(anyhow!("Failed to replace {}: {}", path.display(), err));
        }
        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for {}", dst.display()))?;
        }
        fs::copy(&from, &to)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn is_writable(&self, path: &Path) -> bool {
        let Ok(absolute) = self.resolve(path) else {
            return false;
        };
        match fs::metadata(&absolute) {
            Ok(meta) => meta.is_file() && !meta.permissions().readonly(),
            Err(_) => false,
        }
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let absolute = self.resolve(dir)?;
        if !absolute.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&absolute)
            .with_context(|| format!("Failed to list {}", dir.display()))?
        {
            let entry = entry?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                out.push(dir.join(entry.file_name()));
            }
        }
        out.sort();
        Ok(out)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let absolute = self.resolve(path)?;
        fs::remove_file(&absolute).with_context(|| format!("Failed to remove {}", path.display()))
    }
}
