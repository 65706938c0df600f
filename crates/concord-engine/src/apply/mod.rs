//! Fix application: preflight, in-memory edit, backup, write, post-apply gate.
//!
//! Every exit path after the first write either keeps a fully validated change
//! or restores each touched file from its backup.

mod backup;
mod checks;
mod edit;

pub use backup::{BackupManager, BackupSet, RollbackReport};
pub use checks::{
    check_data_files, is_data_file, run_check_commands, CheckResult, CheckStatus,
};
pub use edit::apply_change;

use concord_core::settings::RemediationSettings;
use concord_core::{ApplyOutcome, CodeChange, ConcordError, SelectedFix, SourceAccessor};
use std::path::PathBuf;
use std::sync::Arc;

/// The edits that will actually be attempted, grouped per file in first-touched order.
struct EditPlan<'a> {
    files: Vec<(PathBuf, Vec<&'a CodeChange>)>,
    skipped: Vec<String>,
}

impl<'a> EditPlan<'a> {
    fn build(fix: &'a SelectedFix) -> Self {
        let mut plan = EditPlan {
            files: Vec::new(),
            skipped: Vec::new(),
        };
        for change in &fix.primary.code_changes {
            plan.push(change);
        }
        let primary_files: Vec<PathBuf> = plan.files.iter().map(|(p, _)| p.clone()).collect();
        for change in &fix.system_wide {
            if primary_files.contains(&change.file) {
                plan.skipped.push(format!(
                    "{}: {} (file already modified by the primary fix)",
                    change.file.display(),
                    if change.description.is_empty() {
                        "system-wide edit"
                    } else {
                        change.description.as_str()
                    }
                ));
                continue;
            }
            plan.push(change);
        }
        plan
    }

    fn push(&mut self, change: &'a CodeChange) {
        match self.files.iter_mut().find(|(p, _)| *p == change.file) {
            Some((_, changes)) => changes.push(change),
            None => self.files.push((change.file.clone(), vec![change])),
        }
    }
}

pub struct FixApplier {
    source: Arc<dyn SourceAccessor>,
    backups: BackupManager,
    settings: RemediationSettings,
    check_root: Option<PathBuf>,
}

impl FixApplier {
    pub fn new(source: Arc<dyn SourceAccessor>, settings: RemediationSettings) -> Self {
        let backups = BackupManager::new(
            source.clone(),
            settings.backup_dir.clone(),
            settings.backup_retention,
        );
        Self {
            source,
            backups,
            settings,
            check_root: None,
        }
    }

    /// Directory the check commands run in; without one they report unavailable.
    pub fn with_check_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.check_root = Some(root.into());
        self
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn settings(&self) -> &RemediationSettings {
        &self.settings
    }

    /// Apply the primary fix, then the system-wide edits, as one transaction.
    ///
    /// The returned set holds this attempt's snapshots; on failure they have already
    /// been restored.
    pub async fn apply_comprehensive_fix(&self, fix: &SelectedFix) -> (ApplyOutcome, BackupSet) {
        let plan = EditPlan::build(fix);
        let mut set = self.backups.begin_attempt();
        let mut outcome = ApplyOutcome {
            skipped_changes: plan.skipped.clone(),
            ..ApplyOutcome::default()
        };

        let staged = match self.preflight(fix, &plan).and_then(|()| self.stage(&plan)) {
            Ok(staged) => staged,
            Err(err) => {
                tracing::warn!(error = %err, "fix rejected before any write");
                outcome.errors.push(err.to_string());
                return (outcome, set);
            }
        };

        let result = match self.write_all(&staged, &mut set, &mut outcome) {
            Ok(()) => self.post_validate(&outcome.modified_files).await,
            Err(err) => Err(err),
        };
        outcome.backup_paths = set.backup_paths();

        match result {
            Ok(()) => {
                outcome.success = true;
                tracing::info!(
                    files = outcome.modified_files.len(),
                    skipped = outcome.skipped_changes.len(),
                    "fix applied"
                );
            }
            Err(err) => {
                tracing::warn!(kind = err.kind(), error = %err, "fix failed; rolling back");
                outcome.errors.push(err.to_string());
                let report = self.backups.rollback(&set);
                outcome.rolled_back = report.restored;
                outcome.rollback_errors = report.errors;
                outcome.modified_files.clear();
            }
        }
        (outcome, set)
    }

    pub fn rollback(&self, set: &BackupSet) -> RollbackReport {
        self.backups.rollback(set)
    }

    /// Existence and writability of every touched file. No side effects.
    fn preflight(&self, fix: &SelectedFix, plan: &EditPlan<'_>) -> Result<(), ConcordError> {
        if plan.files.is_empty() {
            return Err(ConcordError::ValidationGate {
                errors: vec!["fix contains no applicable edits".to_string()],
            });
        }
        let mut targets = fix.primary.touched_files();
        for (path, _) in &plan.files {
            if !targets.contains(path) {
                targets.push(path.clone());
            }
        }
        for path in &targets {
            if !self.source.exists(path) {
                return Err(ConcordError::apply(path, "target file does not exist"));
            }
            if !self.source.is_writable(path) {
                return Err(ConcordError::apply(path, "target file is not writable"));
            }
        }
        Ok(())
    }

    /// Compute every file's new content in memory.
    fn stage(&self, plan: &EditPlan<'_>) -> Result<Vec<(PathBuf, String)>, ConcordError> {
        let mut staged = Vec::with_capacity(plan.files.len());
        for (path, changes) in &plan.files {
            let original = self
                .source
                .read_file(path)
                .map_err(|e| ConcordError::apply(path, format!("{:#}", e)))?;
            let mut content = original.clone();
            for change in changes {
                content = apply_change(&content, change)?;
            }
            if content != original {
                staged.push((path.clone(), content));
            }
        }
        if staged.is_empty() {
            return Err(ConcordError::ValidationGate {
                errors: vec!["edits leave every file unchanged".to_string()],
            });
        }
        Ok(staged)
    }

    fn write_all(
        &self,
        staged: &[(PathBuf, String)],
        set: &mut BackupSet,
        outcome: &mut ApplyOutcome,
    ) -> Result<(), ConcordError> {
        for (path, content) in staged {
            self.backups.snapshot(set, path)?;
            self.source
                .write_file(path, content)
                .map_err(|e| ConcordError::apply(path, format!("{:#}", e)))?;
            outcome.modified_files.push(path.clone());
        }
        Ok(())
    }

    /// Data files must parse and every configured command must pass. A change to
    /// any other file also needs at least one command to have actually run.
    async fn post_validate(&self, modified: &[PathBuf]) -> Result<(), ConcordError> {
        let mut results = check_data_files(self.source.as_ref(), modified);
        let commands = run_check_commands(self.check_root.as_deref(), &self.settings).await;
        let commands_ran = commands.iter().any(|r| r.status != CheckStatus::Unavailable);
        results.extend(commands);
        for unavailable in results.iter().filter(|r| r.status == CheckStatus::Unavailable) {
            tracing::warn!(check = %unavailable.describe(), "post-apply check unavailable");
        }
        let mut errors: Vec<String> = results
            .iter()
            .filter(|r| r.status == CheckStatus::Failed)
            .map(CheckResult::describe)
            .collect();

        let unchecked: Vec<String> = modified
            .iter()
            .filter(|path| !is_data_file(path))
            .map(|path| path.display().to_string())
            .collect();
        if !unchecked.is_empty() && !commands_ran {
            if self.settings.allow_unchecked_edits {
                tracing::warn!(files = ?unchecked, "logic edit accepted without any check command");
            } else {
                errors.push(format!(
                    "no static or regression check ran for {}",
                    unchecked.join(", ")
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConcordError::ValidationGate { errors })
        }
    }
}
