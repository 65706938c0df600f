//! Self-healing remediation data model: detected defects, diagnoses, fixes,
//! attempts and the correction payload forwarded downstream.

use crate::model::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Issue-tracker kind that triggers remediation.
pub const MISSING_REQUIRED_FIELD: &str = "missing_required_field";

/// One entry in a job's issue tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedIssue {
    pub kind: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// A processed job as the bookkeeping store hands it to the remediation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    #[serde(default)]
    pub issues: Vec<TrackedIssue>,
    #[serde(default)]
    pub raw_payload: Value,
    #[serde(default)]
    pub current_response: Value,
    #[serde(default)]
    pub error_logs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    MissingRequiredField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn raised(self) -> Severity {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

/// A detected defect. Read-only input to diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosedIssue {
    pub job_id: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub missing_fields: Vec<String>,
    pub raw_payload: Value,
    pub current_response: Value,
    pub error_logs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    /// Corrects mapping/extraction logic.
    LogicChange,
    /// Only adds entries to an alias table.
    AliasAddition,
    /// Only adds entries to a schema table.
    SchemaEntry,
    ConfigChange,
}

impl FixType {
    pub fn is_data_only(&self) -> bool {
        matches!(self, FixType::AliasAddition | FixType::SchemaEntry)
    }
}

/// Structured insertion into a keyed container of a JSON or TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInsert {
    /// JSON pointer to the container (`""` is the document root).
    #[serde(default)]
    pub pointer: String,
    /// Key for object/table containers; `None` appends to an array.
    #[serde(default)]
    pub key: Option<String>,
    pub value: Value,
}

/// One file-level edit: either an anchored substitution or a container insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChange {
    pub file: PathBuf,
    #[serde(default)]
    pub description: String,
    /// Anchor text that must appear verbatim, exactly once.
    #[serde(default)]
    pub old_code: Option<String>,
    #[serde(default)]
    pub new_code: Option<String>,
    #[serde(default)]
    pub insert: Option<ContainerInsert>,
}

impl CodeChange {
    pub fn replace(
        file: impl Into<PathBuf>,
        old_code: impl Into<String>,
        new_code: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            description: String::new(),
            old_code: Some(old_code.into()),
            new_code: Some(new_code.into()),
            insert: None,
        }
    }

    pub fn insert(file: impl Into<PathBuf>, insert: ContainerInsert) -> Self {
        Self {
            file: file.into(),
            description: String::new(),
            old_code: None,
            new_code: None,
            insert: Some(insert),
        }
    }

    pub fn is_insertion(&self) -> bool {
        self.old_code.is_none() && self.insert.is_some()
    }

    /// Identity used to drop duplicate edits proposed by both validators.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.file.display(),
            self.old_code.as_deref().unwrap_or_default(),
            self.new_code.as_deref().unwrap_or_default(),
            self.insert
                .as_ref()
                .map(|i| serde_json::to_string(i).unwrap_or_default())
                .unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedFix {
    pub fix_type: FixType,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub target_files: Vec<PathBuf>,
    #[serde(default)]
    pub code_changes: Vec<CodeChange>,
}

impl ProposedFix {
    /// True when the fix only adds data (aliases, schema entries) instead of correcting logic.
    pub fn is_data_only(&self) -> bool {
        if self.fix_type.is_data_only() {
            return true;
        }
        !self.code_changes.is_empty() && self.code_changes.iter().all(CodeChange::is_insertion)
    }

    /// Every file this fix touches, in first-seen order.
    pub fn touched_files(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        for path in self
            .target_files
            .iter()
            .chain(self.code_changes.iter().map(|c| &c.file))
        {
            if !out.contains(path) {
                out.push(path.clone());
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecommendation {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub rationale: String,
    /// Concrete edit, when the validator could express one.
    #[serde(default)]
    pub change: Option<CodeChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

/// One validator's opinion on a `DiagnosedIssue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub provider: Provider,
    pub root_cause: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub proposed_fix: ProposedFix,
    #[serde(default)]
    pub system_scan_recommendations: Vec<ScanRecommendation>,
    /// Confidence in `[0, 100]`.
    pub confidence: f64,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub reasoning_chain: Vec<String>,
}

/// Static material gathered for root-cause analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DiagnosisContext {
    pub excerpts: Vec<ContextExcerpt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextExcerpt {
    pub path: PathBuf,
    pub excerpt: String,
}

/// One validator's cross-review of the other's diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisReview {
    pub reviewer: Provider,
    pub agrees: bool,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedFix {
    pub primary: ProposedFix,
    #[serde(default)]
    pub system_wide: Vec<CodeChange>,
}

impl SelectedFix {
    pub fn touched_files(&self) -> Vec<PathBuf> {
        let mut out = self.primary.touched_files();
        for change in &self.system_wide {
            if !out.contains(&change.file) {
                out.push(change.file.clone());
            }
        }
        out
    }
}

/// Reduction of two diagnoses and two cross-reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusFix {
    pub agreed: bool,
    pub consensus_root_cause: String,
    pub selected_fix: SelectedFix,
    pub combined_confidence: f64,
    /// Validator whose diagnosis supplied the primary fix.
    pub primary_provider: Provider,
    /// Scan recommendations that could not be turned into a concrete edit.
    #[serde(default)]
    pub advisories: Vec<String>,
}

/// Fixed checklist each validator answers when reviewing a before/after diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReviewChecklist {
    #[serde(default)]
    pub missing_fields_populated: bool,
    #[serde(default)]
    pub values_accurate: bool,
    #[serde(default)]
    pub no_new_errors: bool,
    #[serde(default)]
    pub net_improvement: bool,
}

impl ReviewChecklist {
    pub fn passes(&self) -> bool {
        self.missing_fields_populated
            && self.values_accurate
            && self.no_new_errors
            && self.net_improvement
    }

    pub fn failed_items(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !self.missing_fields_populated {
            out.push("missing fields populated");
        }
        if !self.values_accurate {
            out.push("values accurate");
        }
        if !self.no_new_errors {
            out.push("no new errors");
        }
        if !self.net_improvement {
            out.push("net quality improvement");
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixReview {
    pub reviewer: Provider,
    pub approved: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub checklist: ReviewChecklist,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

impl FixReview {
    pub fn rejected(reviewer: Provider, concern: impl Into<String>) -> Self {
        Self {
            reviewer,
            approved: false,
            confidence: 0.0,
            checklist: ReviewChecklist::default(),
            concerns: vec![concern.into()],
            improvements: Vec::new(),
        }
    }

    /// Approval requires the reviewer's verdict and a fully passing checklist.
    pub fn is_approval(&self) -> bool {
        self.approved && self.checklist.passes()
    }
}

/// What the next attempt learns from a failed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AttemptFeedback {
    pub attempt_number: u32,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub still_missing: Vec<String>,
}

/// A file snapshot taken before the first mutation within one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ApplyOutcome {
    pub success: bool,
    pub modified_files: Vec<PathBuf>,
    pub backup_paths: Vec<PathBuf>,
    #[serde(default)]
    pub skipped_changes: Vec<String>,
    #[serde(default)]
    pub rolled_back: Vec<PathBuf>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Files that could not be restored after a failed apply.
    #[serde(default)]
    pub rollback_errors: Vec<String>,
}

/// One iteration of apply, reprocess and dual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub attempt_number: u32,
    pub fix_applied: bool,
    pub reprocessed: bool,
    #[serde(default)]
    pub review_a: Option<FixReview>,
    #[serde(default)]
    pub review_b: Option<FixReview>,
    pub both_approved: bool,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub modified_files: Vec<PathBuf>,
    #[serde(default)]
    pub still_missing: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiAttemptResult {
    pub success: bool,
    pub total_attempts: u32,
    pub attempts: Vec<FixAttempt>,
    /// The fix that was approved, or the last one tried.
    #[serde(default)]
    pub final_fix: Option<ConsensusFix>,
    #[serde(default)]
    pub final_response: Option<Value>,
    pub escalate_to_human: bool,
    /// Set when a rejected attempt could not be undone; no later attempt runs.
    #[serde(default)]
    pub rollback_errors: Vec<String>,
}

impl MultiAttemptResult {
    pub fn approved_attempt(&self) -> Option<&FixAttempt> {
        self.attempts.iter().find(|a| a.both_approved)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
    pub confidence: f64,
    pub verified_by: Vec<Provider>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub provider: Provider,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixProvenance {
    pub fix_type: FixType,
    pub root_cause: String,
    pub files: Vec<PathBuf>,
    pub approvals: Vec<Approval>,
    pub attempt_number: u32,
}

/// Payload forwarded to the downstream sink after an approved fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionPayload {
    pub job_id: String,
    pub changes: BTreeMap<String, FieldChange>,
    pub provenance: FixProvenance,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReceipt {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl SinkReceipt {
    pub fn delivered() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}
