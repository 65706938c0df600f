//! Collaborator contracts consumed by the engine.
//!
//! The validators, the source repository, the downstream sink, the product pipeline
//! and the audit trail are all capabilities with swappable implementations.

use crate::model::{ProductRecord, Provider, RetryContext, ValidationResult};
use crate::remediation::{
    AttemptFeedback, ConsensusFix, CorrectionPayload, DiagnosedIssue, Diagnosis,
    DiagnosisContext, DiagnosisReview, FixReview, JobRecord, ProposedFix, SelectedFix,
    SinkReceipt,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Everything a validator sees when judging an applied fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixReviewRequest {
    pub job_id: String,
    pub root_cause: String,
    pub missing_fields: Vec<String>,
    pub before: Value,
    pub after: Value,
    pub fix: SelectedFix,
}

/// One independently callable AI oracle.
///
/// Implementations must not share state with the other validator; the engine relies
/// on that independence for every agreement decision it makes.
#[async_trait]
pub trait Validator: Send + Sync {
    fn provider(&self) -> Provider;

    async fn validate(
        &self,
        record: &ProductRecord,
        target_fields: &[String],
        retry: Option<&RetryContext>,
    ) -> Result<ValidationResult>;

    async fn review_fix(&self, request: &FixReviewRequest) -> Result<FixReview>;

    async fn diagnose(
        &self,
        issue: &DiagnosedIssue,
        context: &DiagnosisContext,
    ) -> Result<Diagnosis>;

    async fn review_diagnosis(
        &self,
        other: &Diagnosis,
        issue: &DiagnosedIssue,
        context: &DiagnosisContext,
    ) -> Result<DiagnosisReview>;

    /// Produce an improved fix after a rejected attempt.
    async fn refine_fix(&self, fix: &ConsensusFix, feedback: &AttemptFeedback)
        -> Result<ProposedFix>;
}

/// File primitives used exclusively by fix application and backup.
pub trait SourceAccessor: Send + Sync {
    fn read_file(&self, path: &Path) -> Result<String>;
    fn write_file(&self, path: &Path, content: &str) -> Result<()>;
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_writable(&self, path: &Path) -> bool;
    /// Files directly inside `dir`; an absent directory yields an empty list.
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;
    fn remove_file(&self, path: &Path) -> Result<()>;
}

/// Receives approved corrections (for example a CRM webhook).
#[async_trait]
pub trait DownstreamSink: Send + Sync {
    /// Delivery failures are reported in the receipt, never retried here.
    async fn send_correction(&self, payload: &CorrectionPayload) -> SinkReceipt;
}

/// Re-runs a job's original input through a freshly instantiated product pipeline.
#[async_trait]
pub trait Reprocessor: Send + Sync {
    async fn reprocess(&self, job: &JobRecord) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStream {
    Consensus,
    Remediation,
}

/// One durable audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(default = "audit_schema_version_default")]
    pub schema_version: u32,
    pub timestamp: DateTime<Utc>,
    pub stream: AuditStream,
    /// Product id or job id.
    pub subject: String,
    pub event: String,
    #[serde(default)]
    pub detail: Value,
}

fn audit_schema_version_default() -> u32 {
    1
}

impl AuditEvent {
    pub fn new(
        stream: AuditStream,
        subject: impl Into<String>,
        event: impl Into<String>,
        detail: Value,
    ) -> Self {
        Self {
            schema_version: audit_schema_version_default(),
            timestamp: Utc::now(),
            stream,
            subject: subject.into(),
            event: event.into(),
            detail,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Discards every audit row.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudit;

impl AuditSink for NullAudit {
    fn record(&self, _event: &AuditEvent) -> Result<()> {
        Ok(())
    }
}
