//! Top-level remediation state machine for one job at a time.

use super::response_field;
use super::verifier::MultiAttemptVerifier;
use crate::diagnosis::{DiagnosisReport, DualDiagnosisEngine};
use crate::matcher::matches;
use chrono::{DateTime, Utc};
use concord_core::{
    value_is_present, Approval, AuditEvent, AuditSink, AuditStream, CorrectionPayload, DiagnosedIssue,
    DownstreamSink, FieldChange, FixProvenance, IssueType, JobRecord, MultiAttemptResult,
    Provider, Severity, SinkReceipt, MISSING_REQUIRED_FIELD,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationState {
    Idle,
    DetectIssue,
    DualDiagnosis,
    MultiAttemptVerify,
    SendCorrection,
    Done,
    Escalate,
}

/// Enough context to reconstruct each decision afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RemediationState,
    pub to: RemediationState,
    pub detail: String,
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub attempt_count: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationOutcome {
    NoIssue,
    Corrected,
    Escalated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationReport {
    pub job_id: String,
    pub outcome: RemediationOutcome,
    pub final_state: RemediationState,
    #[serde(default)]
    pub issue: Option<DiagnosedIssue>,
    #[serde(default)]
    pub diagnosis: Option<DiagnosisReport>,
    #[serde(default)]
    pub verification: Option<MultiAttemptResult>,
    #[serde(default)]
    pub correction: Option<CorrectionPayload>,
    #[serde(default)]
    pub receipt: Option<SinkReceipt>,
    #[serde(default)]
    pub escalation_reason: Option<String>,
    pub transitions: Vec<TransitionRecord>,
}

impl RemediationReport {
    fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            outcome: RemediationOutcome::NoIssue,
            final_state: RemediationState::Idle,
            issue: None,
            diagnosis: None,
            verification: None,
            correction: None,
            receipt: None,
            escalation_reason: None,
            transitions: Vec::new(),
        }
    }

    pub fn escalated(&self) -> bool {
        self.outcome == RemediationOutcome::Escalated
    }
}

/// Context carried into each transition record.
#[derive(Default)]
struct Evidence {
    root_cause: Option<String>,
    confidence: Option<f64>,
    attempt_count: u32,
}

pub struct RemediationOrchestrator {
    diagnosis: DualDiagnosisEngine,
    verifier: MultiAttemptVerifier,
    sink: Arc<dyn DownstreamSink>,
    audit: Arc<dyn AuditSink>,
}

impl RemediationOrchestrator {
    pub fn new(
        diagnosis: DualDiagnosisEngine,
        verifier: MultiAttemptVerifier,
        sink: Arc<dyn DownstreamSink>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            diagnosis,
            verifier,
            sink,
            audit,
        }
    }

    pub fn verifier(&self) -> &MultiAttemptVerifier {
        &self.verifier
    }

    /// Drive one job to `Done` or `Escalate`.
    pub async fn remediate(&self, job: &JobRecord) -> RemediationReport {
        let mut report = RemediationReport::new(&job.job_id);
        let mut evidence = Evidence::default();

        self.transition(
            &mut report,
            RemediationState::DetectIssue,
            "checking issue tracker",
            &evidence,
        );
        let Some(issue) = detect_issue(job) else {
            self.transition(
                &mut report,
                RemediationState::Done,
                "no missing_required_field issues",
                &evidence,
            );
            return report;
        };

        if issue.missing_fields.is_empty() {
            report.issue = Some(issue);
            return self.escalate(
                report,
                "malformed issue: missing_required_field entries name no field".to_string(),
                &evidence,
            );
        }

        self.transition(
            &mut report,
            RemediationState::DualDiagnosis,
            &format!(
                "{} missing field(s): {} (severity {:?})",
                issue.missing_fields.len(),
                issue.missing_fields.join(", "),
                issue.severity
            ),
            &evidence,
        );
        report.issue = Some(issue.clone());

        let diagnosis = self.diagnosis.diagnose(&issue).await;
        let fix = diagnosis.fix.clone();
        report.diagnosis = Some(diagnosis);
        let Some(fix) = fix else {
            let reason = report
                .diagnosis
                .as_ref()
                .and_then(|d| d.gate_error())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "diagnosis produced no fix".to_string());
            return self.escalate(report, reason, &evidence);
        };
        evidence.root_cause = Some(fix.consensus_root_cause.clone());
        evidence.confidence = Some(fix.combined_confidence);

        self.transition(
            &mut report,
            RemediationState::MultiAttemptVerify,
            &format!(
                "diagnoses agree; primary fix from validator {} touching {} file(s)",
                fix.primary_provider,
                fix.selected_fix.touched_files().len()
            ),
            &evidence,
        );
        let verification = self.verifier.verify_with_retry(&fix, job, &issue).await;
        evidence.attempt_count = verification.total_attempts;
        let correction = build_correction(job, &issue, &verification);
        report.verification = Some(verification);

        let verified = report
            .verification
            .as_ref()
            .is_some_and(|v| v.success);
        let rollback_errors = report
            .verification
            .as_ref()
            .map(|v| v.rollback_errors.clone())
            .unwrap_or_default();
        if !rollback_errors.is_empty() {
            let reason = format!(
                "rollback left sources modified: {}",
                rollback_errors.join("; ")
            );
            return self.escalate(report, reason, &evidence);
        }
        if !verified {
            let reason = report
                .verification
                .as_ref()
                .and_then(|v| v.attempts.last())
                .and_then(|a| a.failure_reason.clone())
                .map(|r| format!("no attempt was approved by both validators: {}", r))
                .unwrap_or_else(|| "no attempt was approved by both validators".to_string());
            return self.escalate(report, reason, &evidence);
        }
        let Some(correction) = correction else {
            return self.escalate(
                report,
                "approved fix changed no field values".to_string(),
                &evidence,
            );
        };

        self.transition(
            &mut report,
            RemediationState::SendCorrection,
            &format!(
                "{} field change(s) approved",
                correction.changes.len()
            ),
            &evidence,
        );
        let receipt = self.sink.send_correction(&correction).await;
        report.correction = Some(correction);
        report.receipt = Some(receipt.clone());
        if !receipt.success {
            let reason = format!(
                "downstream sink rejected the correction: {}",
                receipt.error.as_deref().unwrap_or("unknown error")
            );
            return self.escalate(report, reason, &evidence);
        }

        report.outcome = RemediationOutcome::Corrected;
        self.transition(
            &mut report,
            RemediationState::Done,
            "correction delivered",
            &evidence,
        );
        report
    }

    /// Remediate jobs one after another, fully finishing each before the next.
    pub async fn backfill(&self, jobs: &[JobRecord]) -> Vec<RemediationReport> {
        let delay = Duration::from_millis(self.verifier.applier().settings().backfill_delay_ms);
        let mut reports = Vec::with_capacity(jobs.len());
        for (idx, job) in jobs.iter().enumerate() {
            if idx > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            reports.push(self.remediate(job).await);
        }
        let corrected = reports
            .iter()
            .filter(|r| r.outcome == RemediationOutcome::Corrected)
            .count();
        let escalated = reports.iter().filter(|r| r.escalated()).count();
        tracing::info!(jobs = reports.len(), corrected, escalated, "backfill finished");
        reports
    }

    fn escalate(
        &self,
        mut report: RemediationReport,
        reason: String,
        evidence: &Evidence,
    ) -> RemediationReport {
        report.outcome = RemediationOutcome::Escalated;
        self.transition(&mut report, RemediationState::Escalate, &reason, evidence);
        report.escalation_reason = Some(reason);
        report
    }

    fn transition(
        &self,
        report: &mut RemediationReport,
        to: RemediationState,
        detail: &str,
        evidence: &Evidence,
    ) {
        let record = TransitionRecord {
            from: report.final_state,
            to,
            detail: detail.to_string(),
            root_cause: evidence.root_cause.clone(),
            confidence: evidence.confidence,
            attempt_count: evidence.attempt_count,
            timestamp: Utc::now(),
        };
        if to == RemediationState::Escalate {
            tracing::warn!(
                job = %report.job_id,
                from = ?record.from,
                to = ?record.to,
                attempts = record.attempt_count,
                root_cause = record.root_cause.as_deref().unwrap_or_default(),
                "{}",
                detail
            );
        } else {
            tracing::info!(
                job = %report.job_id,
                from = ?record.from,
                to = ?record.to,
                attempts = record.attempt_count,
                confidence = record.confidence,
                "{}",
                detail
            );
        }
        let row = AuditEvent::new(
            AuditStream::Remediation,
            report.job_id.clone(),
            "transition",
            serde_json::to_value(&record).unwrap_or_else(|_| json!({ "detail": detail })),
        );
        if let Err(err) = self.audit.record(&row) {
            tracing::warn!(job = %report.job_id, error = %err, "failed to write remediation audit row");
        }
        report.final_state = to;
        report.transitions.push(record);
    }
}

/// A job needs remediation when its tracker holds `missing_required_field` entries.
/// Entries without a field name are skipped; if none names one, `missing_fields` is empty.
pub fn detect_issue(job: &JobRecord) -> Option<DiagnosedIssue> {
    let entries: Vec<_> = job
        .issues
        .iter()
        .filter(|i| i.kind == MISSING_REQUIRED_FIELD)
        .collect();
    if entries.is_empty() {
        return None;
    }
    let mut missing_fields: Vec<String> = Vec::new();
    for entry in &entries {
        match entry.field.as_ref().filter(|f| !f.trim().is_empty()) {
            Some(field) if !missing_fields.contains(field) => missing_fields.push(field.clone()),
            Some(_) => {}
            None => tracing::warn!(
                job = %job.job_id,
                message = %entry.message,
                "missing_required_field entry names no field; skipped"
            ),
        }
    }
    Some(DiagnosedIssue {
        job_id: job.job_id.clone(),
        issue_type: IssueType::MissingRequiredField,
        severity: classify_severity(missing_fields.len(), !job.error_logs.is_empty()),
        missing_fields,
        raw_payload: job.raw_payload.clone(),
        current_response: job.current_response.clone(),
        error_logs: job.error_logs.clone(),
    })
}

/// 1 missing field is low, 2-3 medium, 4 or more high; error logs raise one level.
pub fn classify_severity(missing: usize, has_error_logs: bool) -> Severity {
    let base = match missing {
        0 | 1 => Severity::Low,
        2 | 3 => Severity::Medium,
        _ => Severity::High,
    };
    if has_error_logs {
        base.raised()
    } else {
        base
    }
}

/// Field-level diff between the job's stored response and the approved one.
pub fn build_correction(
    job: &JobRecord,
    issue: &DiagnosedIssue,
    result: &MultiAttemptResult,
) -> Option<CorrectionPayload> {
    let attempt = result.approved_attempt()?;
    let after = result.final_response.as_ref()?;
    let fix = result.final_fix.as_ref()?;

    let approvals: Vec<Approval> = [&attempt.review_a, &attempt.review_b]
        .into_iter()
        .flatten()
        .filter(|r| r.is_approval())
        .map(|r| Approval {
            provider: r.reviewer,
            confidence: r.confidence,
        })
        .collect();
    let confidence = if approvals.is_empty() {
        0.0
    } else {
        approvals.iter().map(|a| a.confidence).sum::<f64>() / approvals.len() as f64
    };
    let verified_by: Vec<Provider> = approvals.iter().map(|a| a.provider).collect();

    let mut keys: BTreeSet<String> = issue.missing_fields.iter().cloned().collect();
    for doc in [&job.current_response, after] {
        if let Some(map) = doc.as_object() {
            keys.extend(map.keys().cloned());
        }
    }
    let changes: BTreeMap<String, FieldChange> = keys
        .into_iter()
        .filter_map(|key| {
            let old = response_field(&job.current_response, &key)
                .cloned()
                .unwrap_or(Value::Null);
            let new = response_field(after, &key).cloned().unwrap_or(Value::Null);
            if matches(&old, &new) || (!value_is_present(&old) && !value_is_present(&new)) {
                return None;
            }
            Some((
                key,
                FieldChange {
                    old,
                    new,
                    confidence,
                    verified_by: verified_by.clone(),
                },
            ))
        })
        .collect();
    if changes.is_empty() {
        return None;
    }

    Some(CorrectionPayload {
        job_id: job.job_id.clone(),
        changes,
        provenance: FixProvenance {
            fix_type: fix.selected_fix.primary.fix_type,
            root_cause: fix.consensus_root_cause.clone(),
            files: attempt.modified_files.clone(),
            approvals,
            attempt_number: attempt.attempt_number,
        },
        generated_at: Utc::now(),
    })
}
