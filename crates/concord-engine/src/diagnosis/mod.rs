//! Dual diagnosis: two independent root-cause analyses, two cross-reviews, one gate.

mod context;
mod similarity;

pub use context::gather_context;
pub use similarity::root_cause_similarity;

use concord_core::settings::DiagnosisSettings;
use concord_core::{
    CodeChange, ConcordError, ConsensusFix, DiagnosedIssue, Diagnosis, DiagnosisContext,
    DiagnosisReview, Provider, SelectedFix, SourceAccessor, Validator,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const DATA_ONLY_CONCERN: &str =
    "fix only adds data (aliases or schema entries) instead of correcting the logic that dropped the field";

/// Everything the diagnosis stage produced, gated or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisReport {
    pub context_files: Vec<std::path::PathBuf>,
    pub diagnosis_a: Option<Diagnosis>,
    pub diagnosis_b: Option<Diagnosis>,
    /// B's review of A's diagnosis.
    pub review_of_a: Option<DiagnosisReview>,
    /// A's review of B's diagnosis.
    pub review_of_b: Option<DiagnosisReview>,
    pub similarity: Option<f64>,
    pub gate_failures: Vec<String>,
    pub fix: Option<ConsensusFix>,
}

impl DiagnosisReport {
    fn empty(context: &DiagnosisContext) -> Self {
        Self {
            context_files: context.excerpts.iter().map(|e| e.path.clone()).collect(),
            diagnosis_a: None,
            diagnosis_b: None,
            review_of_a: None,
            review_of_b: None,
            similarity: None,
            gate_failures: Vec::new(),
            fix: None,
        }
    }

    /// Gate failure summary as a typed error, when the gate did not pass.
    pub fn gate_error(&self) -> Option<ConcordError> {
        if self.fix.is_some() {
            return None;
        }
        Some(ConcordError::ConsensusGate {
            stage: "diagnosis".to_string(),
            reason: self.gate_failures.join("; "),
        })
    }
}

pub struct DualDiagnosisEngine {
    validator_a: Arc<dyn Validator>,
    validator_b: Arc<dyn Validator>,
    source: Arc<dyn SourceAccessor>,
    settings: DiagnosisSettings,
}

impl DualDiagnosisEngine {
    pub fn new(
        validator_a: Arc<dyn Validator>,
        validator_b: Arc<dyn Validator>,
        source: Arc<dyn SourceAccessor>,
        settings: DiagnosisSettings,
    ) -> Self {
        Self {
            validator_a,
            validator_b,
            source,
            settings,
        }
    }

    pub fn validator(&self, provider: Provider) -> &Arc<dyn Validator> {
        match provider {
            Provider::A => &self.validator_a,
            Provider::B => &self.validator_b,
        }
    }

    pub async fn diagnose(&self, issue: &DiagnosedIssue) -> DiagnosisReport {
        let context = gather_context(self.source.as_ref(), &self.settings, issue);
        let mut report = DiagnosisReport::empty(&context);
        let timeout = self.settings.diagnosis_timeout();

        let (diag_a, diag_b) = futures::join!(
            diagnose_with(self.validator_a.as_ref(), Provider::A, issue, &context, timeout),
            diagnose_with(self.validator_b.as_ref(), Provider::B, issue, &context, timeout),
        );
        let (diag_a, diag_b) = match (diag_a, diag_b) {
            (Ok(a), Ok(b)) => (a, b),
            (a, b) => {
                for err in [a.as_ref().err(), b.as_ref().err()].into_iter().flatten() {
                    report.gate_failures.push(err.to_string());
                }
                report.diagnosis_a = a.ok();
                report.diagnosis_b = b.ok();
                tracing::warn!(job = %issue.job_id, "diagnosis incomplete; skipping cross-review");
                return report;
            }
        };

        // A reviews B's diagnosis and B reviews A's, concurrently.
        let (review_of_b, review_of_a) = futures::join!(
            review_with(self.validator_a.as_ref(), Provider::A, &diag_b, issue, &context, timeout),
            review_with(self.validator_b.as_ref(), Provider::B, &diag_a, issue, &context, timeout),
        );
        let review_of_a = penalize_data_only(review_of_a, &diag_a);
        let review_of_b = penalize_data_only(review_of_b, &diag_b);

        let similarity = root_cause_similarity(&diag_a.root_cause, &diag_b.root_cause);
        report.similarity = Some(similarity);
        report.gate_failures = gate_failures(
            &self.settings,
            &diag_a,
            &diag_b,
            &review_of_a,
            &review_of_b,
            similarity,
        );
        if report.gate_failures.is_empty() {
            report.fix = Some(build_consensus_fix(&diag_a, &diag_b));
        }

        tracing::info!(
            job = %issue.job_id,
            confidence_a = diag_a.confidence,
            confidence_b = diag_b.confidence,
            similarity,
            agreed = report.fix.is_some(),
            "dual diagnosis finished"
        );

        report.diagnosis_a = Some(diag_a);
        report.diagnosis_b = Some(diag_b);
        report.review_of_a = Some(review_of_a);
        report.review_of_b = Some(review_of_b);
        report
    }
}

async fn diagnose_with(
    validator: &dyn Validator,
    provider: Provider,
    issue: &DiagnosedIssue,
    context: &DiagnosisContext,
    timeout: Duration,
) -> Result<Diagnosis, ConcordError> {
    match tokio::time::timeout(timeout, validator.diagnose(issue, context)).await {
        Ok(Ok(mut diagnosis)) => {
            diagnosis.provider = provider;
            diagnosis.confidence = diagnosis.confidence.clamp(0.0, 100.0);
            Ok(diagnosis)
        }
        Ok(Err(err)) => Err(ConcordError::Oracle {
            provider,
            message: format!("diagnosis failed: {:#}", err),
        }),
        Err(_) => Err(ConcordError::Oracle {
            provider,
            message: format!("diagnosis timed out after {}ms", timeout.as_millis()),
        }),
    }
}

async fn review_with(
    reviewer: &dyn Validator,
    provider: Provider,
    other: &Diagnosis,
    issue: &DiagnosedIssue,
    context: &DiagnosisContext,
    timeout: Duration,
) -> DiagnosisReview {
    let failed = |concern: String| DiagnosisReview {
        reviewer: provider,
        agrees: false,
        concerns: vec![concern],
        suggestions: Vec::new(),
        confidence: 0.0,
    };
    match tokio::time::timeout(timeout, reviewer.review_diagnosis(other, issue, context)).await {
        Ok(Ok(mut review)) => {
            review.reviewer = provider;
            review
        }
        Ok(Err(err)) => failed(format!("cross-review failed: {:#}", err)),
        Err(_) => failed(format!("cross-review timed out after {}ms", timeout.as_millis())),
    }
}

/// A diagnosis whose fix only patches data is rejected whatever the reviewer said.
fn penalize_data_only(mut review: DiagnosisReview, reviewed: &Diagnosis) -> DiagnosisReview {
    if reviewed.proposed_fix.is_data_only() {
        review.agrees = false;
        if !review.concerns.iter().any(|c| c == DATA_ONLY_CONCERN) {
            review.concerns.push(DATA_ONLY_CONCERN.to_string());
        }
    }
    review
}

fn gate_failures(
    settings: &DiagnosisSettings,
    a: &Diagnosis,
    b: &Diagnosis,
    review_of_a: &DiagnosisReview,
    review_of_b: &DiagnosisReview,
    similarity: f64,
) -> Vec<String> {
    let mut failures = Vec::new();
    for diagnosis in [a, b] {
        if diagnosis.confidence < settings.min_confidence {
            failures.push(format!(
                "validator {} confidence {:.0} is below {:.0}",
                diagnosis.provider, diagnosis.confidence, settings.min_confidence
            ));
        }
    }
    for (review, reviewed) in [(review_of_a, Provider::A), (review_of_b, Provider::B)] {
        if !review.agrees {
            failures.push(format!(
                "validator {} rejected {}'s diagnosis: {}",
                review.reviewer,
                reviewed,
                review.concerns.join("; ")
            ));
        }
    }
    if similarity <= settings.root_cause_similarity {
        failures.push(format!(
            "root causes differ (similarity {:.2} <= {:.2})",
            similarity, settings.root_cause_similarity
        ));
    }
    failures
}

/// Primary fix from the more confident diagnosis (A on a tie); the union of both
/// sides' scan recommendations becomes the system-wide edit list.
pub fn build_consensus_fix(a: &Diagnosis, b: &Diagnosis) -> ConsensusFix {
    let primary = if b.confidence > a.confidence { b } else { a };

    let mut seen: HashSet<String> = primary
        .proposed_fix
        .code_changes
        .iter()
        .map(CodeChange::dedup_key)
        .collect();
    let mut system_wide = Vec::new();
    let mut advisories = Vec::new();
    for rec in a
        .system_scan_recommendations
        .iter()
        .chain(&b.system_scan_recommendations)
    {
        match &rec.change {
            Some(change) => {
                if seen.insert(change.dedup_key()) {
                    system_wide.push(change.clone());
                }
            }
            None => {
                let location = rec
                    .file
                    .as_ref()
                    .map(|f| f.display().to_string())
                    .unwrap_or_else(|| "codebase".to_string());
                let advisory = format!("{}: {} ({})", location, rec.pattern, rec.rationale);
                if !advisories.contains(&advisory) {
                    advisories.push(advisory);
                }
            }
        }
    }

    ConsensusFix {
        agreed: true,
        consensus_root_cause: primary.root_cause.clone(),
        selected_fix: SelectedFix {
            primary: primary.proposed_fix.clone(),
            system_wide,
        },
        combined_confidence: (a.confidence + b.confidence) / 2.0,
        primary_provider: primary.provider,
        advisories,
    }
}
