//! Apply, reprocess and dual review, repeated up to the attempt budget.

use super::response_field;
use crate::apply::{BackupSet, FixApplier};
use chrono::Utc;
use concord_core::{
    value_is_present, AttemptFeedback, ConsensusFix, DiagnosedIssue, FixAttempt, FixReview,
    FixReviewRequest, JobRecord, MultiAttemptResult, Provider, Reprocessor, SelectedFix, Validator,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct MultiAttemptVerifier {
    validator_a: Arc<dyn Validator>,
    validator_b: Arc<dyn Validator>,
    applier: FixApplier,
    reprocessor: Arc<dyn Reprocessor>,
}

/// What one attempt left behind besides its record.
struct AttemptRun {
    attempt: FixAttempt,
    response: Option<Value>,
    feedback: AttemptFeedback,
    /// Restores that failed; the sources no longer match the pre-attempt state.
    rollback_errors: Vec<String>,
}

impl MultiAttemptVerifier {
    pub fn new(
        validator_a: Arc<dyn Validator>,
        validator_b: Arc<dyn Validator>,
        applier: FixApplier,
        reprocessor: Arc<dyn Reprocessor>,
    ) -> Self {
        Self {
            validator_a,
            validator_b,
            applier,
            reprocessor,
        }
    }

    pub fn applier(&self) -> &FixApplier {
        &self.applier
    }

    fn validator(&self, provider: Provider) -> &Arc<dyn Validator> {
        match provider {
            Provider::A => &self.validator_a,
            Provider::B => &self.validator_b,
        }
    }

    /// Stops at the first attempt both validators approve. Every rejected attempt is
    /// rolled back before the next one starts, so at most one attempt holds backups.
    pub async fn verify_with_retry(
        &self,
        fix: &ConsensusFix,
        job: &JobRecord,
        issue: &DiagnosedIssue,
    ) -> MultiAttemptResult {
        let max_attempts = self.applier.settings().max_attempts.max(1);
        let mut current = fix.clone();
        let mut attempts: Vec<FixAttempt> = Vec::new();

        for attempt_number in 1..=max_attempts {
            let run = self.run_attempt(attempt_number, &current, job, issue).await;
            if run.attempt.both_approved {
                tracing::info!(job = %job.job_id, attempt = attempt_number, "fix approved by both validators");
                attempts.push(run.attempt);
                return MultiAttemptResult {
                    success: true,
                    total_attempts: attempt_number,
                    attempts,
                    final_fix: Some(current),
                    final_response: run.response,
                    escalate_to_human: false,
                    rollback_errors: Vec::new(),
                };
            }

            if !run.rollback_errors.is_empty() {
                tracing::error!(
                    job = %job.job_id,
                    attempt = attempt_number,
                    errors = ?run.rollback_errors,
                    "rollback incomplete; no further attempts"
                );
                attempts.push(run.attempt);
                return MultiAttemptResult {
                    success: false,
                    total_attempts: attempt_number,
                    attempts,
                    final_fix: Some(current),
                    final_response: None,
                    escalate_to_human: true,
                    rollback_errors: run.rollback_errors,
                };
            }

            tracing::info!(
                job = %job.job_id,
                attempt = attempt_number,
                reason = run.attempt.failure_reason.as_deref().unwrap_or_default(),
                "attempt rejected"
            );
            attempts.push(run.attempt);
            if attempt_number == max_attempts {
                break;
            }

            match self.refine(&current, &run.feedback).await {
                Ok(next) => current = next,
                Err(reason) => {
                    tracing::warn!(job = %job.job_id, %reason, "fix refinement failed; stopping early");
                    if let Some(last) = attempts.last_mut() {
                        last.failure_reason = Some(match last.failure_reason.take() {
                            Some(prior) => format!("{}; {}", prior, reason),
                            None => reason,
                        });
                    }
                    break;
                }
            }
        }

        MultiAttemptResult {
            success: false,
            total_attempts: attempts.len() as u32,
            attempts,
            final_fix: Some(current),
            final_response: None,
            escalate_to_human: true,
            rollback_errors: Vec::new(),
        }
    }

    async fn run_attempt(
        &self,
        attempt_number: u32,
        fix: &ConsensusFix,
        job: &JobRecord,
        issue: &DiagnosedIssue,
    ) -> AttemptRun {
        let mut attempt = FixAttempt {
            attempt_number,
            fix_applied: false,
            reprocessed: false,
            review_a: None,
            review_b: None,
            both_approved: false,
            failure_reason: None,
            modified_files: Vec::new(),
            still_missing: Vec::new(),
            timestamp: Utc::now(),
        };

        let (outcome, backups) = self.applier.apply_comprehensive_fix(&fix.selected_fix).await;
        if !outcome.success {
            let mut reason = format!("fix could not be applied: {}", outcome.errors.join("; "));
            if !outcome.rollback_errors.is_empty() {
                reason = with_rollback_errors(reason, &outcome.rollback_errors);
            }
            return AttemptRun {
                feedback: AttemptFeedback {
                    attempt_number,
                    failure_reason: Some(reason.clone()),
                    concerns: outcome.errors,
                    ..AttemptFeedback::default()
                },
                attempt: FixAttempt {
                    failure_reason: Some(reason),
                    ..attempt
                },
                response: None,
                rollback_errors: outcome.rollback_errors,
            };
        }
        attempt.fix_applied = true;
        attempt.modified_files = outcome.modified_files;

        let settings = self.applier.settings();
        let response = match reprocess(self.reprocessor.as_ref(), job, settings.reprocess_timeout())
            .await
        {
            Ok(response) => response,
            Err(reason) => {
                let rollback_errors = self.restore(&backups);
                let reason = with_rollback_errors(reason, &rollback_errors);
                attempt.failure_reason = Some(reason.clone());
                return AttemptRun {
                    feedback: AttemptFeedback {
                        attempt_number,
                        failure_reason: Some(reason),
                        ..AttemptFeedback::default()
                    },
                    attempt,
                    response: None,
                    rollback_errors,
                };
            }
        };
        attempt.reprocessed = true;
        attempt.still_missing = still_missing(&issue.missing_fields, &response);

        let request = FixReviewRequest {
            job_id: job.job_id.clone(),
            root_cause: fix.consensus_root_cause.clone(),
            missing_fields: issue.missing_fields.clone(),
            before: job.current_response.clone(),
            after: response.clone(),
            fix: fix.selected_fix.clone(),
        };
        let timeout = settings.review_timeout();
        let (review_a, review_b) = futures::join!(
            review_with(self.validator_a.as_ref(), Provider::A, &request, timeout),
            review_with(self.validator_b.as_ref(), Provider::B, &request, timeout),
        );

        attempt.both_approved = review_a.is_approval()
            && review_b.is_approval()
            && attempt.still_missing.is_empty();
        let feedback = feedback_from(attempt_number, &review_a, &review_b, &attempt.still_missing);
        let mut rollback_errors = Vec::new();
        if !attempt.both_approved {
            rollback_errors = self.restore(&backups);
            attempt.failure_reason = feedback
                .failure_reason
                .clone()
                .map(|reason| with_rollback_errors(reason, &rollback_errors));
        }
        attempt.review_a = Some(review_a);
        attempt.review_b = Some(review_b);

        AttemptRun {
            attempt,
            response: Some(response),
            feedback,
            rollback_errors,
        }
    }

    /// Undo an attempt; returns the restores that failed.
    fn restore(&self, backups: &BackupSet) -> Vec<String> {
        self.applier.rollback(backups).errors
    }

    /// Ask the validator behind the primary fix for an improved one.
    async fn refine(
        &self,
        current: &ConsensusFix,
        feedback: &AttemptFeedback,
    ) -> Result<ConsensusFix, String> {
        let provider = current.primary_provider;
        let timeout = self.applier.settings().review_timeout();
        let proposed = match tokio::time::timeout(
            timeout,
            self.validator(provider).refine_fix(current, feedback),
        )
        .await
        {
            Ok(Ok(proposed)) => proposed,
            Ok(Err(err)) => return Err(format!("validator {} could not refine the fix: {:#}", provider, err)),
            Err(_) => {
                return Err(format!(
                    "validator {} timed out refining the fix after {}ms",
                    provider,
                    timeout.as_millis()
                ))
            }
        };
        if proposed.is_data_only() {
            return Err(format!(
                "validator {} refined the fix into a data-only change",
                provider
            ));
        }
        Ok(ConsensusFix {
            selected_fix: SelectedFix {
                primary: proposed,
                system_wide: current.selected_fix.system_wide.clone(),
            },
            ..current.clone()
        })
    }
}

async fn reprocess(
    reprocessor: &dyn Reprocessor,
    job: &JobRecord,
    timeout: Duration,
) -> Result<Value, String> {
    match tokio::time::timeout(timeout, reprocessor.reprocess(job)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(err)) => Err(format!("reprocessing failed: {:#}", err)),
        Err(_) => Err(format!("reprocessing timed out after {}ms", timeout.as_millis())),
    }
}

async fn review_with(
    validator: &dyn Validator,
    provider: Provider,
    request: &FixReviewRequest,
    timeout: Duration,
) -> FixReview {
    match tokio::time::timeout(timeout, validator.review_fix(request)).await {
        Ok(Ok(mut review)) => {
            review.reviewer = provider;
            review.confidence = review.confidence.clamp(0.0, 1.0);
            review
        }
        Ok(Err(err)) => FixReview::rejected(provider, format!("review failed: {:#}", err)),
        Err(_) => FixReview::rejected(
            provider,
            format!("review timed out after {}ms", timeout.as_millis()),
        ),
    }
}

fn with_rollback_errors(reason: String, errors: &[String]) -> String {
    if errors.is_empty() {
        reason
    } else {
        format!("{}; rollback failed: {}", reason, errors.join("; "))
    }
}

/// Fields from `wanted` that `response` still lacks.
pub fn still_missing(wanted: &[String], response: &Value) -> Vec<String> {
    wanted
        .iter()
        .filter(|field| !response_field(response, field).is_some_and(value_is_present))
        .cloned()
        .collect()
}

fn feedback_from(
    attempt_number: u32,
    review_a: &FixReview,
    review_b: &FixReview,
    still_missing: &[String],
) -> AttemptFeedback {
    let mut feedback = AttemptFeedback {
        attempt_number,
        still_missing: still_missing.to_vec(),
        ..AttemptFeedback::default()
    };
    let mut reasons = Vec::new();
    for review in [review_a, review_b] {
        if !review.is_approval() {
            let mut why = review.concerns.clone();
            why.extend(
                review
                    .checklist
                    .failed_items()
                    .into_iter()
                    .map(|item| format!("checklist failed: {}", item)),
            );
            reasons.push(format!(
                "validator {} rejected the fix ({})",
                review.reviewer,
                if why.is_empty() {
                    "no reason given".to_string()
                } else {
                    why.join("; ")
                }
            ));
        }
        for concern in &review.concerns {
            if !feedback.concerns.contains(concern) {
                feedback.concerns.push(concern.clone());
            }
        }
        for suggestion in &review.improvements {
            if !feedback.suggestions.contains(suggestion) {
                feedback.suggestions.push(suggestion.clone());
            }
        }
    }
    if !still_missing.is_empty() {
        reasons.push(format!("still missing: {}", still_missing.join(", ")));
    }
    if !reasons.is_empty() {
        feedback.failure_reason = Some(reasons.join("; "));
    }
    feedback
}
