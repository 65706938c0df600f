//! Deterministic validator double.
//!
//! Replies are queued per operation. The last queued reply is sticky, so a validator
//! scripted with one answer keeps giving it across retry rounds. Every request is
//! recorded so tests can check what each side was shown.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use concord_core::{
    AttemptFeedback, ConsensusFix, DiagnosedIssue, Diagnosis, DiagnosisContext, DiagnosisReview,
    FixReview, FixReviewRequest, ProductRecord, ProposedFix, Provider, RetryContext,
    ValidationResult, Validator,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

/// One scripted answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step<T> {
    Reply(T),
    Fail(String),
    /// Never answers; the caller's timeout has to fire.
    Hang,
}

/// What a scripted validator was asked.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedRequest {
    Validate {
        product_id: String,
        target_fields: Vec<String>,
        retry: Option<RetryContext>,
    },
    ReviewFix(FixReviewRequest),
    Diagnose {
        job_id: String,
        context_files: usize,
    },
    ReviewDiagnosis {
        of: Provider,
    },
    RefineFix {
        feedback: AttemptFeedback,
    },
}

/// Serialized form of one validator's script, as used by `concord --replay`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorScript {
    #[serde(default)]
    pub validate: Vec<Step<ValidationResult>>,
    #[serde(default)]
    pub review_fix: Vec<Step<FixReview>>,
    #[serde(default)]
    pub diagnose: Vec<Step<Diagnosis>>,
    #[serde(default)]
    pub review_diagnosis: Vec<Step<DiagnosisReview>>,
    #[serde(default)]
    pub refine_fix: Vec<Step<ProposedFix>>,
}

/// A replay file holding both validators' scripts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub a: ValidatorScript,
    #[serde(default)]
    pub b: ValidatorScript,
}

impl ReplayScript {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay script {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Replay script {} is malformed", path.display()))
    }

    pub fn into_validators(self) -> (ScriptedValidator, ScriptedValidator) {
        (
            ScriptedValidator::from_script(Provider::A, self.a),
            ScriptedValidator::from_script(Provider::B, self.b),
        )
    }
}

struct Queue<T>(Mutex<VecDeque<Step<T>>>);

impl<T: Clone + Send> Queue<T> {
    fn new(steps: Vec<Step<T>>) -> Self {
        Self(Mutex::new(steps.into()))
    }

    fn push(&self, step: Step<T>) {
        if let Ok(mut q) = self.0.lock() {
            q.push_back(step);
        }
    }

    fn next(&self) -> Option<Step<T>> {
        let mut q = self.0.lock().ok()?;
        if q.len() > 1 {
            q.pop_front()
        } else {
            q.front().cloned()
        }
    }
}

pub struct ScriptedValidator {
    provider: Provider,
    validate: Queue<ValidationResult>,
    review_fix: Queue<FixReview>,
    diagnose: Queue<Diagnosis>,
    review_diagnosis: Queue<DiagnosisReview>,
    refine_fix: Queue<ProposedFix>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedValidator {
    pub fn new(provider: Provider) -> Self {
        Self::from_script(provider, ValidatorScript::default())
    }

    pub fn from_script(provider: Provider, script: ValidatorScript) -> Self {
        Self {
            provider,
            validate: Queue::new(script.validate),
            review_fix: Queue::new(script.review_fix),
            diagnose: Queue::new(script.diagnose),
            review_diagnosis: Queue::new(script.review_diagnosis),
            refine_fix: Queue::new(script.refine_fix),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn on_validate(self, step: Step<ValidationResult>) -> Self {
        self.validate.push(step);
        self
    }

    pub fn on_review_fix(self, step: Step<FixReview>) -> Self {
        self.review_fix.push(step);
        self
    }

    pub fn on_diagnose(self, step: Step<Diagnosis>) -> Self {
        self.diagnose.push(step);
        self
    }

    pub fn on_review_diagnosis(self, step: Step<DiagnosisReview>) -> Self {
        self.review_diagnosis.push(step);
        self
    }

    pub fn on_refine_fix(self, step: Step<ProposedFix>) -> Self {
        self.refine_fix.push(step);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Retry contexts seen by `validate`, one entry per round.
    pub fn validate_contexts(&self) -> Vec<Option<RetryContext>> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                RecordedRequest::Validate { retry, .. } => Some(retry),
                _ => None,
            })
            .collect()
    }

    pub fn review_requests(&self) -> Vec<FixReviewRequest> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                RecordedRequest::ReviewFix(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn refine_feedback(&self) -> Vec<AttemptFeedback> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                RecordedRequest::RefineFix { feedback } => Some(feedback),
                _ => None,
            })
            .collect()
    }

    fn record(&self, request: RecordedRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
    }

    async fn play<T: Clone + Send>(&self, queue: &Queue<T>, operation: &str) -> Result<T> {
        match queue.next() {
            Some(Step::Reply(value)) => Ok(value),
            Some(Step::Fail(message)) => Err(anyhow!("{}", message)),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(anyhow!(
                "validator {} has no scripted {} reply",
                self.provider,
                operation
            )),
        }
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn validate(
        &self,
        record: &ProductRecord,
        target_fields: &[String],
        retry: Option<&RetryContext>,
    ) -> Result<ValidationResult> {
        self.record(RecordedRequest::Validate {
            product_id: record.id.clone(),
            target_fields: target_fields.to_vec(),
            retry: retry.cloned(),
        });
        let mut result = self.play(&self.validate, "validate").await?;
        result.provider = self.provider;
        Ok(result)
    }

    async fn review_fix(&self, request: &FixReviewRequest) -> Result<FixReview> {
        self.record(RecordedRequest::ReviewFix(request.clone()));
        let mut review = self.play(&self.review_fix, "review_fix").await?;
        review.reviewer = self.provider;
        Ok(review)
    }

    async fn diagnose(&self, issue: &DiagnosedIssue, context: &DiagnosisContext) -> Result<Diagnosis> {
        self.record(RecordedRequest::Diagnose {
            job_id: issue.job_id.clone(),
            context_files: context.excerpts.len(),
        });
        let mut diagnosis = self.play(&self.diagnose, "diagnose").await?;
        diagnosis.provider = self.provider;
        Ok(diagnosis)
    }

    async fn review_diagnosis(
        &self,
        other: &Diagnosis,
        _issue: &DiagnosedIssue,
        _context: &DiagnosisContext,
    ) -> Result<DiagnosisReview> {
        self.record(RecordedRequest::ReviewDiagnosis { of: other.provider });
        let mut review = self.play(&self.review_diagnosis, "review_diagnosis").await?;
        review.reviewer = self.provider;
        Ok(review)
    }

    async fn refine_fix(
        &self,
        _fix: &ConsensusFix,
        feedback: &AttemptFeedback,
    ) -> Result<ProposedFix> {
        self.record(RecordedRequest::RefineFix {
            feedback: feedback.clone(),
        });
        self.play(&self.refine_fix, "refine_fix").await
    }
}
