//! Product-level consensus: independent validation rounds, scoring, merge and retry.

use crate::field_consensus::{reconcile_field, FieldPolicy};
use crate::matcher::matches;
use chrono::Utc;
use concord_core::settings::{AgreementScoring, ConsensusSettings};
use concord_core::{
    value_is_present, AuditEvent, AuditSink, AuditStream, ConcordError, ConsensusOutcome,
    ConsensusSource, Correction, FieldConsensus, ProductRecord, ProductVerification, Provider,
    RetryContext, SuggestedBy, ValidationResult, Validator,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

pub struct ProductConsensusLoop {
    validator_a: Arc<dyn Validator>,
    validator_b: Arc<dyn Validator>,
    settings: ConsensusSettings,
    target_fields: Vec<String>,
    audit: Arc<dyn AuditSink>,
}

impl ProductConsensusLoop {
    pub fn new(
        validator_a: Arc<dyn Validator>,
        validator_b: Arc<dyn Validator>,
        settings: ConsensusSettings,
        target_fields: Vec<String>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            validator_a,
            validator_b,
            settings,
            target_fields,
            audit,
        }
    }

    pub fn settings(&self) -> &ConsensusSettings {
        &self.settings
    }

    /// Run rounds for one product until the score clears the threshold or retries run out.
    pub async fn build_consensus(&self, product: &ProductRecord) -> ConsensusOutcome {
        let mut retry_count: u32 = 0;
        let mut retry: Option<RetryContext> = None;

        loop {
            let (result_a, result_b) = self.run_round(product, retry.as_ref()).await;

            if result_a.is_error() && result_b.is_error() {
                let reason = format!(
                    "both validators failed: A: {}; B: {}",
                    result_a.error.as_deref().unwrap_or_default(),
                    result_b.error.as_deref().unwrap_or_default()
                );
                tracing::warn!(product = %product.id, round = retry_count, "{}", reason);
                let outcome = self.both_failed(retry_count, reason);
                self.record_outcome(product, &outcome);
                return outcome;
            }

            let fields = self.reconcile(&result_a, &result_b);
            let score = agreement_score(&fields, self.settings.scoring);
            let discrepancies: Vec<FieldConsensus> =
                fields.iter().filter(|f| !f.agreed).cloned().collect();
            tracing::debug!(
                product = %product.id,
                round = retry_count,
                score,
                disagreeing = discrepancies.len(),
                "consensus round scored"
            );

            if !fields.is_empty() && score >= self.settings.consensus_threshold {
                let outcome = ConsensusOutcome {
                    agreed: true,
                    agreement_score: score,
                    merged_fields: merge_fields(&fields, true),
                    corrections: dedup_corrections(&result_a, &result_b),
                    missing_fields: Vec::new(),
                    discrepancies,
                    retry_count,
                    failure: None,
                    finalized_at: Utc::now(),
                };
                let outcome = with_missing_fields(outcome);
                self.record_outcome(product, &outcome);
                return outcome;
            }

            if retry_count < self.settings.max_retries {
                retry_count += 1;
                retry = Some(RetryContext::from_discrepancies(retry_count, &discrepancies));
                if self.settings.retry_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.settings.retry_delay_ms)).await;
                }
                continue;
            }

            let failure = ConcordError::Disagreement {
                fields: discrepancies.iter().map(|d| d.field.clone()).collect(),
            };
            let outcome = with_missing_fields(ConsensusOutcome {
                agreed: false,
                agreement_score: score,
                merged_fields: merge_fields(&fields, false),
                corrections: dedup_corrections(&result_a, &result_b),
                missing_fields: Vec::new(),
                discrepancies,
                retry_count,
                failure: Some(failure.to_string()),
                finalized_at: Utc::now(),
            });
            tracing::info!(
                product = %product.id,
                score,
                retries = retry_count,
                "product flagged for review"
            );
            self.record_outcome(product, &outcome);
            return outcome;
        }
    }

    /// Verify products one after another, pausing between items to respect oracle limits.
    pub async fn verify_batch(&self, products: &[ProductRecord]) -> Vec<ProductVerification> {
        let mut out = Vec::with_capacity(products.len());
        for (idx, product) in products.iter().enumerate() {
            if idx > 0 && self.settings.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.batch_delay_ms)).await;
            }
            let outcome = self.build_consensus(product).await;
            out.push(ProductVerification {
                product_id: product.id.clone(),
                status: outcome.status(),
                outcome,
            });
        }
        out
    }

    /// Both validators in parallel, each bounded by its own timeout. Neither sees the
    /// other's answer; only `retry` carries prior answers, to both sides alike.
    async fn run_round(
        &self,
        product: &ProductRecord,
        retry: Option<&RetryContext>,
    ) -> (ValidationResult, ValidationResult) {
        let timeout = self.settings.validator_timeout();
        futures::join!(
            call_validator(
                self.validator_a.as_ref(),
                Provider::A,
                product,
                &self.target_fields,
                retry,
                timeout
            ),
            call_validator(
                self.validator_b.as_ref(),
                Provider::B,
                product,
                &self.target_fields,
                retry,
                timeout
            ),
        )
    }

    fn tracked_fields(&self, a: &ValidationResult, b: &ValidationResult) -> Vec<String> {
        if !self.target_fields.is_empty() {
            return self.target_fields.clone();
        }
        let mut keys = BTreeSet::new();
        for result in [a, b] {
            if !result.is_error() {
                keys.extend(result.fields.keys().cloned());
            }
        }
        keys.into_iter().collect()
    }

    fn reconcile(&self, a: &ValidationResult, b: &ValidationResult) -> Vec<FieldConsensus> {
        let policy = FieldPolicy::from(&self.settings);
        self.tracked_fields(a, b)
            .iter()
            .map(|field| reconcile_field(field, a.reading(field), b.reading(field), policy))
            .collect()
    }

    fn both_failed(&self, retry_count: u32, reason: String) -> ConsensusOutcome {
        let merged_fields: BTreeMap<String, Value> = self
            .target_fields
            .iter()
            .map(|f| (f.clone(), Value::Null))
            .collect();
        ConsensusOutcome {
            agreed: false,
            agreement_score: 0.0,
            missing_fields: merged_fields.keys().cloned().collect(),
            merged_fields,
            corrections: Vec::new(),
            discrepancies: Vec::new(),
            retry_count,
            failure: Some(reason),
            finalized_at: Utc::now(),
        }
    }

    fn record_outcome(&self, product: &ProductRecord, outcome: &ConsensusOutcome) {
        let event = if outcome.agreed {
            "verified"
        } else {
            "flagged_for_review"
        };
        let detail = json!({
            "agreement_score": outcome.agreement_score,
            "retry_count": outcome.retry_count,
            "discrepancies": outcome.discrepancies.iter().map(|d| &d.field).collect::<Vec<_>>(),
            "missing_fields": outcome.missing_fields,
            "failure": outcome.failure,
        });
        if let Err(err) = self.audit.record(&AuditEvent::new(
            AuditStream::Consensus,
            product.id.clone(),
            event,
            detail,
        )) {
            tracing::warn!(product = %product.id, error = %err, "failed to write consensus audit row");
        }
    }
}

async fn call_validator(
    validator: &dyn Validator,
    provider: Provider,
    product: &ProductRecord,
    target_fields: &[String],
    retry: Option<&RetryContext>,
    timeout: Duration,
) -> ValidationResult {
    let oracle_error = |message: String| ConcordError::Oracle { provider, message }.to_string();
    match tokio::time::timeout(timeout, validator.validate(product, target_fields, retry)).await {
        Ok(Ok(mut result)) => {
            result.provider = provider;
            result
        }
        Ok(Err(err)) => ValidationResult::failed(provider, oracle_error(format!("{:#}", err))),
        Err(_) => ValidationResult::failed(
            provider,
            oracle_error(format!("timed out after {}ms", timeout.as_millis())),
        ),
    }
}

/// Aggregate agreement in `[0, 100]`.
pub fn agreement_score(fields: &[FieldConsensus], scoring: AgreementScoring) -> f64 {
    if fields.is_empty() {
        return 0.0;
    }
    let points: f64 = fields
        .iter()
        .map(|f| match (scoring, f.agreed, f.source) {
            (_, true, _) => 1.0,
            (AgreementScoring::Weighted, false, ConsensusSource::AOnly | ConsensusSource::BOnly) => {
                0.5
            }
            _ => 0.0,
        })
        .sum();
    points / fields.len() as f64 * 100.0
}

/// Merged record. Unresolved fields fall back to the more confident produced value only
/// when the product was accepted; otherwise they stay null.
pub fn merge_fields(fields: &[FieldConsensus], accepted: bool) -> BTreeMap<String, Value> {
    fields
        .iter()
        .map(|f| {
            let value = if f.source.is_resolved() {
                f.final_value.clone()
            } else if accepted {
                prefer_confident(f)
            } else {
                Value::Null
            };
            (f.field.clone(), value)
        })
        .collect()
}

fn prefer_confident(f: &FieldConsensus) -> Value {
    let a = value_is_present(&f.value_a).then_some((&f.value_a, f.confidence_a));
    let b = value_is_present(&f.value_b).then_some((&f.value_b, f.confidence_b));
    match (a, b) {
        (Some((va, ca)), Some((vb, cb))) => {
            if cb > ca {
                vb.clone()
            } else {
                va.clone()
            }
        }
        (Some((va, _)), None) => va.clone(),
        (None, Some((vb, _))) => vb.clone(),
        (None, None) => Value::Null,
    }
}

fn with_missing_fields(mut outcome: ConsensusOutcome) -> ConsensusOutcome {
    outcome.missing_fields = outcome
        .merged_fields
        .iter()
        .filter(|(_, v)| !value_is_present(v))
        .map(|(k, _)| k.clone())
        .collect();
    outcome
}

/// Same field and matching corrected value from both providers collapses to one
/// record tagged `consensus`.
pub fn dedup_corrections(a: &ValidationResult, b: &ValidationResult) -> Vec<Correction> {
    let mut out: Vec<Correction> = Vec::new();
    for result in [a, b] {
        if result.is_error() {
            continue;
        }
        let tag = SuggestedBy::from(result.provider);
        for correction in &result.corrections {
            let existing = out.iter_mut().find(|c| {
                c.field == correction.field
                    && matches(&c.corrected_value, &correction.corrected_value)
            });
            match existing {
                Some(c) if c.suggested_by != tag => c.suggested_by = SuggestedBy::Consensus,
                Some(_) => {}
                None => out.push(Correction {
                    suggested_by: tag,
                    ..correction.clone()
                }),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests;
