//! Field consensus data model.
//!
//! Values are carried as `serde_json::Value` so the validators can report strings,
//! numbers, booleans or null without the core committing to a field taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Which of the two independent validators produced an opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    A,
    B,
}

impl Provider {
    pub fn label(&self) -> &'static str {
        match self {
            Provider::A => "A",
            Provider::B => "B",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a validator says a field value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    #[default]
    Original,
    Corrected,
    Researched,
    Inferred,
}

/// One validator's reading of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldReading {
    #[serde(default)]
    pub value: Value,
    /// Confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub source: FieldSource,
}

impl FieldReading {
    pub fn new(value: impl Into<Value>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence: clamp_unit(confidence),
            source: FieldSource::Original,
        }
    }

    /// A reading counts as a produced value when it is not null and not blank.
    pub fn has_value(&self) -> bool {
        value_is_present(&self.value)
    }
}

pub fn value_is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Who suggested a correction. `Consensus` marks a correction both validators proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedBy {
    A,
    B,
    Consensus,
}

impl From<Provider> for SuggestedBy {
    fn from(provider: Provider) -> Self {
        match provider {
            Provider::A => SuggestedBy::A,
            Provider::B => SuggestedBy::B,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub field: String,
    #[serde(default)]
    pub original_value: Value,
    #[serde(default)]
    pub corrected_value: Value,
    #[serde(default)]
    pub reason: String,
    pub suggested_by: SuggestedBy,
}

/// One validator's independent opinion on one product. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub provider: Provider,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldReading>,
    #[serde(default)]
    pub corrections: Vec<Correction>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            fields: BTreeMap::new(),
            corrections: Vec::new(),
            error: None,
        }
    }

    /// A result standing in for a failed or timed-out oracle call.
    pub fn failed(provider: Provider, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(provider)
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, reading: FieldReading) -> Self {
        self.fields.insert(key.into(), reading);
        self
    }

    pub fn with_correction(mut self, correction: Correction) -> Self {
        self.corrections.push(correction);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn reading(&self, key: &str) -> Option<&FieldReading> {
        if self.is_error() {
            return None;
        }
        self.fields.get(key)
    }
}

/// How a field's final value was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusSource {
    Consensus,
    AOnly,
    BOnly,
    Unresolved,
}

impl ConsensusSource {
    pub fn single(provider: Provider) -> Self {
        match provider {
            Provider::A => ConsensusSource::AOnly,
            Provider::B => ConsensusSource::BOnly,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, ConsensusSource::Unresolved)
    }
}

/// Per-field reconciliation result.
///
/// `agreed` implies `source == Consensus` and `final_value` matches both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConsensus {
    pub field: String,
    pub agreed: bool,
    pub final_value: Value,
    pub value_a: Value,
    pub value_b: Value,
    pub confidence_a: f64,
    pub confidence_b: f64,
    pub source: ConsensusSource,
}

/// A product record handed to the validators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Unparsed upstream payload, passed through to the validators untouched.
    #[serde(default)]
    pub raw: Value,
}

/// One disagreeing field as shown to both validators on a retry round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDisagreement {
    pub field: String,
    pub value_a: Value,
    pub value_b: Value,
    pub confidence_a: f64,
    pub confidence_b: f64,
}

/// The only channel through which one validator sees the other's prior answer.
/// Symmetric: both sides receive the same context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryContext {
    pub round: u32,
    pub disagreements: Vec<FieldDisagreement>,
}

impl RetryContext {
    pub fn from_discrepancies(round: u32, discrepancies: &[FieldConsensus]) -> Self {
        Self {
            round,
            disagreements: discrepancies
                .iter()
                .map(|d| FieldDisagreement {
                    field: d.field.clone(),
                    value_a: d.value_a.clone(),
                    value_b: d.value_b.clone(),
                    confidence_a: d.confidence_a,
                    confidence_b: d.confidence_b,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Verified,
    FlaggedForReview,
}

/// Product-level result of one verification session. Never mutated after the loop ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub agreed: bool,
    /// Aggregate agreement in `[0, 100]`.
    pub agreement_score: f64,
    pub merged_fields: BTreeMap<String, Value>,
    pub corrections: Vec<Correction>,
    pub discrepancies: Vec<FieldConsensus>,
    /// Tracked fields whose merged value is null.
    #[serde(default)]
    pub missing_fields: Vec<String>,
    pub retry_count: u32,
    #[serde(default)]
    pub failure: Option<String>,
    pub finalized_at: DateTime<Utc>,
}

impl ConsensusOutcome {
    pub fn status(&self) -> ProductStatus {
        if self.agreed {
            ProductStatus::Verified
        } else {
            ProductStatus::FlaggedForReview
        }
    }
}

/// One product's entry in a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVerification {
    pub product_id: String,
    pub status: ProductStatus,
    pub outcome: ConsensusOutcome,
}
