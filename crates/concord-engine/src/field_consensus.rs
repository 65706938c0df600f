//! Per-field reconciliation of two validator readings.

use crate::matcher::matches;
use concord_core::{clamp_unit, ConsensusSource, FieldConsensus, FieldReading, Provider};
use serde_json::Value;

/// Dominance parameters for one field decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldPolicy {
    pub agreement_threshold: f64,
    pub confidence_margin: f64,
}

impl Default for FieldPolicy {
    fn default() -> Self {
        Self {
            agreement_threshold: 0.8,
            confidence_margin: 0.15,
        }
    }
}

impl From<&concord_core::settings::ConsensusSettings> for FieldPolicy {
    fn from(settings: &concord_core::settings::ConsensusSettings) -> Self {
        Self {
            agreement_threshold: settings.agreement_threshold,
            confidence_margin: settings.confidence_margin,
        }
    }
}

static NULL_VALUE: Value = Value::Null;

struct Side<'a> {
    provider: Provider,
    value: &'a Value,
    confidence: f64,
    produced: bool,
}

impl<'a> Side<'a> {
    fn of(provider: Provider, reading: Option<&'a FieldReading>) -> Self {
        match reading {
            Some(r) => Side {
                provider,
                value: &r.value,
                confidence: clamp_unit(r.confidence),
                produced: r.has_value(),
            },
            None => Side {
                provider,
                value: &NULL_VALUE,
                confidence: 0.0,
                produced: false,
            },
        }
    }

    fn dominates(&self, other: &Side<'_>, policy: FieldPolicy) -> bool {
        self.confidence >= policy.agreement_threshold
            && self.confidence - other.confidence > policy.confidence_margin
    }
}

/// Reconcile one field. The rules are evaluated strictly in order: exact match first,
/// then confidence dominance, then a lone confident value, else unresolved.
pub fn reconcile_field(
    field: &str,
    a: Option<&FieldReading>,
    b: Option<&FieldReading>,
    policy: FieldPolicy,
) -> FieldConsensus {
    let side_a = Side::of(Provider::A, a);
    let side_b = Side::of(Provider::B, b);

    let (agreed, winner) = match (side_a.produced, side_b.produced) {
        (true, true) if matches(side_a.value, side_b.value) => (true, None),
        (true, true) => {
            if side_a.dominates(&side_b, policy) {
                (false, Some(&side_a))
            } else if side_b.dominates(&side_a, policy) {
                (false, Some(&side_b))
            } else {
                (false, None)
            }
        }
        (true, false) if side_a.confidence >= policy.agreement_threshold => (false, Some(&side_a)),
        (false, true) if side_b.confidence >= policy.agreement_threshold => (false, Some(&side_b)),
        _ => (false, None),
    };

    let (final_value, source) = if agreed {
        (side_a.value.clone(), ConsensusSource::Consensus)
    } else if let Some(side) = winner {
        (side.value.clone(), ConsensusSource::single(side.provider))
    } else {
        (Value::Null, ConsensusSource::Unresolved)
    };

    FieldConsensus {
        field: field.to_string(),
        agreed,
        final_value,
        value_a: side_a.value.clone(),
        value_b: side_b.value.clone(),
        confidence_a: side_a.confidence,
        confidence_b: side_b.confidence,
        source,
    }
}
