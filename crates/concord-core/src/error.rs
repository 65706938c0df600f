use crate::model::Provider;
use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy of the consensus and remediation protocol.
///
/// Every kind is recovered locally up to its retry or attempt budget; only
/// exhaustion surfaces as a flagged product or an escalated job.
#[derive(Debug, Error)]
pub enum ConcordError {
    /// A validator call failed or timed out.
    #[error("validator {provider} failed: {message}")]
    Oracle { provider: Provider, message: String },

    /// Validators produced incompatible values that retries did not reconcile.
    #[error("validators disagree on {}", fields.join(", "))]
    Disagreement { fields: Vec<String> },

    /// A proposed edit could not be applied.
    #[error("cannot apply edit to {}: {message}", file.display())]
    Apply { file: PathBuf, message: String },

    /// A static, type or regression check failed after applying a fix.
    #[error("post-apply validation failed: {}", errors.join("; "))]
    ValidationGate { errors: Vec<String> },

    /// Dual review did not reach the required agreement.
    #[error("{stage} consensus gate failed: {reason}")]
    ConsensusGate { stage: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ConcordError {
    pub fn apply(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ConcordError::Apply {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Stable code written to audit rows.
    pub fn kind(&self) -> &'static str {
        match self {
            ConcordError::Oracle { .. } => "oracle_error",
            ConcordError::Disagreement { .. } => "disagreement_error",
            ConcordError::Apply { .. } => "apply_error",
            ConcordError::ValidationGate { .. } => "validation_gate_error",
            ConcordError::ConsensusGate { .. } => "consensus_gate_error",
            ConcordError::Config(_) => "config_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_codes() {
        let err = ConcordError::apply("src/a.rs", "anchor not found");
        assert_eq!(err.kind(), "apply_error");
        assert_eq!(
            err.to_string(),
            "cannot apply edit to src/a.rs: anchor not found"
        );
    }

    #[test]
    fn consensus_gate_names_its_stage() {
        let err = ConcordError::ConsensusGate {
            stage: "diagnosis".to_string(),
            reason: "root causes diverge".to_string(),
        };
        assert_eq!(err.kind(), "consensus_gate_error");
        assert_eq!(
            err.to_string(),
            "diagnosis consensus gate failed: root causes diverge"
        );
    }

    #[test]
    fn disagreement_lists_fields() {
        let err = ConcordError::Disagreement {
            fields: vec!["brand".to_string(), "fuelType".to_string()],
        };
        assert_eq!(err.to_string(), "validators disagree on brand, fuelType");
    }
}
