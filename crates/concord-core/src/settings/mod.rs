//! Tunable protocol parameters.
//!
//! Thresholds and margins have no documented derivation; they are configuration,
//! and every field has a serde default so partial config files load.

use crate::error::ConcordError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod defaults;

use defaults::{
    default_agreement_threshold, default_backfill_delay_ms, default_backup_dir,
    default_backup_retention, default_batch_delay_ms, default_check_timeout_ms,
    default_confidence_margin, default_consensus_threshold, default_context_excerpt_chars,
    default_diagnosis_timeout_ms, default_max_attempts, default_max_retries,
    default_min_confidence, default_reprocess_timeout_ms, default_retry_delay_ms,
    default_review_timeout_ms, default_root_cause_similarity, default_validator_timeout_ms,
};

/// How the product-level agreement score is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgreementScoring {
    /// Fraction of tracked fields with exact agreement.
    #[default]
    Strict,
    /// Exact agreement scores 1, confidence-dominance resolution scores 0.5.
    Weighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSettings {
    /// Minimum per-field confidence for a single-source value.
    #[serde(default = "default_agreement_threshold")]
    pub agreement_threshold: f64,
    /// How far one confidence must exceed the other to dominate.
    #[serde(default = "default_confidence_margin")]
    pub confidence_margin: f64,
    /// Minimum aggregate score in `[0, 100]` to accept a product.
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_validator_timeout_ms")]
    pub validator_timeout_ms: u64,
    /// Pause between products of a batch, to respect oracle rate limits.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default)]
    pub scoring: AgreementScoring,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            agreement_threshold: default_agreement_threshold(),
            confidence_margin: default_confidence_margin(),
            consensus_threshold: default_consensus_threshold(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            validator_timeout_ms: default_validator_timeout_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            scoring: AgreementScoring::default(),
        }
    }
}

impl ConsensusSettings {
    /// Zero delays, for tests and replays.
    pub fn immediate() -> Self {
        Self {
            retry_delay_ms: 0,
            batch_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn validator_timeout(&self) -> Duration {
        Duration::from_millis(self.validator_timeout_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), ConcordError> {
        check_unit("consensus.agreement_threshold", self.agreement_threshold)?;
        check_unit("consensus.confidence_margin", self.confidence_margin)?;
        check_percent("consensus.consensus_threshold", self.consensus_threshold)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisSettings {
    /// Both diagnoses must reach this confidence (`[0, 100]`).
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Root-cause similarity must exceed this value.
    #[serde(default = "default_root_cause_similarity")]
    pub root_cause_similarity: f64,
    /// Files or directories (relative to the source root) fed to diagnosis as context.
    #[serde(default)]
    pub context_files: Vec<PathBuf>,
    #[serde(default = "default_context_excerpt_chars")]
    pub context_excerpt_chars: usize,
    #[serde(default = "default_diagnosis_timeout_ms")]
    pub diagnosis_timeout_ms: u64,
}

impl Default for DiagnosisSettings {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            root_cause_similarity: default_root_cause_similarity(),
            context_files: Vec::new(),
            context_excerpt_chars: default_context_excerpt_chars(),
            diagnosis_timeout_ms: default_diagnosis_timeout_ms(),
        }
    }
}

impl DiagnosisSettings {
    pub fn diagnosis_timeout(&self) -> Duration {
        Duration::from_millis(self.diagnosis_timeout_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), ConcordError> {
        check_percent("diagnosis.min_confidence", self.min_confidence)?;
        check_unit("diagnosis.root_cause_similarity", self.root_cause_similarity)?;
        Ok(())
    }
}

/// An external check command run in the source root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCommand {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backup directory, relative to the source root.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
    #[serde(default)]
    pub static_check_commands: Vec<CheckCommand>,
    #[serde(default)]
    pub regression_command: Option<CheckCommand>,
    /// Accept edits to non-data files when no check command ran. Off by default:
    /// a logic edit needs at least one static or regression check to pass.
    #[serde(default)]
    pub allow_unchecked_edits: bool,
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
    #[serde(default = "default_reprocess_timeout_ms")]
    pub reprocess_timeout_ms: u64,
    #[serde(default = "default_review_timeout_ms")]
    pub review_timeout_ms: u64,
    #[serde(default = "default_backfill_delay_ms")]
    pub backfill_delay_ms: u64,
}

impl Default for RemediationSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backup_dir: default_backup_dir(),
            backup_retention: default_backup_retention(),
            static_check_commands: Vec::new(),
            regression_command: None,
            allow_unchecked_edits: false,
            check_timeout_ms: default_check_timeout_ms(),
            reprocess_timeout_ms: default_reprocess_timeout_ms(),
            review_timeout_ms: default_review_timeout_ms(),
            backfill_delay_ms: default_backfill_delay_ms(),
        }
    }
}

impl RemediationSettings {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms.max(1))
    }

    pub fn reprocess_timeout(&self) -> Duration {
        Duration::from_millis(self.reprocess_timeout_ms.max(1))
    }

    pub fn review_timeout(&self) -> Duration {
        Duration::from_millis(self.review_timeout_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), ConcordError> {
        if self.max_attempts == 0 {
            return Err(ConcordError::Config(
                "remediation.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backup_dir.as_os_str().is_empty() {
            return Err(ConcordError::Config(
                "remediation.backup_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), ConcordError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConcordError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

fn check_percent(name: &str, value: f64) -> Result<(), ConcordError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConcordError::Config(format!(
            "{} must be within [0, 100], got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_consensus_settings_fill_defaults() {
        let parsed: ConsensusSettings = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(parsed.max_retries, 5);
        assert_eq!(parsed.agreement_threshold, 0.8);
        assert_eq!(parsed.confidence_margin, 0.15);
        assert_eq!(parsed.scoring, AgreementScoring::Strict);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let settings = ConsensusSettings {
            agreement_threshold: 1.2,
            ..ConsensusSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let settings = RemediationSettings {
            max_attempts: 0,
            ..RemediationSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(RemediationSettings::default().validate().is_ok());
    }

    #[test]
    fn diagnosis_defaults_match_gate() {
        let settings = DiagnosisSettings::default();
        assert_eq!(settings.min_confidence, 70.0);
        assert_eq!(settings.root_cause_similarity, 0.6);
        assert!(settings.validate().is_ok());
    }
}
