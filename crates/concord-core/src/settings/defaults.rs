pub(super) fn default_agreement_threshold() -> f64 {
    0.8
}

pub(super) fn default_confidence_margin() -> f64 {
    0.15
}

pub(super) fn default_consensus_threshold() -> f64 {
    80.0
}

pub(super) fn default_max_retries() -> u32 {
    2
}

pub(super) fn default_retry_delay_ms() -> u64 {
    2_000
}

pub(super) fn default_validator_timeout_ms() -> u64 {
    60_000
}

pub(super) fn default_batch_delay_ms() -> u64 {
    1_500
}

pub(super) fn default_min_confidence() -> f64 {
    70.0
}

pub(super) fn default_root_cause_similarity() -> f64 {
    0.6
}

pub(super) fn default_context_excerpt_chars() -> usize {
    4_000
}

pub(super) fn default_diagnosis_timeout_ms() -> u64 {
    90_000
}

pub(super) fn default_max_attempts() -> u32 {
    3
}

pub(super) fn default_backup_dir() -> std::path::PathBuf {
    std::path::PathBuf::from(".concord/backups")
}

pub(super) fn default_backup_retention() -> usize {
    20
}

pub(super) fn default_check_timeout_ms() -> u64 {
    120_000
}

pub(super) fn default_reprocess_timeout_ms() -> u64 {
    120_000
}

pub(super) fn default_review_timeout_ms() -> u64 {
    90_000
}

pub(super) fn default_backfill_delay_ms() -> u64 {
    5_000
}
