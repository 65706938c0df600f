use super::*;
use crate::testing::{ScriptedValidator, Step};
use concord_core::{FieldReading, NullAudit, ProductStatus};
use std::sync::Mutex;

#[derive(Default)]
struct MemoryAudit(Mutex<Vec<AuditEvent>>);

impl AuditSink for MemoryAudit {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

fn product(id: &str) -> ProductRecord {
    ProductRecord {
        id: id.to_string(),
        fields: BTreeMap::new(),
        raw: json!({"title": "30 in. Gas Range"}),
    }
}

fn reply(fields: &[(&str, Value, f64)]) -> Step<ValidationResult> {
    let mut result = ValidationResult::new(Provider::A);
    for (key, value, confidence) in fields {
        result = result.with_field(*key, FieldReading::new(value.clone(), *confidence));
    }
    Step::Reply(result)
}

fn fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn consensus_loop(
    a: Arc<ScriptedValidator>,
    b: Arc<ScriptedValidator>,
    settings: ConsensusSettings,
    target: &[&str],
) -> ProductConsensusLoop {
    ProductConsensusLoop::new(a, b, settings, fields(target), Arc::new(NullAudit))
}

#[tokio::test]
async fn numeric_equivalents_verify_without_retry() {
    let a = Arc::new(
        ScriptedValidator::new(Provider::A).on_validate(reply(&[("width", json!("30"), 0.95)])),
    );
    let b = Arc::new(
        ScriptedValidator::new(Provider::B).on_validate(reply(&[("width", json!("30.0"), 0.9)])),
    );
    let lp = consensus_loop(a.clone(), b.clone(), ConsensusSettings::immediate(), &["width"]);

    let outcome = lp.build_consensus(&product("sku-1")).await;

    assert!(outcome.agreed);
    assert_eq!(outcome.retry_count, 0);
    assert_eq!(outcome.agreement_score, 100.0);
    assert_eq!(outcome.merged_fields["width"], json!("30"));
    assert!(outcome.discrepancies.is_empty());
    assert!(outcome.missing_fields.is_empty());
    assert_eq!(a.validate_contexts(), vec![None]);
    assert_eq!(b.validate_contexts(), vec![None]);
}

#[tokio::test]
async fn weighted_scoring_accepts_dominance_resolution() {
    let a = Arc::new(
        ScriptedValidator::new(Provider::A).on_validate(reply(&[("brand", json!("GE"), 0.9)])),
    );
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_validate(reply(&[(
        "brand",
        json!("General Electric"),
        0.5,
    )])));
    let settings = ConsensusSettings {
        scoring: AgreementScoring::Weighted,
        consensus_threshold: 50.0,
        ..ConsensusSettings::immediate()
    };
    let lp = consensus_loop(a, b, settings, &["brand"]);

    let outcome = lp.build_consensus(&product("sku-2")).await;

    assert!(outcome.agreed);
    assert_eq!(outcome.agreement_score, 50.0);
    assert_eq!(outcome.merged_fields["brand"], json!("GE"));
    assert_eq!(outcome.discrepancies.len(), 1);
    assert_eq!(outcome.discrepancies[0].source, ConsensusSource::AOnly);
}

#[tokio::test]
async fn unresolved_field_exhausts_retries_and_is_flagged() {
    let a = Arc::new(
        ScriptedValidator::new(Provider::A).on_validate(reply(&[("fuelType", json!("Gas"), 0.6)])),
    );
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_validate(reply(&[(
        "fuelType",
        json!("Electric"),
        0.55,
    )])));
    let settings = ConsensusSettings {
        max_retries: 2,
        ..ConsensusSettings::immediate()
    };
    let lp = consensus_loop(a.clone(), b.clone(), settings, &["fuelType"]);

    let outcome = lp.build_consensus(&product("sku-3")).await;

    assert!(!outcome.agreed);
    assert_eq!(outcome.status(), ProductStatus::FlaggedForReview);
    assert_eq!(outcome.retry_count, 2);
    assert_eq!(outcome.discrepancies.len(), 1);
    assert_eq!(outcome.discrepancies[0].field, "fuelType");
    assert_eq!(outcome.merged_fields["fuelType"], Value::Null);
    assert_eq!(outcome.missing_fields, vec!["fuelType".to_string()]);
    assert!(outcome.failure.is_some());

    let contexts_a = a.validate_contexts();
    let contexts_b = b.validate_contexts();
    assert_eq!(contexts_a.len(), 3);
    assert!(contexts_a[0].is_none(), "first round must be independent");
    assert_eq!(contexts_a, contexts_b, "retry context must be symmetric");
    let second = contexts_a[1].as_ref().unwrap();
    assert_eq!(second.round, 1);
    assert_eq!(second.disagreements[0].value_a, json!("Gas"));
    assert_eq!(second.disagreements[0].value_b, json!("Electric"));
}

#[tokio::test]
async fn retry_context_can_converge() {
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_validate(reply(&[("fuelType", json!("Gas"), 0.6)]))
            .on_validate(reply(&[("fuelType", json!("electric"), 0.8)])),
    );
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_validate(reply(&[(
        "fuelType",
        json!("Electric"),
        0.7,
    )])));
    let lp = consensus_loop(a, b, ConsensusSettings::immediate(), &["fuelType"]);

    let outcome = lp.build_consensus(&product("sku-4")).await;

    assert!(outcome.agreed);
    assert_eq!(outcome.retry_count, 1);
    assert_eq!(outcome.merged_fields["fuelType"], json!("electric"));
}

#[tokio::test]
async fn both_validators_failing_ends_without_retry() {
    let a = Arc::new(ScriptedValidator::new(Provider::A).on_validate(Step::Fail("503".into())));
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_validate(Step::Fail("quota".into())));
    let lp = consensus_loop(a.clone(), b.clone(), ConsensusSettings::immediate(), &["width"]);

    let outcome = lp.build_consensus(&product("sku-5")).await;

    assert!(!outcome.agreed);
    assert_eq!(outcome.agreement_score, 0.0);
    assert_eq!(outcome.retry_count, 0);
    assert_eq!(a.validate_contexts().len(), 1);
    assert_eq!(outcome.missing_fields, vec!["width".to_string()]);
    let failure = outcome.failure.unwrap();
    assert!(failure.contains("503") && failure.contains("quota"));
}

#[tokio::test]
async fn hanging_validators_time_out_as_errors() {
    let a = Arc::new(ScriptedValidator::new(Provider::A).on_validate(Step::Hang));
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_validate(Step::Hang));
    let settings = ConsensusSettings {
        validator_timeout_ms: 50,
        ..ConsensusSettings::immediate()
    };
    let lp = consensus_loop(a, b, settings, &["width"]);

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        lp.build_consensus(&product("sku-6")),
    )
    .await
    .expect("loop must not hang");

    assert!(!outcome.agreed);
    assert_eq!(outcome.retry_count, 0);
    assert!(outcome.failure.unwrap().contains("timed out"));
}

#[tokio::test]
async fn one_side_down_still_reports_the_other_side() {
    let a = Arc::new(
        ScriptedValidator::new(Provider::A).on_validate(reply(&[("height", json!("36"), 0.9)])),
    );
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_validate(Step::Hang));
    let settings = ConsensusSettings {
        validator_timeout_ms: 50,
        max_retries: 1,
        ..ConsensusSettings::immediate()
    };
    let lp = consensus_loop(a, b, settings, &["height"]);

    let outcome = lp.build_consensus(&product("sku-7")).await;

    assert!(!outcome.agreed);
    assert_eq!(outcome.retry_count, 1);
    assert_eq!(outcome.discrepancies[0].source, ConsensusSource::AOnly);
    assert_eq!(outcome.merged_fields["height"], json!("36"));
}

#[tokio::test]
async fn retry_count_never_exceeds_budget() {
    for max_retries in 0..4 {
        let a = Arc::new(
            ScriptedValidator::new(Provider::A).on_validate(reply(&[("color", json!("Red"), 0.5)])),
        );
        let b = Arc::new(
            ScriptedValidator::new(Provider::B).on_validate(reply(&[("color", json!("Blue"), 0.5)])),
        );
        let settings = ConsensusSettings {
            max_retries,
            ..ConsensusSettings::immediate()
        };
        let lp = consensus_loop(a.clone(), b, settings, &["color"]);
        let outcome = lp.build_consensus(&product("sku-8")).await;
        assert_eq!(outcome.retry_count, max_retries);
        assert_eq!(a.validate_contexts().len() as u32, max_retries + 1);
    }
}

#[tokio::test]
async fn target_fields_default_to_reported_keys() {
    let a = Arc::new(ScriptedValidator::new(Provider::A).on_validate(reply(&[
        ("width", json!(30), 0.9),
        ("depth", json!(25), 0.9),
    ])));
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_validate(reply(&[
        ("width", json!("30"), 0.9),
        ("depth", json!("25.001"), 0.9),
    ])));
    let lp = consensus_loop(a, b, ConsensusSettings::immediate(), &[]);

    let outcome = lp.build_consensus(&product("sku-9")).await;

    assert!(outcome.agreed);
    assert_eq!(outcome.merged_fields.len(), 2);
}

#[test]
fn corrections_from_both_sides_collapse() {
    let correction = |field: &str, value: &str| Correction {
        field: field.to_string(),
        original_value: json!("G.E."),
        corrected_value: json!(value),
        reason: "brand normalization".to_string(),
        suggested_by: SuggestedBy::A,
    };
    let a = ValidationResult::new(Provider::A)
        .with_correction(correction("brand", "General Electric"))
        .with_correction(correction("color", "White"));
    let b = ValidationResult::new(Provider::B)
        .with_correction(correction("brand", "general electric "));

    let merged = dedup_corrections(&a, &b);

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].field, "brand");
    assert_eq!(merged[0].suggested_by, SuggestedBy::Consensus);
    assert_eq!(merged[1].suggested_by, SuggestedBy::A);
}

#[test]
fn errored_side_contributes_no_corrections() {
    let a = ValidationResult::failed(Provider::A, "down");
    let b = ValidationResult::new(Provider::B).with_correction(Correction {
        field: "brand".to_string(),
        original_value: Value::Null,
        corrected_value: json!("Bosch"),
        reason: String::new(),
        suggested_by: SuggestedBy::A,
    });
    let merged = dedup_corrections(&a, &b);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].suggested_by, SuggestedBy::B);
}

#[test]
fn unresolved_fields_merge_to_confident_side_only_when_accepted() {
    let field = FieldConsensus {
        field: "color".to_string(),
        agreed: false,
        final_value: Value::Null,
        value_a: json!("Red"),
        value_b: json!("Crimson"),
        confidence_a: 0.4,
        confidence_b: 0.6,
        source: ConsensusSource::Unresolved,
    };
    assert_eq!(merge_fields(&[field.clone()], true)["color"], json!("Crimson"));
    assert_eq!(merge_fields(&[field], false)["color"], Value::Null);
}

#[tokio::test]
async fn batch_runs_sequentially_and_audits_each_product() {
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_validate(reply(&[("width", json!("30"), 0.9)]))
            .on_validate(reply(&[("width", json!("31"), 0.4)])),
    );
    let b = Arc::new(
        ScriptedValidator::new(Provider::B).on_validate(reply(&[("width", json!("30"), 0.9)])),
    );
    let audit = Arc::new(MemoryAudit::default());
    let settings = ConsensusSettings {
        max_retries: 0,
        ..ConsensusSettings::immediate()
    };
    let lp = ProductConsensusLoop::new(a, b, settings, fields(&["width"]), audit.clone());

    let results = lp
        .verify_batch(&[product("sku-10"), product("sku-11")])
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, ProductStatus::Verified);
    assert_eq!(results[1].status, ProductStatus::FlaggedForReview);
    let rows = audit.0.lock().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].event, "verified");
    assert_eq!(rows[1].subject, "sku-11");
    assert_eq!(rows[1].event, "flagged_for_review");
}
