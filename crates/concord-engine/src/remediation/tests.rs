use super::*;
use crate::apply::FixApplier;
use crate::diagnosis::DualDiagnosisEngine;
use crate::testing::{ScriptedValidator, Step};
use async_trait::async_trait;
use concord_adapters::RecordingSink;
use concord_core::memory::MemorySource;
use concord_core::settings::{DiagnosisSettings, RemediationSettings};
use concord_core::{
    AuditEvent, AuditSink, CodeChange, ConsensusFix, ContainerInsert, Diagnosis, DiagnosisReview,
    FixReview, FixType, JobRecord, ProposedFix, Provider, Reprocessor, ReviewChecklist,
    RiskLevel, SelectedFix, Severity, TrackedIssue, MISSING_REQUIRED_FIELD,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

const MAPPER: &str = "fn map(raw: &str) -> String {\n    let header = raw;\n    header.to_string()\n}\n";
const CAUSE: &str = "header normalizer keeps the unit suffix so 'W (in.)' never maps to width";

struct MemoryAudit(Mutex<Vec<AuditEvent>>);

impl AuditSink for MemoryAudit {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Stands in for the product pipeline: width is extracted only once the mapper
/// strips unit suffixes.
struct SourceReprocessor {
    source: Arc<MemorySource>,
}

#[async_trait]
impl Reprocessor for SourceReprocessor {
    async fn reprocess(&self, job: &JobRecord) -> anyhow::Result<Value> {
        let mapper = self.source.get("mappers/range.rs").unwrap_or_default();
        let width = if mapper.contains("strip(raw)") {
            json!("30")
        } else {
            Value::Null
        };
        Ok(json!({"width": width, "brand": job.current_response["brand"].clone()}))
    }
}

fn source() -> Arc<MemorySource> {
    Arc::new(MemorySource::new().with_file("mappers/range.rs", MAPPER))
}

fn job() -> JobRecord {
    JobRecord {
        job_id: "job-7".to_string(),
        issues: vec![TrackedIssue {
            kind: MISSING_REQUIRED_FIELD.to_string(),
            field: Some("width".to_string()),
            message: "width is required".to_string(),
        }],
        raw_payload: json!({"specs": {"W (in.)": "30"}}),
        current_response: json!({"width": null, "brand": "GE"}),
        error_logs: Vec::new(),
    }
}

fn logic_fix(new_code: &str) -> ProposedFix {
    ProposedFix {
        fix_type: FixType::LogicChange,
        summary: "strip unit suffixes before mapping".to_string(),
        target_files: vec!["mappers/range.rs".into()],
        code_changes: vec![CodeChange::replace(
            "mappers/range.rs",
            "let header = raw;",
            new_code,
        )],
    }
}

fn consensus_fix(primary: ProposedFix) -> ConsensusFix {
    ConsensusFix {
        agreed: true,
        consensus_root_cause: CAUSE.to_string(),
        selected_fix: SelectedFix {
            primary,
            system_wide: Vec::new(),
        },
        combined_confidence: 85.0,
        primary_provider: Provider::A,
        advisories: Vec::new(),
    }
}

fn approve() -> Step<FixReview> {
    Step::Reply(FixReview {
        reviewer: Provider::A,
        approved: true,
        confidence: 0.9,
        checklist: ReviewChecklist {
            missing_fields_populated: true,
            values_accurate: true,
            no_new_errors: true,
            net_improvement: true,
        },
        concerns: Vec::new(),
        improvements: Vec::new(),
    })
}

fn reject(concern: &str) -> Step<FixReview> {
    Step::Reply(FixReview {
        reviewer: Provider::A,
        approved: false,
        confidence: 0.7,
        checklist: ReviewChecklist {
            missing_fields_populated: true,
            values_accurate: false,
            no_new_errors: true,
            net_improvement: true,
        },
        concerns: vec![concern.to_string()],
        improvements: vec!["trim whitespace too".to_string()],
    })
}

/// In-memory sources have no working directory, so check commands never run.
fn settings(max_attempts: u32) -> RemediationSettings {
    RemediationSettings {
        max_attempts,
        backfill_delay_ms: 0,
        allow_unchecked_edits: true,
        ..RemediationSettings::default()
    }
}

fn verifier(
    a: Arc<ScriptedValidator>,
    b: Arc<ScriptedValidator>,
    source: Arc<MemorySource>,
    max_attempts: u32,
) -> MultiAttemptVerifier {
    MultiAttemptVerifier::new(
        a,
        b,
        FixApplier::new(source.clone(), settings(max_attempts)),
        Arc::new(SourceReprocessor { source }),
    )
}

#[tokio::test]
async fn split_review_rolls_back_and_refines_with_the_rejecting_concerns() {
    let source = source();
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_review_fix(approve())
            .on_refine_fix(Step::Reply(logic_fix("let header = strip(raw).trim();"))),
    );
    let b = Arc::new(
        ScriptedValidator::new(Provider::B)
            .on_review_fix(reject("width keeps a trailing space"))
            .on_review_fix(approve()),
    );
    let issue = detect_issue(&job()).unwrap();
    let result = verifier(a.clone(), b.clone(), source.clone(), 3)
        .verify_with_retry(
            &consensus_fix(logic_fix("let header = strip(raw);")),
            &job(),
            &issue,
        )
        .await;

    assert!(result.success);
    assert!(!result.escalate_to_human);
    assert_eq!(result.total_attempts, 2);
    assert!(!result.attempts[0].both_approved);
    assert!(result.attempts[0].fix_applied);
    assert!(result.attempts[1].both_approved);
    assert_eq!(result.approved_attempt().unwrap().attempt_number, 2);

    let feedback = a.refine_feedback();
    assert_eq!(feedback.len(), 1);
    assert!(feedback[0]
        .concerns
        .contains(&"width keeps a trailing space".to_string()));
    assert!(feedback[0]
        .suggestions
        .contains(&"trim whitespace too".to_string()));
    assert!(b.refine_feedback().is_empty());

    // The second attempt started from the original file, not from attempt one's edit.
    assert_eq!(
        source.get("mappers/range.rs").unwrap(),
        MAPPER.replace("let header = raw;", "let header = strip(raw).trim();")
    );
    assert_eq!(result.final_response.unwrap()["width"], json!("30"));
}

#[tokio::test]
async fn exhausted_attempts_escalate_with_every_file_restored() {
    let source = source();
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_review_fix(reject("does not handle cm headers"))
            .on_refine_fix(Step::Reply(logic_fix("let header = strip(raw);"))),
    );
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_review_fix(approve()));
    let issue = detect_issue(&job()).unwrap();
    let result = verifier(a.clone(), b, source.clone(), 3)
        .verify_with_retry(
            &consensus_fix(logic_fix("let header = strip(raw);")),
            &job(),
            &issue,
        )
        .await;

    assert!(!result.success);
    assert!(result.escalate_to_human);
    assert_eq!(result.total_attempts, 3);
    assert!(result.attempts.iter().all(|a| !a.both_approved));
    assert_eq!(a.refine_feedback().len(), 2);
    assert_eq!(source.get("mappers/range.rs").as_deref(), Some(MAPPER));
}

#[tokio::test]
async fn approval_is_withheld_while_a_field_is_still_missing() {
    let source = source();
    let a = Arc::new(ScriptedValidator::new(Provider::A).on_review_fix(approve()));
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_review_fix(approve()));
    let issue = detect_issue(&job()).unwrap();
    let result = verifier(a, b, source.clone(), 1)
        .verify_with_retry(
            &consensus_fix(logic_fix("let header = raw.trim();")),
            &job(),
            &issue,
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.total_attempts, 1);
    assert_eq!(result.attempts[0].still_missing, vec!["width".to_string()]);
    assert!(result.attempts[0]
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("still missing: width"));
    assert_eq!(source.get("mappers/range.rs").as_deref(), Some(MAPPER));
}

#[tokio::test]
async fn data_only_refinement_stops_early() {
    let source = source();
    let alias_only = ProposedFix {
        fix_type: FixType::AliasAddition,
        summary: "alias W (in.)".to_string(),
        target_files: vec!["config/aliases.json".into()],
        code_changes: vec![CodeChange::insert(
            "config/aliases.json",
            ContainerInsert {
                pointer: String::new(),
                key: Some("W (in.)".to_string()),
                value: json!("width"),
            },
        )],
    };
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_review_fix(reject("wrong place"))
            .on_refine_fix(Step::Reply(alias_only)),
    );
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_review_fix(approve()));
    let issue = detect_issue(&job()).unwrap();
    let result = verifier(a, b, source, 3)
        .verify_with_retry(
            &consensus_fix(logic_fix("let header = strip(raw);")),
            &job(),
            &issue,
        )
        .await;

    assert!(result.escalate_to_human);
    assert_eq!(result.total_attempts, 1);
    assert!(result.attempts[0]
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("data-only"));
}

#[tokio::test]
async fn failed_apply_consumes_an_attempt_and_skips_review() {
    let source = source();
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_review_fix(approve())
            .on_refine_fix(Step::Reply(logic_fix("let header = strip(raw);"))),
    );
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_review_fix(approve()));
    let mut stale = logic_fix("let header = strip(raw);");
    stale.code_changes[0].old_code = Some("let header = raw.clone();".to_string());
    let issue = detect_issue(&job()).unwrap();
    let result = verifier(a.clone(), b, source, 3)
        .verify_with_retry(&consensus_fix(stale), &job(), &issue)
        .await;

    assert!(result.success);
    assert_eq!(result.total_attempts, 2);
    assert!(!result.attempts[0].fix_applied);
    assert!(result.attempts[0].review_a.is_none());
    assert_eq!(a.review_requests().len(), 1);
    assert!(a.refine_feedback()[0].concerns[0].contains("not found verbatim"));
}

#[tokio::test]
async fn hanging_reviewer_counts_as_rejection() {
    let source = source();
    let a = Arc::new(ScriptedValidator::new(Provider::A).on_review_fix(approve()));
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_review_fix(Step::Hang));
    let verifier = MultiAttemptVerifier::new(
        a,
        b,
        FixApplier::new(
            source.clone(),
            RemediationSettings {
                max_attempts: 1,
                review_timeout_ms: 100,
                allow_unchecked_edits: true,
                ..RemediationSettings::default()
            },
        ),
        Arc::new(SourceReprocessor {
            source: source.clone(),
        }),
    );
    let issue = detect_issue(&job()).unwrap();
    let result = verifier
        .verify_with_retry(
            &consensus_fix(logic_fix("let header = strip(raw);")),
            &job(),
            &issue,
        )
        .await;

    assert!(!result.success);
    let review_b = result.attempts[0].review_b.as_ref().unwrap();
    assert!(!review_b.approved);
    assert!(review_b.concerns[0].contains("timed out"));
    assert_eq!(source.get("mappers/range.rs").as_deref(), Some(MAPPER));
}

#[tokio::test]
async fn unrestorable_rejection_stops_the_retry_loop() {
    let source = source();
    source.fail_copies_to("mappers/range.rs");
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_review_fix(approve())
            .on_refine_fix(Step::Reply(logic_fix("let header = strip(raw).trim();"))),
    );
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_review_fix(reject("wrong unit")));
    let issue = detect_issue(&job()).unwrap();
    let result = verifier(a.clone(), b, source.clone(), 3)
        .verify_with_retry(
            &consensus_fix(logic_fix("let header = strip(raw);")),
            &job(),
            &issue,
        )
        .await;

    assert!(!result.success);
    assert!(result.escalate_to_human);
    assert_eq!(result.total_attempts, 1);
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.rollback_errors.len(), 1);
    assert!(result.rollback_errors[0].starts_with("restore mappers/range.rs"));
    let reason = result.attempts[0].failure_reason.as_deref().unwrap();
    assert!(reason.contains("wrong unit"), "{}", reason);
    assert!(reason.contains("rollback failed"), "{}", reason);
    assert!(a.refine_feedback().is_empty());
    assert!(source.get("mappers/range.rs").unwrap().contains("strip(raw)"));
}

#[tokio::test]
async fn unchecked_logic_edit_is_rolled_back_inside_the_attempt() {
    let source = source();
    let a = Arc::new(ScriptedValidator::new(Provider::A).on_review_fix(approve()));
    let b = Arc::new(ScriptedValidator::new(Provider::B).on_review_fix(approve()));
    let verifier = MultiAttemptVerifier::new(
        a.clone(),
        b,
        FixApplier::new(
            source.clone(),
            RemediationSettings {
                max_attempts: 1,
                ..RemediationSettings::default()
            },
        ),
        Arc::new(SourceReprocessor {
            source: source.clone(),
        }),
    );
    let issue = detect_issue(&job()).unwrap();
    let result = verifier
        .verify_with_retry(
            &consensus_fix(logic_fix("let header = strip(raw);")),
            &job(),
            &issue,
        )
        .await;

    assert!(!result.success);
    assert!(result.rollback_errors.is_empty());
    let attempt = &result.attempts[0];
    assert!(!attempt.fix_applied);
    assert!(attempt.review_a.is_none());
    let reason = attempt.failure_reason.as_deref().unwrap();
    assert!(reason.starts_with("fix could not be applied"), "{}", reason);
    assert!(
        reason.contains("no static or regression check ran for mappers/range.rs"),
        "{}",
        reason
    );
    assert!(a.review_requests().is_empty());
    assert_eq!(source.get("mappers/range.rs").as_deref(), Some(MAPPER));
}

fn diagnosis(confidence: f64) -> Step<Diagnosis> {
    Step::Reply(Diagnosis {
        provider: Provider::A,
        root_cause: CAUSE.to_string(),
        evidence: vec!["raw payload carries W (in.)".to_string()],
        proposed_fix: logic_fix("let header = strip(raw);"),
        system_scan_recommendations: Vec::new(),
        confidence,
        risk_level: RiskLevel::Low,
        reasoning_chain: Vec::new(),
    })
}

fn agree() -> Step<DiagnosisReview> {
    Step::Reply(DiagnosisReview {
        reviewer: Provider::A,
        agrees: true,
        concerns: Vec::new(),
        suggestions: Vec::new(),
        confidence: 0.9,
    })
}

fn orchestrator(
    a: Arc<ScriptedValidator>,
    b: Arc<ScriptedValidator>,
    source: Arc<MemorySource>,
    sink: Arc<RecordingSink>,
    audit: Arc<MemoryAudit>,
) -> RemediationOrchestrator {
    RemediationOrchestrator::new(
        DualDiagnosisEngine::new(
            a.clone(),
            b.clone(),
            source.clone(),
            DiagnosisSettings::default(),
        ),
        verifier(a, b, source, 3),
        sink,
        audit,
    )
}

fn memory_audit() -> Arc<MemoryAudit> {
    Arc::new(MemoryAudit(Mutex::new(Vec::new())))
}

#[tokio::test]
async fn job_without_issues_is_a_clean_no_op() {
    let source = source();
    let audit = memory_audit();
    let sink = Arc::new(RecordingSink::new());
    let a = Arc::new(ScriptedValidator::new(Provider::A));
    let b = Arc::new(ScriptedValidator::new(Provider::B));
    let mut quiet = job();
    quiet.issues.clear();

    let report = orchestrator(a.clone(), b, source, sink.clone(), audit.clone())
        .remediate(&quiet)
        .await;

    assert_eq!(report.outcome, RemediationOutcome::NoIssue);
    assert_eq!(report.final_state, RemediationState::Done);
    assert_eq!(report.transitions.len(), 2);
    assert!(a.requests().is_empty());
    assert!(sink.delivered().is_empty());
    assert_eq!(audit.0.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn agreed_fix_is_verified_and_the_correction_delivered() {
    let source = source();
    let audit = memory_audit();
    let sink = Arc::new(RecordingSink::new());
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_diagnose(diagnosis(88.0))
            .on_review_diagnosis(agree())
            .on_review_fix(approve()),
    );
    let b = Arc::new(
        ScriptedValidator::new(Provider::B)
            .on_diagnose(diagnosis(80.0))
            .on_review_diagnosis(agree())
            .on_review_fix(approve()),
    );

    let report = orchestrator(a, b, source.clone(), sink.clone(), audit.clone())
        .remediate(&job())
        .await;

    assert_eq!(report.outcome, RemediationOutcome::Corrected, "{:?}", report.escalation_reason);
    let states: Vec<RemediationState> = report.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            RemediationState::DetectIssue,
            RemediationState::DualDiagnosis,
            RemediationState::MultiAttemptVerify,
            RemediationState::SendCorrection,
            RemediationState::Done,
        ]
    );
    let last = report.transitions.last().unwrap();
    assert_eq!(last.root_cause.as_deref(), Some(CAUSE));
    assert_eq!(last.confidence, Some(84.0));
    assert_eq!(last.attempt_count, 1);

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    let change = &delivered[0].changes["width"];
    assert_eq!(change.old, Value::Null);
    assert_eq!(change.new, json!("30"));
    assert_eq!(change.verified_by, vec![Provider::A, Provider::B]);
    assert!(!delivered[0].changes.contains_key("brand"));
    assert_eq!(delivered[0].provenance.attempt_number, 1);
    assert_eq!(delivered[0].provenance.approvals.len(), 2);

    assert!(source.get("mappers/range.rs").unwrap().contains("strip(raw)"));
    assert_eq!(audit.0.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn diagnosis_disagreement_escalates_without_touching_files() {
    let source = source();
    let sink = Arc::new(RecordingSink::new());
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_diagnose(diagnosis(60.0))
            .on_review_diagnosis(agree()),
    );
    let b = Arc::new(
        ScriptedValidator::new(Provider::B)
            .on_diagnose(diagnosis(90.0))
            .on_review_diagnosis(agree()),
    );

    let report = orchestrator(a.clone(), b, source.clone(), sink.clone(), memory_audit())
        .remediate(&job())
        .await;

    assert!(report.escalated());
    assert_eq!(report.final_state, RemediationState::Escalate);
    assert!(report
        .escalation_reason
        .as_deref()
        .unwrap()
        .contains("diagnosis consensus gate failed"));
    assert!(report.verification.is_none());
    assert!(a.review_requests().is_empty());
    assert_eq!(source.get("mappers/range.rs").as_deref(), Some(MAPPER));
    assert!(sink.delivered().is_empty());
}

#[tokio::test]
async fn sink_failure_escalates() {
    let source = source();
    let sink = Arc::new(RecordingSink::failing("crm returned 503"));
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_diagnose(diagnosis(88.0))
            .on_review_diagnosis(agree())
            .on_review_fix(approve()),
    );
    let b = Arc::new(
        ScriptedValidator::new(Provider::B)
            .on_diagnose(diagnosis(80.0))
            .on_review_diagnosis(agree())
            .on_review_fix(approve()),
    );

    let report = orchestrator(a, b, source, sink, memory_audit())
        .remediate(&job())
        .await;

    assert!(report.escalated());
    assert!(report.correction.is_some());
    assert!(report
        .escalation_reason
        .as_deref()
        .unwrap()
        .contains("crm returned 503"));
}

#[tokio::test]
async fn backfill_finishes_each_job_in_order() {
    let source = source();
    let sink = Arc::new(RecordingSink::new());
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_diagnose(diagnosis(88.0))
            .on_review_diagnosis(agree())
            .on_review_fix(approve()),
    );
    let b = Arc::new(
        ScriptedValidator::new(Provider::B)
            .on_diagnose(diagnosis(80.0))
            .on_review_diagnosis(agree())
            .on_review_fix(approve()),
    );
    let mut quiet = job();
    quiet.job_id = "job-8".to_string();
    quiet.issues.clear();

    let reports = orchestrator(a, b, source, sink, memory_audit())
        .backfill(&[quiet, job()])
        .await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].job_id, "job-8");
    assert_eq!(reports[0].outcome, RemediationOutcome::NoIssue);
    assert_eq!(reports[1].outcome, RemediationOutcome::Corrected);
}

#[tokio::test]
async fn rollback_failure_escalates_with_the_unrestored_file() {
    let source = source();
    source.fail_copies_to("mappers/range.rs");
    let sink = Arc::new(RecordingSink::new());
    let a = Arc::new(
        ScriptedValidator::new(Provider::A)
            .on_diagnose(diagnosis(88.0))
            .on_review_diagnosis(agree())
            .on_review_fix(approve()),
    );
    let b = Arc::new(
        ScriptedValidator::new(Provider::B)
            .on_diagnose(diagnosis(80.0))
            .on_review_diagnosis(agree())
            .on_review_fix(reject("width is off by one")),
    );

    let report = orchestrator(a, b, source, sink.clone(), memory_audit())
        .remediate(&job())
        .await;

    assert!(report.escalated());
    let reason = report.escalation_reason.as_deref().unwrap();
    assert!(reason.starts_with("rollback left sources modified"), "{}", reason);
    assert!(reason.contains("mappers/range.rs"), "{}", reason);
    assert_eq!(report.verification.as_ref().unwrap().total_attempts, 1);
    assert!(sink.delivered().is_empty());
}

#[tokio::test]
async fn issue_entries_without_a_field_escalate_as_malformed() {
    let source = source();
    let a = Arc::new(ScriptedValidator::new(Provider::A));
    let b = Arc::new(ScriptedValidator::new(Provider::B));
    let mut record = job();
    record.issues[0].field = None;

    let report = orchestrator(a.clone(), b, source, Arc::new(RecordingSink::new()), memory_audit())
        .remediate(&record)
        .await;

    assert!(report.escalated());
    assert!(report
        .escalation_reason
        .as_deref()
        .unwrap()
        .contains("malformed issue"));
    assert!(report.issue.unwrap().missing_fields.is_empty());
    assert!(report.diagnosis.is_none());
    assert!(a.requests().is_empty());
}

#[test]
fn severity_follows_missing_count_and_error_logs() {
    assert_eq!(classify_severity(1, false), Severity::Low);
    assert_eq!(classify_severity(3, false), Severity::Medium);
    assert_eq!(classify_severity(4, false), Severity::High);
    assert_eq!(classify_severity(2, true), Severity::High);
    assert_eq!(classify_severity(5, true), Severity::Critical);
}

#[test]
fn detection_collects_distinct_missing_fields() {
    let mut record = job();
    record.issues.push(TrackedIssue {
        kind: MISSING_REQUIRED_FIELD.to_string(),
        field: Some("width".to_string()),
        message: "duplicate".to_string(),
    });
    record.issues.push(TrackedIssue {
        kind: MISSING_REQUIRED_FIELD.to_string(),
        field: None,
        message: "a required field is missing".to_string(),
    });
    record.issues.push(TrackedIssue {
        kind: "low_confidence".to_string(),
        field: Some("brand".to_string()),
        message: String::new(),
    });
    record.error_logs.push("mapper warning".to_string());
    let issue = detect_issue(&record).unwrap();
    assert_eq!(issue.missing_fields, vec!["width".to_string()]);
    assert_eq!(issue.severity, Severity::Medium);
}

#[test]
fn response_fields_resolve_keys_paths_and_pointers() {
    let response = json!({"width": "30", "dims": {"depth": 24}, "a.b": 1});
    assert_eq!(response_field(&response, "width"), Some(&json!("30")));
    assert_eq!(response_field(&response, "dims.depth"), Some(&json!(24)));
    assert_eq!(response_field(&response, "/dims/depth"), Some(&json!(24)));
    assert_eq!(response_field(&response, "a.b"), Some(&json!(1)));
    assert_eq!(response_field(&response, "height"), None);
    assert_eq!(
        still_missing(&["width".to_string(), "height".to_string()], &response),
        vec!["height".to_string()]
    );
}
