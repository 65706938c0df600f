//! Consensus and remediation protocol for Concord.
//!
//! Two independent validators are consulted for every decision: field values in
//! the product loop, root causes in diagnosis, and applied fixes in the verifier.

pub mod apply;
pub mod diagnosis;
pub mod field_consensus;
pub mod matcher;
pub mod product_loop;
pub mod remediation;
pub mod testing;

pub use apply::{BackupManager, BackupSet, FixApplier};
pub use diagnosis::{DiagnosisReport, DualDiagnosisEngine};
pub use field_consensus::{reconcile_field, FieldPolicy};
pub use matcher::matches;
pub use product_loop::ProductConsensusLoop;
pub use remediation::{
    MultiAttemptVerifier, RemediationOrchestrator, RemediationOutcome, RemediationReport,
    RemediationState, TransitionRecord,
};
pub use testing::{ReplayScript, ScriptedValidator, Step};
