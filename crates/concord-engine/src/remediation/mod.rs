//! Self-healing remediation: attempt verification and the orchestrating state machine.

mod orchestrator;
mod verifier;

pub use orchestrator::{
    build_correction, classify_severity, detect_issue, RemediationOrchestrator,
    RemediationOutcome, RemediationReport, RemediationState, TransitionRecord,
};
pub use verifier::{still_missing, MultiAttemptVerifier};

use serde_json::Value;

/// Look a field up in a pipeline response: a JSON pointer when it starts with `/`,
/// otherwise a top-level key, otherwise a dotted path.
pub fn response_field<'a>(response: &'a Value, field: &str) -> Option<&'a Value> {
    if field.starts_with('/') {
        return response.pointer(field);
    }
    if let Some(value) = response.get(field) {
        return Some(value);
    }
    if !field.contains('.') {
        return None;
    }
    field
        .split('.')
        .try_fold(response, |node, segment| node.get(segment))
}

#[cfg(test)]
mod tests;
