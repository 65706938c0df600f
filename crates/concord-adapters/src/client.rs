//! HTTP validator client.
//!
//! Each validator sits behind a gateway that accepts an operation envelope and answers
//! with JSON. Replies are salvaged from markdown fences or chatty wrappers, and the
//! identity field is always overwritten with the provider this client speaks for.

use crate::config::ValidatorEndpoint;
use crate::util::truncate;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use concord_core::{
    clamp_unit, AttemptFeedback, ConsensusFix, DiagnosedIssue, Diagnosis, DiagnosisContext,
    DiagnosisReview, FixReview, FixReviewRequest, ProductRecord, ProposedFix, Provider,
    RetryContext, ValidationResult, Validator,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

const MAX_ERROR_BODY_LEN: usize = 400;
const CREDENTIAL_MARKERS: [&str; 5] = ["api_key", "apikey", "authorization", "bearer", "secret"];

/// Error bodies end up in logs and audit rows; anything mentioning credentials is withheld.
pub(crate) fn redact_body(body: &str) -> String {
    let lower = body.to_lowercase();
    if CREDENTIAL_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return "(body withheld: mentions credentials)".to_string();
    }
    truncate(body.trim(), MAX_ERROR_BODY_LEN)
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .context("Failed to create HTTP client")
}

/// Body of the first ```` ``` ```` block, wherever it sits in the reply.
fn fenced_body(reply: &str) -> Option<&str> {
    let open = reply.find("```")?;
    let after_open = &reply[open + 3..];
    let body = &after_open[after_open.find('\n')? + 1..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// Outermost `{...}` and `[...]` spans of `text`. Quotes only count inside a span,
/// so apostrophes in surrounding prose do not hide the JSON.
fn top_level_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut closers: Vec<char> = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            match (escaped, ch) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if !closers.is_empty() => in_string = true,
            '{' | '[' => {
                if closers.is_empty() {
                    start = idx;
                }
                closers.push(if ch == '{' { '}' } else { ']' });
            }
            '}' | ']' if !closers.is_empty() => {
                if closers.pop() != Some(ch) {
                    closers.clear();
                } else if closers.is_empty() {
                    spans.push(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }
    spans
}

/// Parse a validator reply: the whole text first, then a fenced block, then any
/// JSON span embedded in prose.
pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let mut tried: Vec<&str> = Vec::new();
    let mut last_err = None;
    let fenced = fenced_body(reply);
    let candidates = std::iter::once(reply.trim())
        .chain(fenced)
        .chain(top_level_spans(reply));
    for candidate in candidates {
        if candidate.is_empty() || tried.contains(&candidate) {
            continue;
        }
        tried.push(candidate);
        match serde_json::from_str::<T>(candidate) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => last_err = Some(err),
        }
    }
    match last_err {
        Some(err) => Err(anyhow!(
            "validator reply is not usable JSON ({}): {}",
            err,
            redact_body(reply)
        )),
        None => Err(anyhow!("validator reply is empty")),
    }
}

/// How often and how patiently a gateway call is retried.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry `n` (1-based), doubling from the base delay.
    fn delay(&self, n: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << n.saturating_sub(1).min(10))
    }
}

/// Why one POST did not produce a body.
#[derive(Debug)]
enum PostFailure {
    Retryable { message: String, hint: Option<Duration> },
    Fatal(String),
}

impl PostFailure {
    fn network(err: reqwest::Error) -> Self {
        let message = format!("network error: {}", err);
        if err.is_timeout() || err.is_connect() {
            PostFailure::Retryable { message, hint: None }
        } else {
            PostFailure::Fatal(message)
        }
    }

    fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            429 => PostFailure::Retryable {
                message: "rate limited".to_string(),
                hint: retry_hint(body),
            },
            500..=599 => PostFailure::Retryable {
                message: format!("server error ({})", status),
                hint: None,
            },
            401 | 403 => PostFailure::Fatal("credentials rejected".to_string()),
            _ => PostFailure::Fatal(format!("error {}: {}", status, redact_body(body))),
        }
    }

    fn message(&self) -> &str {
        match self {
            PostFailure::Retryable { message, .. } | PostFailure::Fatal(message) => message,
        }
    }
}

/// Seconds named after "retry after", "retry-after" or "try again in", when plausible.
fn retry_hint(body: &str) -> Option<Duration> {
    let lower = body.to_lowercase();
    let tail = ["retry after", "retry-after", "try again in"]
        .iter()
        .find_map(|phrase| lower.find(phrase).map(|i| &lower[i + phrase.len()..]))?;
    let window: String = tail.chars().take(24).collect();
    let digits: String = window
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    let secs: u64 = digits.parse().ok()?;
    (1..300).contains(&secs).then(|| Duration::from_secs(secs))
}

async fn post_once(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
) -> std::result::Result<String, PostFailure> {
    let mut request = client.post(url).json(body);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    let response = request.send().await.map_err(PostFailure::network)?;
    let status = response.status();
    let text = response.text().await.map_err(PostFailure::network)?;
    if status.is_success() {
        Ok(text)
    } else {
        Err(PostFailure::from_status(status, &text))
    }
}

/// POST `body` until it succeeds, a failure is fatal, or the policy runs out.
pub(crate) async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
    policy: RetryPolicy,
) -> Result<String> {
    let mut retries = 0;
    loop {
        let failure = match post_once(client, url, api_key, body).await {
            Ok(text) => return Ok(text),
            Err(failure) => failure,
        };
        let wait = match &failure {
            PostFailure::Retryable { hint, .. } if retries < policy.max_retries => {
                hint.unwrap_or_else(|| policy.delay(retries + 1))
            }
            _ => {
                return Err(anyhow!(
                    "{}: {} (after {} retries)",
                    url,
                    failure.message(),
                    retries
                ))
            }
        };
        retries += 1;
        tracing::debug!(url, retry = retries, wait_ms = wait.as_millis() as u64, reason = failure.message(), "retrying validator call");
        tokio::time::sleep(wait).await;
    }
}

/// A validator reached over HTTP.
pub struct HttpValidator {
    provider: Provider,
    name: String,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpValidator {
    pub fn from_config(provider: Provider, config: &ValidatorEndpoint) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .with_context(|| format!("validator '{}' has no endpoint configured", config.name))?;
        Ok(Self {
            provider,
            name: config.name.clone(),
            endpoint,
            api_key: config.api_key(),
            client: http_client(config.timeout_secs)?,
            retry: RetryPolicy::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        payload: Value,
        identity_key: Option<&str>,
    ) -> Result<T> {
        let body = json!({
            "operation": operation,
            "provider": self.provider,
            "validator": self.name,
            "payload": payload,
        });
        let text = post_with_retry(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &body,
            self.retry,
        )
        .await
            .with_context(|| format!("{} {} call failed", self.name, operation))?;
        let reply: Value = parse_reply(&text)?;
        let mut reply = unwrap_result_envelope(reply);
        if let (Some(key), Some(obj)) = (identity_key, reply.as_object_mut()) {
            obj.insert(key.to_string(), json!(self.provider));
        }
        serde_json::from_value(reply)
            .with_context(|| format!("{} returned a malformed {} reply", self.name, operation))
    }
}

/// Gateways may answer `{"result": {...}}`; the bare object is accepted too.
fn unwrap_result_envelope(reply: Value) -> Value {
    match reply {
        Value::Object(mut obj) if obj.len() == 1 && obj.contains_key("result") => {
            obj.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[async_trait]
impl Validator for HttpValidator {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn validate(
        &self,
        record: &ProductRecord,
        target_fields: &[String],
        retry: Option<&RetryContext>,
    ) -> Result<ValidationResult> {
        let payload = json!({
            "product": record,
            "target_fields": target_fields,
            "retry_context": retry,
        });
        let mut result: ValidationResult = self.call("validate", payload, Some("provider")).await?;
        for reading in result.fields.values_mut() {
            reading.confidence = clamp_unit(reading.confidence);
        }
        Ok(result)
    }

    async fn review_fix(&self, request: &FixReviewRequest) -> Result<FixReview> {
        let mut review: FixReview = self
            .call("review_fix", json!(request), Some("reviewer"))
            .await?;
        review.confidence = clamp_unit(review.confidence);
        Ok(review)
    }

    async fn diagnose(&self, issue: &DiagnosedIssue, context: &DiagnosisContext) -> Result<Diagnosis> {
        let payload = json!({ "issue": issue, "context": context });
        let mut diagnosis: Diagnosis = self.call("diagnose", payload, Some("provider")).await?;
        diagnosis.confidence = diagnosis.confidence.clamp(0.0, 100.0);
        Ok(diagnosis)
    }

    async fn review_diagnosis(
        &self,
        other: &Diagnosis,
        issue: &DiagnosedIssue,
        context: &DiagnosisContext,
    ) -> Result<DiagnosisReview> {
        let payload = json!({ "diagnosis": other, "issue": issue, "context": context });
        self.call("review_diagnosis", payload, Some("reviewer")).await
    }

    async fn refine_fix(
        &self,
        fix: &ConsensusFix,
        feedback: &AttemptFeedback,
    ) -> Result<ProposedFix> {
        let payload = json!({ "fix": fix, "feedback": feedback });
        self.call("refine_fix", payload, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::FieldReading;

    #[test]
    fn fenced_reply_is_salvaged() {
        let content = "Verdict below.\n```json\n{\"provider\": \"B\", \"fields\": {\"width\": {\"value\": \"12\", \"confidence\": 0.9}}}\n```\nDone.";
        let parsed: ValidationResult = parse_reply(content).unwrap();
        assert_eq!(parsed.provider, Provider::B);
        assert_eq!(parsed.fields["width"], FieldReading::new("12", 0.9));
    }

    #[test]
    fn json_inside_prose_is_found() {
        let content = "I can't fully agree: {\"agrees\": true, \"reviewer\": \"A\", \"concerns\": [\"see }\"]} hope it helps";
        let parsed: DiagnosisReview = parse_reply(content).unwrap();
        assert!(parsed.agrees);
        assert_eq!(parsed.concerns, vec!["see }".to_string()]);
    }

    #[test]
    fn spans_skip_mismatched_brackets() {
        assert_eq!(top_level_spans("x {] y {\"a\": [1]} z"), vec!["{\"a\": [1]}"]);
    }

    #[test]
    fn unusable_replies_are_errors() {
        let err = parse_reply::<FixReview>("no json here").unwrap_err();
        assert!(err.to_string().contains("not usable JSON"));
        let err = parse_reply::<FixReview>("   ").unwrap_err();
        assert_eq!(err.to_string(), "validator reply is empty");
    }

    #[test]
    fn credentials_are_withheld_from_errors() {
        assert_eq!(
            redact_body("invalid Authorization header"),
            "(body withheld: mentions credentials)"
        );
        assert_eq!(redact_body("  bad field\n"), "bad field");
    }

    #[test]
    fn retry_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
    }

    #[test]
    fn retry_hint_is_read() {
        assert_eq!(retry_hint("Please retry after 12 seconds"), Some(Duration::from_secs(12)));
        assert_eq!(retry_hint("Retry-After: 3"), Some(Duration::from_secs(3)));
        assert_eq!(retry_hint("try again in 900s"), None);
        assert_eq!(retry_hint("slow down"), None);
    }

    #[test]
    fn statuses_split_into_retryable_and_fatal() {
        use reqwest::StatusCode;
        assert!(matches!(
            PostFailure::from_status(StatusCode::TOO_MANY_REQUESTS, "retry after 5"),
            PostFailure::Retryable { hint: Some(_), .. }
        ));
        assert!(matches!(
            PostFailure::from_status(StatusCode::BAD_GATEWAY, ""),
            PostFailure::Retryable { hint: None, .. }
        ));
        let fatal = PostFailure::from_status(StatusCode::BAD_REQUEST, "width must be a string");
        assert_eq!(fatal.message(), "error 400 Bad Request: width must be a string");
    }

    #[test]
    fn result_envelope_is_unwrapped() {
        let reply = json!({"result": {"agrees": false}});
        assert_eq!(unwrap_result_envelope(reply), json!({"agrees": false}));
        let bare = json!({"agrees": false, "reviewer": "A"});
        assert_eq!(unwrap_result_envelope(bare.clone()), bare);
    }

    #[test]
    fn endpoint_is_required() {
        let config = ValidatorEndpoint {
            name: "validator-a".to_string(),
            endpoint: None,
            api_key_env: None,
            timeout_secs: 5,
        };
        assert!(HttpValidator::from_config(Provider::A, &config).is_err());
    }
}
