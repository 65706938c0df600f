//! Re-runs a job through the product pipeline as an external process.
//!
//! Each call spawns a fresh process, so no pipeline state survives between attempts
//! and edited business-logic files are picked up on the next run.

use crate::config::ReprocessConfig;
use crate::util::run_capturing_stdout;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use concord_core::{JobRecord, Reprocessor};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

pub struct CommandReprocessor {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    timeout: Duration,
}

impl CommandReprocessor {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        cwd: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            timeout,
        }
    }

    pub fn from_config(
        config: &ReprocessConfig,
        cwd: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Option<Self> {
        let program = config.command.clone()?;
        Some(Self::new(program, config.args.clone(), cwd, timeout))
    }
}

#[async_trait]
impl Reprocessor for CommandReprocessor {
    async fn reprocess(&self, job: &JobRecord) -> Result<Value> {
        let payload_path = std::env::temp_dir().join(format!(
            "concord-reprocess-{}.json",
            uuid::Uuid::new_v4()
        ));
        let body = serde_json::to_string(&job.raw_payload)?;
        tokio::fs::write(&payload_path, body)
            .await
            .with_context(|| format!("Failed to write {}", payload_path.display()))?;

        let mut args = self.args.clone();
        args.push(payload_path.display().to_string());
        let result = run_capturing_stdout(&self.program, &args, &self.cwd, self.timeout).await;
        let _ = tokio::fs::remove_file(&payload_path).await;

        let (outcome, stdout) = result?;
        if outcome.timed_out {
            return Err(anyhow!(
                "reprocessing job {} timed out after {}ms",
                job.job_id,
                outcome.duration_ms
            ));
        }
        if !outcome.success {
            return Err(anyhow!(
                "reprocessing job {} failed: {}",
                job.job_id,
                outcome.summary()
            ));
        }
        serde_json::from_str(stdout.trim())
            .with_context(|| format!("reprocessing job {} printed invalid JSON", job.job_id))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> JobRecord {
        JobRecord {
            job_id: "job-7".to_string(),
            issues: Vec::new(),
            raw_payload: json!({"title": "Oak desk 120cm"}),
            current_response: json!({}),
            error_logs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn payload_file_is_passed_and_stdout_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let reprocessor = CommandReprocessor::new(
            "sh",
            vec!["-c".to_string(), "cat \"$0\"".to_string()],
            dir.path(),
            Duration::from_secs(10),
        );
        let response = reprocessor.reprocess(&job()).await.unwrap();
        assert_eq!(response, json!({"title": "Oak desk 120cm"}));
    }

    #[tokio::test]
    async fn failing_pipeline_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let reprocessor = CommandReprocessor::new(
            "sh",
            vec!["-c".to_string(), "echo boom >&2; exit 1".to_string()],
            dir.path(),
            Duration::from_secs(10),
        );
        let err = reprocessor.reprocess(&job()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn unconfigured_command_yields_none() {
        assert!(CommandReprocessor::from_config(
            &ReprocessConfig::default(),
            ".",
            Duration::from_secs(1)
        )
        .is_none());
    }
}
