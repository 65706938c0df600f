use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

const OUTPUT_TAIL_CHARS: usize = 1_800;

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Keep the last `max` characters, which is where compiler and test failures land.
pub fn tail(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    let count = trimmed.chars().count();
    if count <= max {
        return trimmed.to_string();
    }
    let skipped: String = trimmed.chars().skip(count - max).collect();
    format!("… (truncated)\n{}", skipped)
}

/// Result of one external command run with a deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command: String,
    pub success: bool,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

impl CommandOutcome {
    /// Combined tail of stderr and stdout, for reports.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.stderr_tail.is_empty() {
            parts.push(self.stderr_tail.as_str());
        }
        if !self.stdout_tail.is_empty() {
            parts.push(self.stdout_tail.as_str());
        }
        if self.timed_out {
            return format!("{} timed out after {}ms", self.command, self.duration_ms);
        }
        if parts.is_empty() {
            return format!("{} exited with {:?}", self.command, self.exit_code);
        }
        parts.join("\n")
    }
}

/// Run `program args…` in `cwd`, killing it when `timeout` elapses.
pub async fn run_command_with_timeout(
    program: &str,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> anyhow::Result<CommandOutcome> {
    run_capturing_stdout(program, args, cwd, timeout)
        .await
        .map(|(outcome, _)| outcome)
}

/// Like [`run_command_with_timeout`], also returning the untruncated stdout.
pub async fn run_capturing_stdout(
    program: &str,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> anyhow::Result<(CommandOutcome, String)> {
    let command_label = std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow::anyhow!("Failed to start `{}`: {}", command_label, e))?;

    let start = Instant::now();
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let outcome = CommandOutcome {
                command: command_label,
                success: output.status.success(),
                timed_out: false,
                exit_code: output.status.code(),
                duration_ms: start.elapsed().as_millis() as u64,
                stdout_tail: tail(&stdout, OUTPUT_TAIL_CHARS),
                stderr_tail: tail(&String::from_utf8_lossy(&output.stderr), OUTPUT_TAIL_CHARS),
            };
            Ok((outcome, stdout))
        }
        Ok(Err(e)) => Err(anyhow::anyhow!(
            "Failed to wait for `{}`: {}",
            command_label,
            e
        )),
        // Dropping the wait future drops the child, and kill_on_drop reaps it.
        Err(_) => Ok((
            CommandOutcome {
                command: command_label,
                success: false,
                timed_out: true,
                exit_code: None,
                duration_ms: start.elapsed().as_millis() as u64,
                stdout_tail: String::new(),
                stderr_tail: String::new(),
            },
            String::new(),
        )),
    }
}

/// Join a repository-relative path onto `root`, refusing absolute paths and `..`.
pub fn resolve_under_root(root: &Path, candidate: &Path) -> Result<PathBuf, String> {
    if candidate.as_os_str().is_empty() {
        return Err("Path is empty".to_string());
    }
    if candidate.is_absolute() {
        return Err(format!(
            "Absolute paths are not allowed: {}",
            candidate.display()
        ));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(format!(
            "Parent traversal is not allowed: {}",
            candidate.display()
        ));
    }
    Ok(root.join(candidate))
}

/// Reduce arbitrary text to `[A-Za-z0-9_-]` for use in file names.
pub fn sanitize_component(input: &str) -> String {
    let mut out = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    let trimmed = out.trim_matches('_').chars().take(96).collect::<String>();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}
