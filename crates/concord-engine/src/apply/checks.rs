//! Post-apply gate: structured data-file parsing plus configured commands.

use concord_adapters::util::{run_command_with_timeout, truncate, CommandOutcome};
use concord_core::settings::{CheckCommand, RemediationSettings};
use concord_core::SourceAccessor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MAX_DETAIL_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    /// The check could not run here; it neither passes nor blocks.
    #[default]
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub outcome: Option<CommandOutcome>,
}

impl CheckResult {
    fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Passed,
            detail: None,
            outcome: None,
        }
    }

    fn failed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Failed,
            detail: Some(detail.into()),
            outcome: None,
        }
    }

    /// One line for `ValidationGate` errors.
    pub fn describe(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}: {}", self.name, detail),
            None => self.name.clone(),
        }
    }
}

/// `.json` and `.toml` files, which [`check_data_files`] parses.
pub fn is_data_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json" | "toml")
    )
}

/// Parse every modified `.json` and `.toml` file.
pub fn check_data_files(source: &dyn SourceAccessor, files: &[PathBuf]) -> Vec<CheckResult> {
    files
        .iter()
        .filter_map(|path| {
            let ext = path.extension().and_then(|e| e.to_str())?;
            let name = format!("parse {}", path.display());
            let content = match source.read_file(path) {
                Ok(content) => content,
                Err(err) => return Some(CheckResult::failed(name, format!("{:#}", err))),
            };
            let parsed = match ext {
                "json" => serde_json::from_str::<serde_json::Value>(&content)
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                "toml" => content
                    .parse::<toml::Table>()
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                _ => return None,
            };
            Some(match parsed {
                Ok(()) => CheckResult::passed(name),
                Err(err) => CheckResult::failed(name, truncate(&err, MAX_DETAIL_CHARS)),
            })
        })
        .collect()
}

/// Run the static check commands, then the regression command, in `root`.
///
/// Without a working directory (an in-memory source) every configured command
/// reports `Unavailable`.
pub async fn run_check_commands(
    root: Option<&Path>,
    settings: &RemediationSettings,
) -> Vec<CheckResult> {
    let commands: Vec<&CheckCommand> = settings
        .static_check_commands
        .iter()
        .chain(settings.regression_command.as_ref())
        .collect();
    let mut results = Vec::with_capacity(commands.len());
    for command in commands {
        let Some(root) = root else {
            results.push(CheckResult {
                name: command.name.clone(),
                status: CheckStatus::Unavailable,
                detail: Some("no working directory for command checks".to_string()),
                outcome: None,
            });
            continue;
        };
        let result = match run_command_with_timeout(
            &command.program,
            &command.args,
            root,
            settings.check_timeout(),
        )
        .await
        {
            Ok(outcome) if outcome.success => CheckResult {
                name: command.name.clone(),
                status: CheckStatus::Passed,
                detail: None,
                outcome: Some(outcome),
            },
            Ok(outcome) => CheckResult {
                name: command.name.clone(),
                status: CheckStatus::Failed,
                detail: Some(truncate(&outcome.summary(), MAX_DETAIL_CHARS)),
                outcome: Some(outcome),
            },
            Err(err) => CheckResult::failed(command.name.clone(), format!("{:#}", err)),
        };
        tracing::debug!(check = %result.name, status = ?result.status, "post-apply check finished");
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::memory::MemorySource;

    #[test]
    fn malformed_json_fails_and_sources_are_skipped() {
        let source = MemorySource::new()
            .with_file("config/aliases.json", "{\"w\": ")
            .with_file("config/schema.toml", "[fields]\nwidth = \"number\"\n")
            .with_file("src/map.rs", "fn main() {}");
        let results = check_data_files(
            &source,
            &[
                PathBuf::from("config/aliases.json"),
                PathBuf::from("config/schema.toml"),
                PathBuf::from("src/map.rs"),
            ],
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, CheckStatus::Failed);
        assert_eq!(results[1].status, CheckStatus::Passed);
    }

    #[tokio::test]
    async fn commands_without_root_are_unavailable() {
        let settings = RemediationSettings {
            static_check_commands: vec![CheckCommand {
                name: "lint".to_string(),
                program: "true".to_string(),
                args: Vec::new(),
            }],
            ..RemediationSettings::default()
        };
        let results = run_check_commands(None, &settings).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, CheckStatus::Unavailable);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_regression_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let settings = RemediationSettings {
            static_check_commands: vec![CheckCommand {
                name: "lint".to_string(),
                program: "true".to_string(),
                args: Vec::new(),
            }],
            regression_command: Some(CheckCommand {
                name: "regression".to_string(),
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo broken >&2; exit 3".to_string()],
            }),
            ..RemediationSettings::default()
        };
        let results = run_check_commands(Some(dir.path()), &settings).await;
        assert_eq!(results[0].status, CheckStatus::Passed);
        assert_eq!(results[1].status, CheckStatus::Failed);
        assert!(results[1].describe().contains("broken"));
    }
}
