//! Configuration management for concord
//!
//! Reads `config.toml` from `--config`, `$CONCORD_CONFIG`, or `~/.config/concord/`.

use concord_core::settings::{ConsensusSettings, DiagnosisSettings, RemediationSettings};
use concord_core::ConcordError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "CONCORD_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorEndpoint {
    #[serde(default)]
    pub name: String,
    /// Validator gateway URL; required unless running from a replay script.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl ValidatorEndpoint {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: None,
            api_key_env: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorsConfig {
    #[serde(default = "default_validator_a")]
    pub a: ValidatorEndpoint,
    #[serde(default = "default_validator_b")]
    pub b: ValidatorEndpoint,
}

impl Default for ValidatorsConfig {
    fn default() -> Self {
        Self {
            a: default_validator_a(),
            b: default_validator_b(),
        }
    }
}

fn default_validator_a() -> ValidatorEndpoint {
    ValidatorEndpoint::named("validator-a")
}

fn default_validator_b() -> ValidatorEndpoint {
    ValidatorEndpoint::named("validator-b")
}

fn default_http_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            api_key_env: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReprocessConfig {
    /// Program that runs the product pipeline on a payload file and prints JSON.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the business-logic files the remediation loop may edit.
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
    /// Where audit logs are written.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Fields every product must carry.
    #[serde(default)]
    pub target_fields: Vec<String>,
    #[serde(default)]
    pub consensus: ConsensusSettings,
    #[serde(default)]
    pub diagnosis: DiagnosisSettings,
    #[serde(default)]
    pub remediation: RemediationSettings,
    #[serde(default)]
    pub validators: ValidatorsConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub reprocess: ReprocessConfig,
}

fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".concord")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            state_dir: default_state_dir(),
            target_fields: Vec::new(),
            consensus: ConsensusSettings::default(),
            diagnosis: DiagnosisSettings::default(),
            remediation: RemediationSettings::default(),
            validators: ValidatorsConfig::default(),
            sink: SinkConfig::default(),
            reprocess: ReprocessConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("concord"))
    }

    /// Get the implicit config file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path (argument or `$CONCORD_CONFIG`) must exist and parse. The
    /// implicit path falls back to defaults when missing, and a corrupt implicit file
    /// is preserved as `config.toml.corrupt` before defaults load.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let config = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::load_from(&path)?,
            None => Self::load_implicit(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn load_implicit() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        let Ok(content) = fs::read_to_string(&path) else {
            return Self::default();
        };
        match Self::parse(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(&path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConcordError> {
        self.consensus.validate()?;
        self.diagnosis.validate()?;
        self.remediation.validate()?;
        for endpoint in [&self.validators.a, &self.validators.b] {
            if let Some(url) = endpoint.endpoint.as_deref() {
                check_http_url(&format!("validators.{}.endpoint", endpoint.name), url)?;
            }
        }
        if let Some(url) = self.sink.webhook_url.as_deref() {
            check_http_url("sink.webhook_url", url)?;
        }
        Ok(())
    }

    /// Audit directory under the state dir.
    pub fn audit_dir(&self) -> PathBuf {
        self.state_dir.join("audit")
    }
}

fn check_http_url(name: &str, raw: &str) -> Result<(), ConcordError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ConcordError::Config(format!("{} is not a valid URL: {}", name, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConcordError::Config(format!(
            "{} must use http or https, got {}",
            name, other
        ))),
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
target_fields = ["brand", "width"]

[consensus]
max_retries = 3
confidence_margin = 0.2

[remediation]
max_attempts = 5

[validators.a]
name = "alpha"
endpoint = "https://validators.internal/alpha"
api_key_env = "ALPHA_KEY"
"#,
        )
        .unwrap();
        assert_eq!(config.target_fields, vec!["brand", "width"]);
        assert_eq!(config.consensus.max_retries, 3);
        assert_eq!(config.consensus.agreement_threshold, 0.8);
        assert_eq!(config.remediation.max_attempts, 5);
        assert_eq!(config.validators.a.name, "alpha");
        assert_eq!(config.validators.b.name, "validator-b");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_http_webhook_is_rejected() {
        let config = Config::parse(
            r#"
[sink]
webhook_url = "ftp://crm.example.com/hook"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_path_must_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[consensus\nbroken").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn corrupt_config_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not = [valid").unwrap();
        preserve_corrupt_config(&path, "not = [valid");
        assert!(!path.exists());
        assert!(dir.path().join("config.toml.corrupt").exists());
    }
}
