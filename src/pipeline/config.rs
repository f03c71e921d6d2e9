//! Configuration for the deploy pipeline.
//!
//! Configuration is an explicit value handed to each component; nothing is
//! read from globals after start-up. Sources, lowest precedence first:
//! defaults, an optional YAML file, environment variables, CLI flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generator::SchemaVersion;

/// Default generation backend (OpenAI-compatible).
pub const DEFAULT_BACKEND_ENDPOINT: &str = "https://openrouter.ai/api/v1";

/// Default model for structured generation.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o";

/// Default Prefect work pool.
pub const DEFAULT_WORK_POOL: &str = "kubernetes-prd-internal-tools";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Settings for the structured generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Base URL of the OpenAI-compatible backend.
    pub backend_endpoint: String,
    /// API key for the backend.
    #[serde(skip_serializing)]
    pub credential: Option<String>,
    /// Artifact schema version sent to the backend.
    pub schema_version: SchemaVersion,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend_endpoint: DEFAULT_BACKEND_ENDPOINT.to_string(),
            credential: None,
            schema_version: SchemaVersion::V1,
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.2,
            max_tokens: 4000,
        }
    }
}

/// How the orchestration platform is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlatformMode {
    /// Shell out to the `prefect` CLI.
    #[default]
    Cli,
    /// Call the Prefect REST API directly.
    Api,
}

/// Settings for the orchestration platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub mode: PlatformMode,
    /// Executable used in CLI mode.
    pub prefect_bin: String,
    /// Prefect API URL, required in API mode.
    pub api_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            mode: PlatformMode::Cli,
            prefect_bin: "prefect".to_string(),
            api_url: None,
            api_key: None,
        }
    }
}

/// Settings for the best-effort git notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VcsConfig {
    pub enabled: bool,
    pub git_bin: String,
    pub remote: Option<String>,
    pub branch: Option<String>,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            git_bin: "git".to_string(),
            remote: None,
            branch: None,
        }
    }
}

/// Configuration for the deploy pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub generator: GeneratorConfig,
    /// Directory flow files are written to, relative to the project root.
    pub flows_dir: PathBuf,
    /// Work pool deployments are bound to.
    pub work_pool: String,
    pub work_queue: Option<String>,
    /// Whether to request a run right after registration.
    pub trigger_run: bool,
    pub platform: PlatformConfig,
    pub vcs: VcsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            flows_dir: PathBuf::from("flows"),
            work_pool: DEFAULT_WORK_POOL.to_string(),
            work_queue: None,
            trigger_run: true,
            platform: PlatformConfig::default(),
            vcs: VcsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a YAML configuration file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parses YAML configuration text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Creates configuration from defaults plus environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays environment variables read through `lookup`.
    ///
    /// # Environment Variables
    ///
    /// - `FLOWFORGE_BACKEND_ENDPOINT`: generation backend base URL
    /// - `FLOWFORGE_API_KEY`: backend credential (falls back to `OPENROUTER_API_KEY`)
    /// - `FLOWFORGE_MODEL`: generation model
    /// - `FLOWFORGE_SCHEMA_VERSION`: artifact schema version (default: v1)
    /// - `FLOWFORGE_TEMPERATURE`: sampling temperature
    /// - `FLOWFORGE_FLOWS_DIR`: flow file directory (default: flows)
    /// - `FLOWFORGE_WORK_POOL`: Prefect work pool
    /// - `FLOWFORGE_WORK_QUEUE`: Prefect work queue
    /// - `FLOWFORGE_PLATFORM`: `cli` or `api`
    /// - `FLOWFORGE_VCS`: enable git notification (boolean)
    /// - `PREFECT_API_URL` / `PREFECT_API_KEY`: Prefect API access
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("FLOWFORGE_BACKEND_ENDPOINT") {
            self.generator.backend_endpoint = val;
        }
        if let Some(val) = lookup("FLOWFORGE_API_KEY").or_else(|| lookup("OPENROUTER_API_KEY")) {
            self.generator.credential = Some(val);
        }
        if let Some(val) = lookup("FLOWFORGE_MODEL") {
            self.generator.model = val;
        }
        if let Some(val) = lookup("FLOWFORGE_SCHEMA_VERSION") {
            self.generator.schema_version =
                val.parse().map_err(|message| ConfigError::InvalidValue {
                    key: "FLOWFORGE_SCHEMA_VERSION".to_string(),
                    message,
                })?;
        }
        if let Some(val) = lookup("FLOWFORGE_TEMPERATURE") {
            self.generator.temperature = parse_env_value(&val, "FLOWFORGE_TEMPERATURE")?;
        }
        if let Some(val) = lookup("FLOWFORGE_FLOWS_DIR") {
            self.flows_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("FLOWFORGE_WORK_POOL") {
            self.work_pool = val;
        }
        if let Some(val) = lookup("FLOWFORGE_WORK_QUEUE") {
            self.work_queue = Some(val);
        }
        if let Some(val) = lookup("FLOWFORGE_PLATFORM") {
            self.platform.mode = match val.to_lowercase().as_str() {
                "cli" => PlatformMode::Cli,
                "api" => PlatformMode::Api,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "FLOWFORGE_PLATFORM".to_string(),
                        message: format!("expected 'cli' or 'api', got '{}'", other),
                    })
                }
            };
        }
        if let Some(val) = lookup("FLOWFORGE_VCS") {
            self.vcs.enabled = parse_env_bool(&val, "FLOWFORGE_VCS")?;
        }
        if let Some(val) = lookup("PREFECT_API_URL") {
            self.platform.api_url = Some(val);
        }
        if let Some(val) = lookup("PREFECT_API_KEY") {
            self.platform.api_key = Some(val);
        }
        Ok(())
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generator.backend_endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "backend_endpoint cannot be empty".to_string(),
            ));
        }

        if self.generator.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.generator.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.generator.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.flows_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "flows_dir cannot be empty".to_string(),
            ));
        }

        if self.work_pool.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "work_pool cannot be empty".to_string(),
            ));
        }

        if self.platform.mode == PlatformMode::Cli && self.platform.prefect_bin.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "prefect_bin cannot be empty in cli mode".to_string(),
            ));
        }

        if self.platform.mode == PlatformMode::Api
            && self
                .platform
                .api_url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
        {
            return Err(ConfigError::ValidationFailed(
                "api_url is required in api mode (set PREFECT_API_URL)".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the flows directory.
    pub fn with_flows_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.flows_dir = dir.into();
        self
    }

    /// Builder method to set the work pool.
    pub fn with_work_pool(mut self, pool: impl Into<String>) -> Self {
        self.work_pool = pool.into();
        self
    }

    /// Builder method to set the work queue.
    pub fn with_work_queue(mut self, queue: impl Into<String>) -> Self {
        self.work_queue = Some(queue.into());
        self
    }

    /// Builder method to enable or disable the initial run.
    pub fn with_trigger_run(mut self, enabled: bool) -> Self {
        self.trigger_run = enabled;
        self
    }

    /// Builder method to enable or disable git notification.
    pub fn with_vcs(mut self, enabled: bool) -> Self {
        self.vcs.enabled = enabled;
        self
    }

    /// Builder method to set the generation model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.generator.model = model.into();
        self
    }

    /// Builder method to set the generation temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.generator.temperature = temperature;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.flows_dir, PathBuf::from("flows"));
        assert_eq!(config.work_pool, DEFAULT_WORK_POOL);
        assert_eq!(config.generator.schema_version, SchemaVersion::V1);
        assert_eq!(config.platform.mode, PlatformMode::Cli);
        assert!(config.trigger_run);
        assert!(config.vcs.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_env() {
        let mut config = PipelineConfig::default();
        config
            .apply_env(lookup_from(&[
                ("FLOWFORGE_BACKEND_ENDPOINT", "http://localhost:4000"),
                ("OPENROUTER_API_KEY", "or-key"),
                ("FLOWFORGE_WORK_POOL", "local"),
                ("FLOWFORGE_PLATFORM", "api"),
                ("PREFECT_API_URL", "http://localhost:4200/api"),
                ("FLOWFORGE_VCS", "off"),
            ]))
            .expect("env should apply");

        assert_eq!(config.generator.backend_endpoint, "http://localhost:4000");
        assert_eq!(config.generator.credential.as_deref(), Some("or-key"));
        assert_eq!(config.work_pool, "local");
        assert_eq!(config.platform.mode, PlatformMode::Api);
        assert!(!config.vcs.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flowforge_key_wins_over_openrouter_key() {
        let mut config = PipelineConfig::default();
        config
            .apply_env(lookup_from(&[
                ("FLOWFORGE_API_KEY", "ff-key"),
                ("OPENROUTER_API_KEY", "or-key"),
            ]))
            .expect("env should apply");
        assert_eq!(config.generator.credential.as_deref(), Some("ff-key"));
    }

    #[test]
    fn test_apply_env_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env(lookup_from(&[("FLOWFORGE_SCHEMA_VERSION", "v9")]))
            .unwrap_err();
        assert!(err.to_string().contains("FLOWFORGE_SCHEMA_VERSION"));

        let err = config
            .apply_env(lookup_from(&[("FLOWFORGE_TEMPERATURE", "warm")]))
            .unwrap_err();
        assert!(err.to_string().contains("FLOWFORGE_TEMPERATURE"));
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let yaml = r#"
work_pool: local-process
flows_dir: generated/flows
generator:
  model: anthropic/claude-sonnet-4
  schema_version: v1
platform:
  mode: api
  api_url: http://127.0.0.1:4200/api
vcs:
  enabled: false
"#;
        let config = PipelineConfig::from_yaml_str(yaml).expect("yaml should parse");
        assert_eq!(config.work_pool, "local-process");
        assert_eq!(config.flows_dir, PathBuf::from("generated/flows"));
        assert_eq!(config.generator.model, "anthropic/claude-sonnet-4");
        assert_eq!(config.generator.backend_endpoint, DEFAULT_BACKEND_ENDPOINT);
        assert_eq!(config.platform.mode, PlatformMode::Api);
        assert_eq!(config.platform.prefect_bin, "prefect");
        assert!(!config.vcs.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip_from_disk() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("flowforge.yaml");
        std::fs::write(&path, "work_pool: docker-pool\n").expect("write");
        let config = PipelineConfig::from_yaml_file(&path).expect("load");
        assert_eq!(config.work_pool, "docker-pool");

        assert!(matches!(
            PipelineConfig::from_yaml_file(dir.path().join("missing.yaml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_validation_failures() {
        let config = PipelineConfig::default().with_work_pool("");
        assert!(config.validate().unwrap_err().to_string().contains("work_pool"));

        let config = PipelineConfig::default().with_temperature(3.0);
        assert!(config.validate().unwrap_err().to_string().contains("temperature"));

        let config = PipelineConfig::default().with_flows_dir("");
        assert!(config.validate().unwrap_err().to_string().contains("flows_dir"));

        let mut config = PipelineConfig::default();
        config.platform.mode = PlatformMode::Api;
        assert!(config.validate().unwrap_err().to_string().contains("api_url"));
    }
}
