//! Configuration for the evaluation engine
//!
//! # Configuration File Format
//!
//! TOML format in `~/.config/aperture/config.toml`:
//!
//! ```toml
//! [engine]
//! batch_size = 15
//! inter_request_delay_secs = 2
//! max_retries = 3
//! backoff_base_secs = 60
//! default_rate_limit_wait_secs = 60
//!
//! [provider]
//! kind = "anthropic"
//! model = "claude-sonnet-4-5"
//! timeout_secs = 120
//!
//! [scoring]
//! technical_quality = 0.30
//! composition = 0.25
//! commercial_potential = 0.25
//! artistic_merit = 0.20
//!
//! [storage]
//! database_path = "/home/me/.local/share/aperture/aperture.db"
//! artifact_root = "/home/me/.local/share/aperture/artifacts"
//! ```

use crate::error::{ApertureError, Result};
use crate::types::ScoreWeights;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApertureConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub scoring: ScoreWeights,

    #[serde(default)]
    pub storage: StorageSettings,
}

/// Scheduling and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Subjects per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between consecutive provider calls
    #[serde(default = "default_inter_request_delay")]
    pub inter_request_delay_secs: f64,

    /// Retries for overloaded providers
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff for overloaded providers
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Wait applied when a rate-limit response carries no retry-after
    #[serde(default = "default_rate_limit_wait")]
    pub default_rate_limit_wait_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            inter_request_delay_secs: default_inter_request_delay(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base(),
            default_rate_limit_wait_secs: default_rate_limit_wait(),
        }
    }
}

impl EngineSettings {
    pub fn inter_request_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.inter_request_delay_secs.max(0.0))
            .unwrap_or(Duration::MAX)
    }
}

/// Which provider implementation is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    /// Identifier stored on results and used to look up credentials
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "claude-sonnet-4-5",
            ProviderKind::OpenAi => "gpt-4o",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ApertureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openai" | "open_ai" => Ok(ProviderKind::OpenAi),
            other => Err(ApertureError::Configuration(format!(
                "Unsupported provider: {}",
                other
            ))),
        }
    }
}

/// Provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,

    /// Model identifier; falls back to the provider's default
    #[serde(default)]
    pub model: Option<String>,

    /// Override for the API base URL (proxies, tests)
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            model: None,
            base_url: None,
            timeout_secs: default_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ProviderSettings {
    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.kind.default_model().to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where things live on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Root that subject artifact paths are resolved against
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,

    /// Optional evaluation prompt file; the built-in prompt is used otherwise
    #[serde(default)]
    pub prompt_path: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            artifact_root: default_artifact_root(),
            prompt_path: None,
        }
    }
}

// Default value helpers
fn default_batch_size() -> usize {
    15
}

fn default_inter_request_delay() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    60
}

fn default_rate_limit_wait() -> u64 {
    60
}

fn default_provider_kind() -> ProviderKind {
    ProviderKind::Anthropic
}

fn default_timeout() -> u64 {
    120
}

fn default_max_tokens() -> usize {
    2048
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aperture")
}

fn default_database_path() -> PathBuf {
    data_dir().join("aperture.db")
}

fn default_artifact_root() -> PathBuf {
    data_dir().join("artifacts")
}

impl ApertureConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Config file not found, using defaults: {:?}", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ApertureError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file: {}", e),
            ))
        })?;

        let config: ApertureConfig = toml::from_str(&content)?;
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            ApertureError::Configuration(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.batch_size == 0 {
            return Err(ApertureError::Configuration(
                "engine.batch_size must be at least 1".to_string(),
            ));
        }
        if !self.engine.inter_request_delay_secs.is_finite()
            || self.engine.inter_request_delay_secs < 0.0
        {
            return Err(ApertureError::Configuration(
                "engine.inter_request_delay_secs must be a non-negative number".to_string(),
            ));
        }
        if self.scoring.total() <= 0.0 {
            return Err(ApertureError::Configuration(
                "scoring weights must sum to a positive value".to_string(),
            ));
        }
        Ok(())
    }

    /// Default config location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aperture")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ApertureConfig::default();

        assert_eq!(config.engine.batch_size, 15);
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.engine.backoff_base_secs, 60);
        assert_eq!(config.provider.kind, ProviderKind::Anthropic);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[engine]
batch_size = 5

[provider]
kind = "openai"
"#,
        )
        .unwrap();

        let config = ApertureConfig::load(&path).unwrap();
        assert_eq!(config.engine.batch_size, 5);
        assert_eq!(config.engine.backoff_base_secs, 60);
        assert_eq!(config.provider.kind, ProviderKind::OpenAi);
        assert_eq!(config.provider.model(), "gpt-4o");
    }

    #[test]
    fn test_inter_request_delay_never_panics() {
        let mut settings = EngineSettings::default();
        settings.inter_request_delay_secs = 1e30;
        assert_eq!(settings.inter_request_delay(), Duration::MAX);
        settings.inter_request_delay_secs = -5.0;
        assert_eq!(settings.inter_request_delay(), Duration::ZERO);
        settings.inter_request_delay_secs = 1.5;
        assert_eq!(settings.inter_request_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nbatch_size = 0\n").unwrap();

        let err = ApertureConfig::load(&path).unwrap_err();
        assert!(matches!(err, ApertureError::Configuration(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = ApertureConfig::default();
        config.engine.inter_request_delay_secs = 0.5;
        config.save(&path).unwrap();

        let loaded = ApertureConfig::load(&path).unwrap();
        assert_eq!(loaded.engine.inter_request_delay_secs, 0.5);
    }

    #[test]
    fn test_unknown_provider_is_configuration_error() {
        let err = "gemini".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, ApertureError::Configuration(_)));
    }
}
