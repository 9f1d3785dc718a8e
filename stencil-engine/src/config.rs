//! Configuration management for the instantiation engine
//!
//! Settings are loaded from:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration struct for the engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Placeholder substitution settings
    #[serde(default)]
    pub substitution: SubstitutionConfig,
    /// Preview orchestration settings
    #[serde(default)]
    pub preview: PreviewConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Placeholder substitution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstitutionConfig {
    /// Recognise the quoted `"{{key}}}"` form and render it type-aware
    pub legacy_quoted_placeholders: bool,
    /// Treat numeric-looking text values of `auto` variables as numbers
    pub infer_numbers: bool,
}

/// Preview orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Upper bound for every collaborator call, in seconds
    pub request_timeout_secs: u64,
    /// Refuse submission into namespaces that already hold a selected resource
    pub block_on_conflicts: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Enable file logging
    pub file_logging_enabled: bool,
    /// Emit JSON on the console instead of plain text
    pub json_console: bool,
}

impl Default for SubstitutionConfig {
    fn default() -> Self {
        Self {
            legacy_quoted_placeholders: true,
            infer_numbers: true,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            block_on_conflicts: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("/var/log/stencil"),
            file_logging_enabled: false,
            json_console: false,
        }
    }
}

impl PreviewConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl EngineConfig {
    /// Load configuration from environment variables and optional config file
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(config_path) = Self::find_config_file() {
            match Self::load_from_file(&config_path) {
                Ok(file_config) => config = file_config,
                Err(e) => tracing::warn!("Ignoring config file: {}", e),
            }
        }

        config.apply_env_overrides();

        config
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("STENCIL_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/stencil/config.toml")),
            Some(PathBuf::from("./stencil.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Substitution
        if let Ok(enabled) = std::env::var("STENCIL_LEGACY_QUOTED_PLACEHOLDERS") {
            self.substitution.legacy_quoted_placeholders = enabled.parse().unwrap_or(true);
        }
        if let Ok(enabled) = std::env::var("STENCIL_INFER_NUMBERS") {
            self.substitution.infer_numbers = enabled.parse().unwrap_or(true);
        }

        // Preview
        if let Ok(secs) = std::env::var("STENCIL_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.preview.request_timeout_secs = secs;
            }
        }
        if let Ok(block) = std::env::var("STENCIL_BLOCK_ON_CONFLICTS") {
            self.preview.block_on_conflicts = block.parse().unwrap_or(true);
        }

        // Logging
        if let Ok(level) = std::env::var("STENCIL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(path) = std::env::var("STENCIL_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(path);
        }
        if let Ok(enabled) = std::env::var("STENCIL_FILE_LOGGING") {
            self.logging.file_logging_enabled = enabled.parse().unwrap_or(false);
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preview.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Request timeout cannot be 0".to_string(),
            ));
        }

        if self.logging.level.is_empty() {
            return Err(ConfigError::Validation("Log level cannot be empty".to_string()));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, String),
    /// Failed to parse configuration
    #[error("Failed to parse config: {0}")]
    Parse(String),
    /// Configuration validation failed
    #[error("Config validation failed: {0}")]
    Validation(String),
}
