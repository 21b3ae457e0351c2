//! Configuration management for the Filegate daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/filegate/config.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use protocol::parse_size;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{TokenValidator, MIN_SECRET_LEN};
use crate::files::mapping::{normalize_virtual, DirectoryMapping, MappingSet};
use crate::files::QuotaTracker;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("mapping {index} has an empty {field}")]
    EmptyMappingField { index: usize, field: &'static str },

    #[error("mapping source must be an absolute path, got {0}")]
    RelativeSource(PathBuf),

    #[error("mapping virtual path must start with '/', got {0:?}")]
    InvalidVirtualPath(String),

    #[error("virtual path {0} is mapped more than once")]
    DuplicateVirtualPath(String),

    #[error("quota must be a number followed by MB, GB or TB; {0}")]
    InvalidQuota(String),

    #[error("token_secret must be at least {min} characters, got {len}")]
    SecretTooShort { min: usize, len: usize },

    #[error("token_secret is set but base_dir is not")]
    MissingBaseDir,

    #[error("require_token is enabled but no token_secret is configured")]
    TokenRequiredWithoutSecret,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Filegate daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Exposed directories and quota.
    pub storage: StorageConfig,

    /// Token validation settings.
    pub auth: AuthConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Exposed directories and quota.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Total size limit across all mappings (`"10GB"`); empty means unlimited.
    pub quota: String,

    /// Whether listings include dot files by default.
    pub include_hidden: bool,

    /// Physical directories and the virtual prefixes they appear under.
    pub mappings: Vec<DirectoryMapping>,
}

/// Token validation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HMAC secret for access tokens. Empty disables tokens.
    pub token_secret: String,

    /// Directory that token sources are relative to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,

    /// Reject requests that carry no token.
    pub require_token: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filegate")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FILEGATE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FILEGATE_TOKEN_SECRET: Override the token signing secret
    /// - FILEGATE_BASE_DIR: Override the token base directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("FILEGATE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(secret) = std::env::var("FILEGATE_TOKEN_SECRET") {
            if !secret.is_empty() {
                tracing::info!("Overriding token_secret from environment");
                self.auth.token_secret = secret;
            }
        }

        if let Ok(base_dir) = std::env::var("FILEGATE_BASE_DIR") {
            if !base_dir.is_empty() {
                tracing::info!("Overriding base_dir from environment: {}", base_dir);
                self.auth.base_dir = Some(PathBuf::from(base_dir));
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (index, mapping) in self.storage.mappings.iter().enumerate() {
            if mapping.source.to_string_lossy().trim().is_empty() {
                return Err(ConfigError::EmptyMappingField {
                    index,
                    field: "source",
                });
            }
            if mapping.virtual_path.trim().is_empty() {
                return Err(ConfigError::EmptyMappingField {
                    index,
                    field: "virtual",
                });
            }
            if !mapping.source.is_absolute() {
                return Err(ConfigError::RelativeSource(mapping.source.clone()));
            }
            if !mapping.virtual_path.trim().starts_with('/') {
                return Err(ConfigError::InvalidVirtualPath(mapping.virtual_path.clone()));
            }

            let normalized = normalize_virtual(&mapping.virtual_path);
            if !seen.insert(normalized.clone()) {
                return Err(ConfigError::DuplicateVirtualPath(normalized));
            }
        }

        self.quota_limit()?;

        let secret_len = self.auth.token_secret.len();
        if secret_len > 0 {
            if secret_len < MIN_SECRET_LEN {
                return Err(ConfigError::SecretTooShort {
                    min: MIN_SECRET_LEN,
                    len: secret_len,
                });
            }
            if self.auth.base_dir.is_none() {
                return Err(ConfigError::MissingBaseDir);
            }
        } else if self.auth.require_token {
            return Err(ConfigError::TokenRequiredWithoutSecret);
        }

        // Validate log_level is a known value
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// The configured mappings, ordered by specificity.
    pub fn mapping_set(&self) -> MappingSet {
        MappingSet::new(self.storage.mappings.clone())
    }

    /// Configured quota in bytes (0 = unlimited).
    pub fn quota_limit(&self) -> Result<u64, ConfigError> {
        parse_size(&self.storage.quota).map_err(|e| ConfigError::InvalidQuota(e.to_string()))
    }

    /// Quota tracker for the configured limit.
    pub fn quota_tracker(&self) -> Result<QuotaTracker, ConfigError> {
        Ok(QuotaTracker::new(self.quota_limit()?))
    }

    /// Token validator, when a secret and base directory are configured.
    pub fn token_validator(&self) -> Option<TokenValidator> {
        if self.auth.token_secret.is_empty() {
            return None;
        }
        let base_dir = self.auth.base_dir.as_ref()?;
        Some(TokenValidator::new(&self.auth.token_secret, base_dir))
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
