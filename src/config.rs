// Configuration File Support
//
// This module provides configuration file parsing for hubguard.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from the XDG config directory: ~/.config/hubguard/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::csrf::CsrfConfig;
use crate::rate_limit::RateLimitConfig;

/// File holding persisted rate-limit histories
pub const RATE_LIMIT_FILE: &str = "rate_limits.json";

/// File holding the session-scoped CSRF slot
pub const SESSION_FILE: &str = "session.json";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Storage locations
    pub storage: StorageConfig,

    /// CSRF token settings
    pub csrf: CsrfConfig,

    /// Named rate limiters; a `[limiters]` table replaces the built-in set
    pub limiters: BTreeMap<String, RateLimitConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the rate-limit and session files
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = directories::ProjectDirs::from("com", "hubguard", "HubGuard")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".hubguard"));
        Self { data_dir }
    }
}

impl StorageConfig {
    /// Path of the persisted rate-limit store
    pub fn rate_limit_path(&self) -> PathBuf {
        self.data_dir.join(RATE_LIMIT_FILE)
    }

    /// Path of the session store
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE)
    }
}

fn default_limiters() -> BTreeMap<String, RateLimitConfig> {
    BTreeMap::from([
        ("default".to_string(), RateLimitConfig::default()),
        ("api".to_string(), RateLimitConfig::api()),
        ("auth".to_string(), RateLimitConfig::auth()),
        ("form_submit".to_string(), RateLimitConfig::form_submit()),
    ])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            csrf: CsrfConfig::default(),
            limiters: default_limiters(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// Environment overrides are applied whether or not the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/hubguard/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "hubguard", "HubGuard") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("hubguard").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - HUBGUARD_LOG_LEVEL
    /// - HUBGUARD_LOG_FORMAT
    /// - HUBGUARD_DATA_DIR
    /// - HUBGUARD_CSRF_EXPIRY_MS
    fn apply_env_overrides<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = var("HUBGUARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("HUBGUARD_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(dir) = var("HUBGUARD_DATA_DIR") {
            if !dir.is_empty() {
                self.storage.data_dir = PathBuf::from(dir);
            }
        }
        if let Some(expiry) = var("HUBGUARD_CSRF_EXPIRY_MS") {
            if let Ok(expiry) = expiry.parse::<u64>() {
                if expiry > 0 {
                    self.csrf.token_expiry_ms = expiry;
                }
            }
        }
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.csrf.token_expiry_ms == 0 {
            anyhow::bail!("CSRF token expiry must be > 0");
        }

        if self.limiters.is_empty() {
            anyhow::bail!("At least one rate limiter must be configured");
        }

        for (name, limiter) in &self.limiters {
            limiter
                .validate()
                .with_context(|| format!("Rate limiter '{}' is invalid", name))?;
        }

        let limiters: Vec<_> = self.limiters.iter().collect();
        for (i, (name, limiter)) in limiters.iter().enumerate() {
            for (other_name, other) in &limiters[i + 1..] {
                if limiter.overlaps(other) {
                    anyhow::bail!(
                        "Rate limiters '{}' and '{}' have overlapping key prefixes '{}' and '{}'",
                        name,
                        other_name,
                        limiter.key_prefix,
                        other.key_prefix
                    );
                }
            }
        }

        Ok(())
    }

    /// Look up a named rate limiter
    pub fn limiter(&self, name: &str) -> Option<&RateLimitConfig> {
        self.limiters.get(name)
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
