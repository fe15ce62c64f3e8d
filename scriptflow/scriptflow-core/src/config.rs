//! Configuration for Scriptflow.
//!
//! Configuration lives in `~/.scriptflow/config.toml` unless
//! `SCRIPTFLOW_CONFIG_PATH` points elsewhere. Loading reads the file, applies
//! `SCRIPTFLOW_*` environment overrides and validates the result.
//!
//! ```no_run
//! use scriptflow_core::config::ScriptflowConfig;
//!
//! # async fn example() -> scriptflow_core::Result<()> {
//! let config = ScriptflowConfig::load_or_default().await?;
//! println!("lease: {:?}", config.locks.lease_duration());
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, ScriptflowError};
use crate::types::Position;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

// Environment variable names
pub const ENV_CONFIG_PATH: &str = "SCRIPTFLOW_CONFIG_PATH";
pub const ENV_LOG_LEVEL: &str = "SCRIPTFLOW_LOG_LEVEL";
pub const ENV_DB_MODE: &str = "SCRIPTFLOW_DB_MODE";
pub const ENV_DB_URL: &str = "SCRIPTFLOW_DB_URL";
pub const ENV_DB_PATH: &str = "SCRIPTFLOW_DB_PATH";
pub const ENV_DB_NAMESPACE: &str = "SCRIPTFLOW_DB_NAMESPACE";
pub const ENV_DB_DATABASE: &str = "SCRIPTFLOW_DB_DATABASE";
pub const ENV_DB_USERNAME: &str = "SCRIPTFLOW_DB_USERNAME";
pub const ENV_DB_PASSWORD: &str = "SCRIPTFLOW_DB_PASSWORD";
pub const ENV_LOCK_HEARTBEAT_SECS: &str = "SCRIPTFLOW_LOCK_HEARTBEAT_SECS";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 2] = ["pretty", "json"];
const VALID_DB_MODES: [&str; 3] = ["memory", "file", "remote"];
const MAX_HEARTBEAT_SECS: u64 = 86_400;
const MAX_LEASE_HEARTBEATS: u32 = 1_000;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScriptflowConfig {
    pub general: GeneralConfig,
    pub database: DatabaseConfig,
    pub locks: LockConfig,
    pub copy: CopyConfig,
    pub batch: BatchConfig,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    /// `pretty` or `json`
    pub log_format: String,
}

/// Database connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `memory`, `file` or `remote`
    pub mode: String,
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Edit lease timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How often editors renew their lease
    pub heartbeat_interval_secs: u64,
    /// Lease length as a multiple of the heartbeat interval
    pub lease_heartbeats: u32,
}

/// Deep-copy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    pub offset_x: f64,
    pub offset_y: f64,
    /// Attempts at drawing a non-colliding identifier per copied node
    pub max_id_attempts: u32,
}

/// Batch input limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_items: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            mode: "memory".to_string(),
            path: None,
            url: None,
            namespace: "scriptflow".to_string(),
            database: "main".to_string(),
            username: None,
            password: None,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            lease_heartbeats: 3,
        }
    }
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            offset_x: 40.0,
            offset_y: 40.0,
            max_id_attempts: 8,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_items: 500 }
    }
}

impl LockConfig {
    /// Lease length: heartbeat interval times the heartbeat multiple
    pub fn lease_duration(&self) -> Duration {
        let secs = self
            .heartbeat_interval_secs
            .checked_mul(u64::from(self.lease_heartbeats))
            .unwrap_or(u64::MAX);
        Duration::from_secs(secs)
    }
}

impl CopyConfig {
    pub fn offset(&self) -> Position {
        Position::new(self.offset_x, self.offset_y)
    }
}

impl ScriptflowConfig {
    /// Load configuration from the default location, falling back to
    /// defaults (plus environment overrides) when no file exists
    pub async fn load_or_default() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from_path(&path).await
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            let mut config = Self::default();
            config.merge_env_vars()?;
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific path
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ScriptflowError::config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml(&content)?;
        config.merge_env_vars()?;
        config.validate()?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse TOML without applying overrides or validation
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ScriptflowError::config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a specific path atomically
    pub async fn save_to_path(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ScriptflowError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ScriptflowError::config(format!("Failed to serialize config: {}", e)))?;

        let temp_path = path.with_extension("toml.tmp");
        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| ScriptflowError::config(format!("Failed to write config file: {}", e)))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| ScriptflowError::config(format!("Failed to rename config file: {}", e)))?;

        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(ScriptflowError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.general.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if !VALID_LOG_FORMATS.contains(&self.general.log_format.as_str()) {
            return Err(ScriptflowError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.general.log_format,
                VALID_LOG_FORMATS.join(", ")
            )));
        }

        if !VALID_DB_MODES.contains(&self.database.mode.as_str()) {
            return Err(ScriptflowError::config(format!(
                "Invalid database mode '{}'. Must be one of: {}",
                self.database.mode,
                VALID_DB_MODES.join(", ")
            )));
        }
        if self.database.mode == "file" && self.database.path.is_none() {
            return Err(ScriptflowError::config("File mode requires database.path"));
        }
        if self.database.mode == "remote" && self.database.url.is_none() {
            return Err(ScriptflowError::config("Remote mode requires database.url"));
        }
        if self.database.namespace.is_empty() {
            return Err(ScriptflowError::config("Namespace cannot be empty"));
        }
        if self.database.database.is_empty() {
            return Err(ScriptflowError::config("Database name cannot be empty"));
        }

        if self.locks.heartbeat_interval_secs == 0 {
            return Err(ScriptflowError::config("Heartbeat interval must be greater than 0"));
        }
        if self.locks.heartbeat_interval_secs > MAX_HEARTBEAT_SECS {
            return Err(ScriptflowError::config(format!(
                "Heartbeat interval cannot exceed {} seconds",
                MAX_HEARTBEAT_SECS
            )));
        }
        if self.locks.lease_heartbeats == 0 {
            return Err(ScriptflowError::config("Lease must cover at least one heartbeat"));
        }
        if self.locks.lease_heartbeats > MAX_LEASE_HEARTBEATS {
            return Err(ScriptflowError::config(format!(
                "Lease cannot span more than {} heartbeats",
                MAX_LEASE_HEARTBEATS
            )));
        }

        if self.copy.max_id_attempts == 0 {
            return Err(ScriptflowError::config("max_id_attempts must be greater than 0"));
        }
        if self.batch.max_items == 0 {
            return Err(ScriptflowError::config("Batch max_items must be greater than 0"));
        }

        Ok(())
    }

    /// Merge environment variable overrides into the configuration
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_overrides(|key| std::env::var(key).ok())
    }

    /// Merge overrides from an arbitrary key lookup
    pub fn merge_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            debug!("Overriding log_level from environment: {}", level);
            self.general.log_level = level;
        }
        if let Some(mode) = lookup(ENV_DB_MODE) {
            self.database.mode = mode;
        }
        if let Some(url) = lookup(ENV_DB_URL) {
            self.database.url = Some(url);
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(namespace) = lookup(ENV_DB_NAMESPACE) {
            self.database.namespace = namespace;
        }
        if let Some(database) = lookup(ENV_DB_DATABASE) {
            self.database.database = database;
        }
        if let Some(username) = lookup(ENV_DB_USERNAME) {
            self.database.username = Some(username);
        }
        if let Some(password) = lookup(ENV_DB_PASSWORD) {
            self.database.password = Some(password);
        }
        if let Some(secs) = lookup(ENV_LOCK_HEARTBEAT_SECS) {
            self.locks.heartbeat_interval_secs = secs.parse().map_err(|_| {
                ScriptflowError::config(format!("Invalid {}: '{}'", ENV_LOCK_HEARTBEAT_SECS, secs))
            })?;
        }
        Ok(())
    }

    /// Base directory for Scriptflow files
    pub fn base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".scriptflow"))
            .ok_or_else(|| ScriptflowError::config("Could not determine home directory"))
    }

    /// Path of the configuration file
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::base_dir()?.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = ScriptflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.locks.lease_duration(), Duration::from_secs(45));
        assert_eq!(config.copy.offset(), Position::new(40.0, 40.0));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = ScriptflowConfig::from_toml(
            r#"
            [locks]
            heartbeat_interval_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.locks.heartbeat_interval_secs, 10);
        assert_eq!(config.locks.lease_heartbeats, 3);
        assert_eq!(config.database.namespace, "scriptflow");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ScriptflowConfig::default();
        config.general.log_level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = ScriptflowConfig::default();
        config.database.mode = "file".into();
        assert!(config.validate().is_err());
        config.database.path = Some(PathBuf::from("/tmp/scriptflow"));
        assert!(config.validate().is_ok());

        let mut config = ScriptflowConfig::default();
        config.locks.lease_heartbeats = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bounds_lease_length() {
        let mut config = ScriptflowConfig::default();
        config.locks.heartbeat_interval_secs = 10_000_000_000_000;
        assert!(config.validate().is_err());

        config.locks.heartbeat_interval_secs = MAX_HEARTBEAT_SECS;
        assert!(config.validate().is_ok());

        config.locks.lease_heartbeats = MAX_LEASE_HEARTBEATS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lease_duration_saturates() {
        let mut config = ScriptflowConfig::default();
        config.locks.heartbeat_interval_secs = u64::MAX;
        config.locks.lease_heartbeats = 3;
        assert_eq!(config.locks.lease_duration(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_LOG_LEVEL, "debug"),
            (ENV_DB_MODE, "remote"),
            (ENV_DB_URL, "ws://db:8000"),
            (ENV_LOCK_HEARTBEAT_SECS, "5"),
        ]
        .into_iter()
        .collect();

        let mut config = ScriptflowConfig::default();
        config
            .merge_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.database.mode, "remote");
        assert_eq!(config.database.url.as_deref(), Some("ws://db:8000"));
        assert_eq!(config.locks.lease_duration(), Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_heartbeat_override() {
        let mut config = ScriptflowConfig::default();
        let result = config.merge_overrides(|k| {
            (k == ENV_LOCK_HEARTBEAT_SECS).then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }
}
