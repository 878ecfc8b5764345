//! Application configuration for legisync.
//!
//! User config lives at `~/.legisync/legisync.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LegisyncError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "legisync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".legisync";

/// User agent sent with every document download.
/// Upper bound on `checkpoint_interval_secs` (one week).
pub const MAX_CHECKPOINT_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

pub const DEFAULT_USER_AGENT: &str = concat!("legisync/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Config structs (matching legisync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Reconciliation settings.
    #[serde(default)]
    pub reconcile: ReconcileSettings,

    /// Text extraction settings.
    #[serde(default)]
    pub extraction: ExtractionSettings,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Country code of the output tree.
    #[serde(default = "default_country")]
    pub country: String,

    /// State code of the output tree. Required at run time, from here or the CLI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Worker pool size for both passes.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            country: default_country(),
            state: None,
            workers: default_workers(),
        }
    }
}

fn default_country() -> String {
    "us".into()
}
fn default_workers() -> usize {
    4
}

/// `[reconcile]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Occurrence count at which an orphan is reported as chronic.
    #[serde(default = "default_chronic_threshold")]
    pub chronic_orphan_threshold: u32,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            chronic_orphan_threshold: default_chronic_threshold(),
        }
    }
}

fn default_chronic_threshold() -> u32 {
    3
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Wall-clock seconds between checkpoint commits.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts after the first one for retryable download failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base; attempt `n` waits `base * 2^n`.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            checkpoint_interval_secs: default_checkpoint_interval(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_checkpoint_interval() -> u64 {
    1800
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    1000
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.legisync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| LegisyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.legisync/legisync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LegisyncError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| LegisyncError::config(format!("failed to parse {}: {e}", path.display())))?;
    validate(&config)?;
    Ok(config)
}

/// Reject values that would make a run meaningless.
pub fn validate(config: &AppConfig) -> Result<()> {
    if config.defaults.workers == 0 {
        return Err(LegisyncError::config("defaults.workers must be at least 1"));
    }
    if config.defaults.country.trim().is_empty() {
        return Err(LegisyncError::config("defaults.country must not be empty"));
    }
    let interval = config.extraction.checkpoint_interval_secs;
    if interval == 0 || interval > MAX_CHECKPOINT_INTERVAL_SECS {
        return Err(LegisyncError::config(format!(
            "extraction.checkpoint_interval_secs must be between 1 and {MAX_CHECKPOINT_INTERVAL_SECS}"
        )));
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    write_default_config(&path)?;
    Ok(path)
}

/// Write the default config to `path`, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| LegisyncError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| LegisyncError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| LegisyncError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("chronic_orphan_threshold"));
        assert!(toml_str.contains("checkpoint_interval_secs = 1800"));
        assert!(!toml_str.contains("state ="));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[defaults]
state = "wy"
workers = 8

[extraction]
max_retries = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.state.as_deref(), Some("wy"));
        assert_eq!(config.defaults.country, "us");
        assert_eq!(config.defaults.workers, 8);
        assert_eq!(config.extraction.max_retries, 5);
        assert_eq!(config.extraction.request_timeout_secs, 30);
        assert_eq!(config.reconcile.chronic_orphan_threshold, 3);
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.defaults.workers = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn checkpoint_interval_is_bounded() {
        let mut config = AppConfig::default();
        config.extraction.checkpoint_interval_secs = u64::MAX;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("checkpoint_interval_secs"));

        config.extraction.checkpoint_interval_secs = MAX_CHECKPOINT_INTERVAL_SECS;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn write_then_load_from_disk() {
        let dir = std::env::temp_dir().join(format!("legisync-config-{}", uuid::Uuid::now_v7()));
        let path = dir.join("legisync.toml");

        write_default_config(&path).expect("write");
        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded.defaults.workers, 4);
        assert_eq!(loaded.extraction.user_agent, DEFAULT_USER_AGENT);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = std::env::temp_dir().join(format!("legisync-config-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("legisync.toml");
        std::fs::write(&path, "[defaults\nworkers = ").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert_eq!(err.kind(), "config");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
