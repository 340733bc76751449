//! Daemon configuration.
//!
//! Two files live in the config directory: `config.toml` for daemon
//! behaviour and `connection.json` with the OBS URL and password, which
//! clients can rewrite over IPC.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use autocaster_obs::{DEFAULT_URL, Endpoint, RetryPolicy};

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// OBS session settings
    #[serde(default)]
    pub obs: ObsConfig,
    /// Ops log settings
    #[serde(default)]
    pub ops_log: OpsLogConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Socket path (optional, uses the runtime dir if not set)
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { log_level: default_log_level(), socket_path: None }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// OBS session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsConfig {
    /// Connect with the saved connection config at startup
    #[serde(default)]
    pub auto_connect: bool,
    /// How long scene-graph reads wait for a collection rebuild
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Attempts per transient-prone request (3..=6)
    #[serde(default = "default_retry_tries")]
    pub retry_tries: u32,
    /// Delay between attempts (140..=160 ms)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Time an unstable connection gets to recover
    #[serde(default = "default_unstable_grace_ms")]
    pub unstable_grace_ms: u64,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            auto_connect: false,
            ready_timeout_ms: default_ready_timeout_ms(),
            retry_tries: default_retry_tries(),
            retry_delay_ms: default_retry_delay_ms(),
            unstable_grace_ms: default_unstable_grace_ms(),
        }
    }
}

impl ObsConfig {
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Retry policy, clamped to the supported range.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_tries, Duration::from_millis(self.retry_delay_ms))
    }

    #[must_use]
    pub fn unstable_grace(&self) -> Duration {
        Duration::from_millis(self.unstable_grace_ms)
    }
}

fn default_ready_timeout_ms() -> u64 {
    7000
}

fn default_retry_tries() -> u32 {
    4
}

fn default_retry_delay_ms() -> u64 {
    150
}

fn default_unstable_grace_ms() -> u64 {
    1500
}

/// Ops log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsLogConfig {
    /// Entries kept in memory
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Write daily files
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Directory for daily files (optional, uses the data dir if not set)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for OpsLogConfig {
    fn default() -> Self {
        Self { capacity: default_capacity(), persist: true, dir: None }
    }
}

fn default_capacity() -> usize {
    autocaster_obs::ops_log::DEFAULT_CAPACITY
}

fn default_true() -> bool {
    true
}

/// Load configuration from file or defaults.
pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

/// Load configuration from `config_path`, falling back to defaults when the
/// file does not exist.
pub fn load_config_from(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {config_path:?}"))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {config_path:?}"))?;
        Ok(config)
    } else {
        info!(?config_path, "Config file not found, using defaults");
        Ok(Config::default())
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "autocaster", "Autocaster").context("Could not determine config directory")
}

/// Get the configuration file path.
fn config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Get the connection config path.
pub fn connection_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("connection.json"))
}

/// Default directory for daily ops log files.
pub fn ops_log_dir(config: &OpsLogConfig) -> Result<PathBuf> {
    match &config.dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(project_dirs()?.data_dir().join("logs")),
    }
}

/// Saved OBS connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub password: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { url: default_url(), password: String::new() }
    }
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

impl ConnectionConfig {
    /// Apply explicit connect arguments over the saved values.
    #[must_use]
    pub fn merged(mut self, url: Option<&str>, password: Option<&str>) -> Self {
        if let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) {
            self.url = url.to_string();
        }
        if let Some(password) = password {
            self.password = password.to_string();
        }
        self
    }

    /// # Errors
    /// Returns an error for an unparseable URL.
    pub fn endpoint(&self) -> autocaster_obs::ObsResult<Endpoint> {
        let password = Some(self.password.clone()).filter(|p| !p.is_empty());
        Endpoint::new(&self.url, password)
    }

    /// The config as shown to clients, without the password.
    #[must_use]
    pub fn redacted(&self) -> Value {
        json!({ "url": self.url, "has_password": !self.password.is_empty() })
    }
}

/// Load the connection config, or defaults when none was saved.
pub fn load_connection_config(path: &Path) -> Result<ConnectionConfig> {
    if !path.exists() {
        return Ok(ConnectionConfig::default());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read connection config: {path:?}"))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse connection config: {path:?}"))
}

/// Write the connection config, creating the directory if needed.
pub fn save_connection_config(path: &Path, config: &ConnectionConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create config directory: {parent:?}"))?;
    }
    let content = serde_json::to_string_pretty(config).context("Failed to encode connection config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write connection config: {path:?}"))?;
    info!(?path, url = %config.url, "Connection config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.daemon.log_level, "info");
        assert!(!config.obs.auto_connect);
        assert_eq!(config.obs.ready_timeout(), Duration::from_millis(7000));
        assert_eq!(config.ops_log.capacity, 2000);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[obs]\nauto_connect = true\nretry_tries = 9\n").unwrap();

        let config = load_config_from(&path).unwrap();
        assert!(config.obs.auto_connect);
        assert_eq!(config.obs.retry_delay_ms, 150);
        // Out-of-range values are clamped when the policy is built
        assert_eq!(config.obs.retry_policy().tries(), 6);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[obs\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_connection_config_defaults_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/connection.json");
        assert_eq!(load_connection_config(&path).unwrap(), ConnectionConfig::default());

        let saved = ConnectionConfig { url: "ws://10.0.0.5:4455".into(), password: "hunter2".into() };
        save_connection_config(&path, &saved).unwrap();
        let loaded = load_connection_config(&path).unwrap();
        assert_eq!(loaded, saved);

        let merged = loaded.clone().merged(Some(" "), Some(""));
        assert_eq!(merged.url, "ws://10.0.0.5:4455");
        assert!(merged.endpoint().unwrap().password().is_none());
        assert_eq!(merged.redacted(), json!({ "url": "ws://10.0.0.5:4455", "has_password": false }));
        assert_eq!(loaded.redacted()["has_password"], true);
    }

    #[test]
    fn test_connection_config_tolerates_missing_fields() {
        let config: ConnectionConfig = serde_json::from_str(r#"{ "password": "x" }"#).unwrap();
        assert_eq!(config.url, DEFAULT_URL);
    }
}
