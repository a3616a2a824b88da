//! Layered configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML file at
//! `<config_dir>/helios/config.toml`, then `HELIOS_*` environment variables
//! with `__` separating nested keys (`HELIOS_REALTIME__BASE_URL`). The legacy
//! `HELIOS_WS_URL` is honoured when no base URL is configured otherwise.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::realtime::{
    BackoffPolicy, ChannelConfig, DEFAULT_HOST, DEFAULT_PORT, Endpoint, resolve_base_url,
};
use crate::storage::{DEFAULT_FILE_NAME, StorageConfig};

pub const APP_NAME: &str = "helios";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "HELIOS";

/// Older single-variable override for the WebSocket base URL.
pub const LEGACY_WS_URL_ENV: &str = "HELIOS_WS_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("failed to expand path {path}: {message}")]
    Expand { path: String, message: String },

    #[error("unable to determine {0} directory")]
    NoDirectory(&'static str),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub profile: String,
    pub logging: LoggingConfig,
    pub realtime: RealtimeConfig,
    pub storage: StorageSettings,
    pub session: SessionConfig,
    pub paths: PathsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            logging: LoggingConfig::default(),
            realtime: RealtimeConfig::default(),
            storage: StorageSettings::default(),
            session: SessionConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Channel parameters for `endpoint`.
    pub fn channel_config(&self, endpoint: Endpoint) -> ChannelConfig {
        ChannelConfig {
            endpoint,
            base_url: self.realtime.base_url(),
            backoff: self.realtime.backoff(),
            heartbeat_interval: Duration::from_secs(self.realtime.heartbeat_interval_secs),
            connect_timeout: Duration::from_secs(self.realtime.connect_timeout_secs),
        }
    }

    /// Where the persisted store slices live.
    pub fn storage_config(&self, paths: &AppPaths) -> ConfigResult<StorageConfig> {
        if !self.storage.enabled {
            return Ok(StorageConfig::Memory);
        }
        let path = match &self.storage.file {
            Some(file) => expand_str_path(file)?,
            None => paths.data_dir.join(DEFAULT_FILE_NAME),
        };
        Ok(StorageConfig::File(path))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Append logs to this file instead of stderr.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Log file to append to instead of stderr, if one is configured.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.file
            .as_deref()
            .filter(|file| !file.trim().is_empty())
            .map(PathBuf::from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Full WebSocket base, e.g. `wss://helios.example.com`. Wins over
    /// `host`/`port`.
    pub base_url: Option<String>,
    pub host: String,
    pub port: u16,
    /// Failed attempts before giving up; 0 retries forever.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// 0 disables the heartbeat.
    pub heartbeat_interval_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        let backoff = BackoffPolicy::default();
        Self {
            base_url: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_retries: backoff.max_retries.unwrap_or(0),
            base_delay_ms: backoff.base_delay.as_millis() as u64,
            backoff_multiplier: backoff.multiplier,
            max_delay_ms: backoff.max_delay.as_millis() as u64,
            heartbeat_interval_secs: crate::realtime::PING_INTERVAL_SECS,
            connect_timeout_secs: crate::realtime::CONNECT_TIMEOUT_SECS,
        }
    }
}

impl RealtimeConfig {
    pub fn base_url(&self) -> String {
        resolve_base_url(self.base_url.as_deref(), &self.host, self.port)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.backoff_multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_retries: (self.max_retries > 0).then_some(self.max_retries),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Persist session, tasks and plans between runs.
    pub enabled: bool,
    /// Overrides `<data_dir>/helios-storage.json`.
    pub file: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            file: None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// User stream to follow when none is given on the command line.
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: Option<String>,
    pub state_dir: Option<String>,
}

/// Resolved filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl AppPaths {
    /// XDG-aware defaults. `override_path` may name a file or a directory
    /// containing `config.toml`.
    pub fn discover(override_path: Option<PathBuf>) -> ConfigResult<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        Ok(Self {
            config_file,
            data_dir: default_data_dir()?,
            state_dir: default_state_dir()?,
        })
    }

    pub fn apply_overrides(mut self, config: &AppConfig) -> ConfigResult<Self> {
        if let Some(ref data_dir) = config.paths.data_dir {
            self.data_dir = expand_str_path(data_dir)?;
        }
        if let Some(ref state_dir) = config.paths.state_dir {
            self.state_dir = expand_str_path(state_dir)?;
        }
        Ok(self)
    }
}

/// Load configuration from `path` and the process environment.
pub fn load_config(path: &Path) -> ConfigResult<AppConfig> {
    load_config_with_env(path, None)
}

/// Load configuration reading environment overrides from `vars` instead of
/// the process environment when given.
pub fn load_config_with_env(
    path: &Path,
    vars: Option<HashMap<String, String>>,
) -> ConfigResult<AppConfig> {
    let legacy_url = match &vars {
        Some(vars) => vars.get(LEGACY_WS_URL_ENV).cloned(),
        None => env::var(LEGACY_WS_URL_ENV).ok(),
    };

    let built = Config::builder()
        .set_default("profile", "default")?
        .set_default("logging.level", "info")?
        .set_default("realtime.host", DEFAULT_HOST)?
        .set_default("realtime.port", i64::from(DEFAULT_PORT))?
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .source(vars),
        )
        .build()?;

    let mut config: AppConfig = built.try_deserialize()?;

    let configured = config
        .realtime
        .base_url
        .as_deref()
        .is_some_and(|url| !url.trim().is_empty());
    if !configured && let Some(url) = legacy_url.filter(|url| !url.trim().is_empty()) {
        config.realtime.base_url = Some(url);
    }

    if let Some(ref file) = config.logging.file {
        config.logging.file = Some(expand_str_path(file)?.display().to_string());
    }

    Ok(config)
}

/// Write the default configuration, with a header comment, to `path`.
pub fn write_default_config(path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let toml = toml::to_string_pretty(&AppConfig::default())?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn default_config_header(path: &Path) -> String {
    format!(
        "# Configuration for {APP_NAME}\n# File: {}\n#\n# Environment overrides use the {ENV_PREFIX}_ prefix, e.g. {ENV_PREFIX}_REALTIME__BASE_URL.\n\n",
        path.display()
    )
}

pub fn expand_path(path: PathBuf) -> ConfigResult<PathBuf> {
    match path.to_str() {
        Some(text) => expand_str_path(text),
        None => Ok(path),
    }
}

pub fn expand_str_path(text: &str) -> ConfigResult<PathBuf> {
    let expanded = shellexpand::full(text).map_err(|e| ConfigError::Expand {
        path: text.to_string(),
        message: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> ConfigResult<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or(ConfigError::NoDirectory("configuration"))
}

fn default_data_dir() -> ConfigResult<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or(ConfigError::NoDirectory("data"))
}

fn default_state_dir() -> ConfigResult<PathBuf> {
    if let Some(dir) = env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::state_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("state").join(APP_NAME))
        .ok_or(ConfigError::NoDirectory("state"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let config = load_config_with_env(&dir.path().join("missing.toml"), vars(&[])).unwrap();

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.realtime.base_url(), "ws://localhost:8000");
        assert_eq!(config.realtime.backoff(), BackoffPolicy::default());
    }

    #[test]
    fn test_file_then_env_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[realtime]\nhost = \"10.1.1.1\"\nport = 9000\nmax_retries = 2\n",
        )
        .unwrap();

        let config =
            load_config_with_env(&path, vars(&[("HELIOS_REALTIME__PORT", "9100")])).unwrap();

        assert_eq!(config.realtime.base_url(), "ws://10.1.1.1:9100");
        assert_eq!(config.realtime.backoff().max_retries, Some(2));
    }

    #[test]
    fn test_legacy_ws_url() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config =
            load_config_with_env(&path, vars(&[("HELIOS_WS_URL", "wss://legacy.example/")]))
                .unwrap();
        assert_eq!(config.realtime.base_url(), "wss://legacy.example");

        let config = load_config_with_env(
            &path,
            vars(&[
                ("HELIOS_WS_URL", "wss://legacy.example"),
                ("HELIOS_REALTIME__BASE_URL", "wss://current.example"),
            ]),
        )
        .unwrap();
        assert_eq!(config.realtime.base_url(), "wss://current.example");
    }

    #[test]
    fn test_logging_file_from_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = load_config_with_env(&path, vars(&[])).unwrap();
        assert_eq!(config.logging.file_path(), None);

        let config = load_config_with_env(
            &path,
            vars(&[
                ("HELIOS_LOGGING__FILE", "/var/log/helios/client.log"),
                ("HELIOS_LOGGING__LEVEL", "debug"),
            ]),
        )
        .unwrap();
        assert_eq!(
            config.logging.file_path(),
            Some(PathBuf::from("/var/log/helios/client.log"))
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_default_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        write_default_config(&path).unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("# Configuration for helios"));

        let config = load_config_with_env(&path, vars(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_channel_and_storage_config() {
        let config = AppConfig::default();
        let paths = AppPaths {
            config_file: PathBuf::from("/tmp/helios/config.toml"),
            data_dir: PathBuf::from("/tmp/helios-data"),
            state_dir: PathBuf::from("/tmp/helios-state"),
        };

        let channel = config.channel_config(Endpoint::user("u1"));
        assert_eq!(channel.url(), "ws://localhost:8000/ws/u1");
        assert_eq!(channel.heartbeat_interval, Duration::from_secs(30));

        assert_eq!(
            config.storage_config(&paths).unwrap(),
            StorageConfig::File(PathBuf::from("/tmp/helios-data/helios-storage.json"))
        );

        let disabled = AppConfig {
            storage: StorageSettings {
                enabled: false,
                file: None,
            },
            ..AppConfig::default()
        };
        assert_eq!(disabled.storage_config(&paths).unwrap(), StorageConfig::Memory);
    }
}
