use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    /// Catalog URLs that plugins may be installed from.
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sidecar: SidecarConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            repositories: Vec::new(),
            logging: LoggingConfig::default(),
            sidecar: SidecarConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    #[serde(default = "default_stdout_enabled")]
    pub stdout: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            stdout: default_stdout_enabled(),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Settings for the foreign-runtime sidecar process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarConfig {
    /// Loopback port the sidecar is told to bind.
    #[serde(default = "default_sidecar_port")]
    pub port: u16,
    /// Extra bundle locations, searched before the built-in ones.
    #[serde(default)]
    pub bundle_paths: Vec<PathBuf>,
    /// Start the sidecar lazily on the first foreign-archive install.
    #[serde(default = "default_true")]
    pub autostart: bool,
    #[serde(default = "default_startup_grace_secs")]
    pub startup_grace_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            port: default_sidecar_port(),
            bundle_paths: Vec::new(),
            autostart: true,
            startup_grace_secs: default_startup_grace_secs(),
            health_timeout_secs: default_health_timeout_secs(),
            load_timeout_secs: default_load_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl SidecarConfig {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Settings for the search/load fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_min_query_len")]
    pub min_query_len: usize,
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_query_len: default_min_query_len(),
            provider_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

impl SearchConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("sidecar.port must not be 0")]
    InvalidPort,
    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },
    #[error("repository URL '{url}' must be http(s)")]
    InvalidRepository { url: String },
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        if self.sidecar.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        for (field, value) in [
            ("sidecar.health_timeout_secs", self.sidecar.health_timeout_secs),
            ("sidecar.load_timeout_secs", self.sidecar.load_timeout_secs),
            ("sidecar.call_timeout_secs", self.sidecar.call_timeout_secs),
            ("search.provider_timeout_secs", self.search.provider_timeout_secs),
        ] {
            if value == 0 {
                return Err(ValidationError::ZeroTimeout { field });
            }
        }
        for url in &self.repositories {
            let scheme_ok = Url::parse(url)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !scheme_ok {
                return Err(ValidationError::InvalidRepository { url: url.clone() });
            }
        }
        Ok(())
    }
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_stdout_enabled() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_sidecar_port() -> u16 {
    8765
}

fn default_startup_grace_secs() -> u64 {
    10
}

fn default_health_timeout_secs() -> u64 {
    3
}

fn default_load_timeout_secs() -> u64 {
    30
}

fn default_call_timeout_secs() -> u64 {
    15
}

fn default_min_query_len() -> usize {
    2
}

fn default_provider_timeout_secs() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.max_log_files, 7);
        assert!(config.logging.stdout);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.sidecar.port, 8765);
        assert_eq!(config.sidecar.load_timeout(), Duration::from_secs(30));
        assert_eq!(config.search.min_query_len, 2);
    }

    #[test]
    fn invalid_version_rejected() {
        let mut config = Config::default();
        config.config_version = CURRENT_CONFIG_VERSION + 1;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            repositories = ["https://example.org/repo.json"]

            [sidecar]
            port = 9000
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.sidecar.port, 9000);
        assert!(config.sidecar.autostart);
        assert_eq!(config.sidecar.base_url(), "http://127.0.0.1:9000");
        assert_eq!(config.search.provider_timeout_secs, 15);
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = Config::default();
        config.search.provider_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::ZeroTimeout {
                field: "search.provider_timeout_secs"
            })
        ));
    }

    #[test]
    fn non_http_repository_rejected() {
        let mut config = Config::default();
        config.repositories.push("file:///etc/passwd".into());
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidRepository { .. })
        ));
    }
}
