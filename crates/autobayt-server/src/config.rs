//! Server configuration
//!
//! Read from a YAML file. Every key is optional:
//!
//! ```yaml
//! config_dir: ./config
//! api_base_url: https://api.autobayt.com/v1
//! scan_interval: 290
//! log_level: info
//! user_id: 65a1b2c3d4e5f60718293a4b
//! auto_confirm_discovery: false
//! http:
//!   bind: 127.0.0.1:8124
//!   static_dir: ./brands
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use autobayt::constants::{DEFAULT_SCAN_INTERVAL, USER_ID_LENGTH};
use autobayt_api::DEFAULT_BASE_URL;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "AUTOBAYT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "autobayt.yaml";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: SocketAddr,
    /// Directory holding the brand images
    pub static_dir: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8124)),
            static_dir: PathBuf::from("./brands"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `.storage` lives here
    pub config_dir: PathBuf,
    pub api_base_url: String,
    /// Poll interval in seconds
    pub scan_interval: u64,
    pub log_level: String,
    /// Account to set up when no account entry exists yet
    pub user_id: Option<String>,
    /// Confirm pending discovery flows on start-up
    pub auto_confirm_discovery: bool,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("./config"),
            api_base_url: DEFAULT_BASE_URL.to_string(),
            scan_interval: DEFAULT_SCAN_INTERVAL.as_secs(),
            log_level: "info".to_string(),
            user_id: None,
            auto_confirm_discovery: false,
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`; a missing file means defaults
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No configuration at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::ReadFile {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::from_yaml(&content, path)
    }

    pub fn from_yaml(content: &str, source_path: &Path) -> ConfigResult<Self> {
        // An empty file parses as null
        let config: Option<Config> =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source: e,
            })?;
        let config = config.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.scan_interval == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scan_interval".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if let Some(user_id) = &self.user_id {
            if user_id.chars().count() != USER_ID_LENGTH {
                return Err(ConfigError::InvalidValue {
                    key: "user_id".into(),
                    reason: format!("must be exactly {} characters", USER_ID_LENGTH),
                });
            }
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }
}

/// Configuration path: first argument, then `AUTOBAYT_CONFIG`, then `autobayt.yaml`
pub fn config_path(arg: Option<String>, env: Option<String>) -> PathBuf {
    arg.or(env)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> ConfigResult<Config> {
        Config::from_yaml(yaml, Path::new("autobayt.yaml"))
    }

    #[test]
    fn test_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.api_base_url, "https://api.autobayt.com/v1");
        assert_eq!(config.scan_interval(), Duration::from_secs(290));
        assert_eq!(config.http.bind.port(), 8124);
        assert!(!config.auto_confirm_discovery);
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
config_dir: /var/lib/autobayt
api_base_url: http://localhost:9000/v1
scan_interval: 60
log_level: debug
user_id: 65a1b2c3d4e5f60718293a4b
auto_confirm_discovery: true
http:
  bind: 0.0.0.0:8200
"#,
        )
        .unwrap();

        assert_eq!(config.config_dir, PathBuf::from("/var/lib/autobayt"));
        assert_eq!(config.scan_interval(), Duration::from_secs(60));
        assert_eq!(config.user_id.as_deref(), Some("65a1b2c3d4e5f60718293a4b"));
        assert!(config.auto_confirm_discovery);
        assert_eq!(config.http.bind.to_string(), "0.0.0.0:8200");
        // Missing nested keys keep their defaults
        assert_eq!(config.http.static_dir, PathBuf::from("./brands"));
    }

    #[test]
    fn test_validation() {
        let err = parse("scan_interval: 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "scan_interval"));

        let err = parse("user_id: abc").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "user_id"));

        assert!(matches!(
            parse("scan_interval: [1, 2]").unwrap_err(),
            ConfigError::ParseYaml { .. }
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::load(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(missing, Config::default());

        let path = dir.path().join("autobayt.yaml");
        std::fs::write(&path, "log_level: warn\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_config_path() {
        assert_eq!(
            config_path(Some("a.yaml".into()), Some("b.yaml".into())),
            PathBuf::from("a.yaml")
        );
        assert_eq!(config_path(None, Some("b.yaml".into())), PathBuf::from("b.yaml"));
        assert_eq!(config_path(None, None), PathBuf::from("autobayt.yaml"));
    }
}
