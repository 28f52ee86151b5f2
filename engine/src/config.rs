use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;
use thiserror::Error;
use toml::de::Error as TomlError;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "OPAL_CONFIG";

/// Overrides `node.bind`.
pub const BIND_ENV: &str = "OPAL_BIND";

pub const DEFAULT_BIND: &str = "127.0.0.1:9470";
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_LOG_FILTER: &str = "info";

const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_request_timeout_secs() -> u64 {
    120
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OpalConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Remote node settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeConfig {
    /// Listen address, `host:port`.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Requests with larger bodies are rejected before decoding.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl NodeConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind.parse().map_err(|_| ConfigError::InvalidBind {
            value: self.bind.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: TomlError,
    },
    #[error("invalid bind address {value:?}")]
    InvalidBind { value: String },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::InvalidBind { .. } => None,
        }
    }
}

impl OpalConfig {
    /// Load from the default location, then apply environment overrides.
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_bind_override(env::var(BIND_ENV).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    pub fn apply_bind_override(&mut self, bind: Option<String>) {
        if let Some(bind) = bind.filter(|b| !b.trim().is_empty()) {
            tracing::debug!(bind = %bind, "bind address overridden from environment");
            self.node.bind = bind;
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".opal").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::{ConfigError, DEFAULT_BIND, OpalConfig};

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = OpalConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, OpalConfig::default());
        assert_eq!(config.node.bind, DEFAULT_BIND);
        assert_eq!(config.client.request_timeout_secs, 120);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[node]\nbind = \"0.0.0.0:8000\"\n\n[client]\nconnect_timeout_secs = 3\n",
        )
        .unwrap();

        let config = OpalConfig::load_from(&path).unwrap();
        assert_eq!(config.node.bind, "0.0.0.0:8000");
        assert_eq!(config.node.max_body_bytes, 1024 * 1024);
        assert_eq!(config.client.connect_timeout_secs, 3);
        assert_eq!(config.client.request_timeout_secs, 120);
        assert_eq!(config.node.bind_addr().unwrap().port(), 8000);
    }

    #[test]
    fn malformed_file_reports_parse_error_with_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[node\nbind = 1").unwrap();

        let err = OpalConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), Some(path.as_path()));
    }

    #[test]
    fn bind_override_replaces_configured_address() {
        let mut config = OpalConfig::default();
        config.apply_bind_override(Some("127.0.0.1:1".to_string()));
        assert_eq!(config.node.bind, "127.0.0.1:1");

        config.apply_bind_override(Some("  ".to_string()));
        config.apply_bind_override(None);
        assert_eq!(config.node.bind, "127.0.0.1:1");
    }

    #[test]
    fn invalid_bind_is_rejected() {
        let mut config = OpalConfig::default();
        config.node.bind = "not-an-address".to_string();
        assert!(matches!(
            config.node.bind_addr(),
            Err(ConfigError::InvalidBind { .. })
        ));
    }
}
