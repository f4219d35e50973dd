use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ConnectionId;

const CONFIG_DIR_ENV: &str = "SQLPAD_CONFIG_DIR";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disabled,
    #[default]
    Prefer,
    Require,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    #[default]
    EnvVar,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub id: ConnectionId,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub password_source: PasswordSource,
    #[serde(default)]
    pub tls_mode: TlsMode,
    #[serde(default)]
    pub tls_ca_cert_path: Option<String>,
}

impl ConnectionProfile {
    #[must_use]
    pub fn new(
        id: ConnectionId,
        name: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            host: host.into(),
            port: default_port(),
            user: user.into(),
            database: None,
            password_source: PasswordSource::EnvVar,
            tls_mode: TlsMode::Prefer,
            tls_ca_cert_path: None,
        }
    }
}

fn default_port() -> u16 {
    3306
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkbenchSettings {
    pub autosave_interval_secs: u64,
    pub default_page_size: u32,
    pub schema_cache_ttl_secs: u64,
    pub record_history: bool,
    pub max_execution_time_ms: u64,
}

impl Default for WorkbenchSettings {
    fn default() -> Self {
        Self {
            autosave_interval_secs: 30,
            default_page_size: 10,
            schema_cache_ttl_secs: 300,
            record_history: true,
            max_execution_time_ms: 10_000,
        }
    }
}

impl WorkbenchSettings {
    #[must_use]
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs.max(1))
    }

    #[must_use]
    pub fn schema_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkbenchConfig {
    #[serde(default)]
    pub workbench: WorkbenchSettings,
    #[serde(default)]
    pub connections: Vec<ConnectionProfile>,
}

impl WorkbenchConfig {
    #[must_use]
    pub fn connection(&self, connection_id: ConnectionId) -> Option<&ConnectionProfile> {
        self.connections
            .iter()
            .find(|profile| profile.id == connection_id)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for profile in &self.connections {
            if !seen.insert(profile.id) {
                return Err(ConfigError::DuplicateConnectionId {
                    path: path.to_path_buf(),
                    id: profile.id,
                });
            }
        }
        if self.workbench.default_page_size == 0 {
            return Err(ConfigError::InvalidPageSize {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config file at {path} declares connection id {id} more than once")]
    DuplicateConnectionId { path: PathBuf, id: ConnectionId },
    #[error("config file at {path} sets default_page_size to 0")]
    InvalidPageSize { path: PathBuf },
}

pub fn load_default() -> Result<(PathBuf, WorkbenchConfig), ConfigError> {
    let path = default_config_dir()?.join(CONFIG_FILE_NAME);
    let config = load_from_path(&path)?;
    Ok((path, config))
}

/// A missing or blank file yields the defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<WorkbenchConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(WorkbenchConfig::default());
    }

    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(WorkbenchConfig::default());
    }

    let config: WorkbenchConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate(path)?;
    Ok(config)
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(custom) = env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("sqlpad"))
}
