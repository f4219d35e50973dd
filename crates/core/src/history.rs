use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{default_config_dir, ConfigError};
use crate::ConnectionId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Succeeded,
    Failed,
}

/// One execution attempt that reached the Query Engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub timestamp_unix_ms: u128,
    pub connection_id: ConnectionId,
    pub tab_name: String,
    pub sql: String,
    pub page: u32,
    pub outcome: HistoryOutcome,
    pub execution_time_ms: Option<f64>,
    pub error: Option<String>,
}

#[must_use]
pub fn unix_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to resolve default config path: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid history path `{0}`")]
    InvalidPath(PathBuf),
    #[error("failed to create history directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize history record: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append history record at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read history at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait QueryHistory: Send + Sync {
    fn record(&self, record: &HistoryRecord) -> Result<(), HistoryError>;
}

/// Newline-delimited JSON log of executed queries.
#[derive(Debug, Clone)]
pub struct FileQueryHistory {
    path: PathBuf,
}

impl FileQueryHistory {
    pub fn load_default() -> Result<Self, HistoryError> {
        Ok(Self {
            path: default_config_dir()?.join("history.ndjson"),
        })
    }

    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Most recent records last. Lines that fail to parse are skipped.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| HistoryError::Read {
            path: self.path.clone(),
            source,
        })?;

        let records = content
            .lines()
            .filter_map(|line| serde_json::from_str::<HistoryRecord>(line).ok())
            .collect::<Vec<_>>();
        let skip = records.len().saturating_sub(limit);
        Ok(records.into_iter().skip(skip).collect())
    }
}

impl QueryHistory for FileQueryHistory {
    fn record(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let parent_dir = self
            .path
            .parent()
            .ok_or_else(|| HistoryError::InvalidPath(self.path.clone()))?;
        fs::create_dir_all(parent_dir).map_err(|source| HistoryError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;

        let rendered =
            serde_json::to_string(record).map_err(|source| HistoryError::Serialize { source })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| HistoryError::Write {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{rendered}").map_err(|source| HistoryError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
