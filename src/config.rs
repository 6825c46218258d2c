//! Pipeline configuration loaded from `pipeline.toml`.
//!
//! [`PipelineConfig`] holds every tunable of the orchestrator. Fields missing
//! from the file fall back to defaults, and the `MLPIPE_STORAGE_DIR` /
//! `MLPIPE_DATABASE_PATH` environment variables take precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::queue::RetryPolicy;

const CONFIG_FILE: &str = "pipeline.toml";
const STORAGE_DIR_ENV: &str = "MLPIPE_STORAGE_DIR";
const DATABASE_PATH_ENV: &str = "MLPIPE_DATABASE_PATH";

/// Top-level configuration loaded from `pipeline.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Root directory holding `datasets/` and `models/`.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// SQLite file backing the lineage repository.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Number of queue workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum retries of a transient failure before a task fails terminally.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay before a retried task is re-delivered.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How often the CLI polls task status.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long finished tasks stay queryable before they are evicted.
    #[serde(default = "default_task_retention_secs")]
    pub task_retention_secs: u64,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("storage/lineage.db")
}

fn default_workers() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_task_retention_secs() -> u64 {
    3600
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_path: default_database_path(),
            workers: default_workers(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            task_retention_secs: default_task_retention_secs(),
        }
    }
}

impl PipelineConfig {
    /// Load `pipeline.toml` from the current directory, or defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Load configuration from an explicit path, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<PipelineConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(STORAGE_DIR_ENV)
            && !dir.is_empty()
        {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Ok(db) = std::env::var(DATABASE_PATH_ENV)
            && !db.is_empty()
        {
            self.database_path = PathBuf::from(db);
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }
}
