//! Service configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Similar-job cache window in seconds. Zero disables the cache.
    #[serde(default = "default_job_cache_secs")]
    pub job_cache_secs: u64,
    /// Maximum number of analyzer subprocesses running at once.
    #[serde(default = "default_analyzer_workers")]
    pub analyzer_workers: usize,
    /// Wall-clock limit for one analyzer run. `None` lets analyzers run
    /// unbounded.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    /// Cap on captured bytes per analyzer output stream.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// InProgress jobs older than this are failed by the recovery
    /// scanner at startup.
    #[serde(default = "default_stale_job_secs")]
    pub stale_job_secs: u64,
}

fn default_job_cache_secs() -> u64 {
    600
}

fn default_analyzer_workers() -> usize {
    4
}

fn default_max_output_bytes() -> usize {
    1_048_576
}

fn default_stale_job_secs() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            job_cache_secs: default_job_cache_secs(),
            analyzer_workers: default_analyzer_workers(),
            run_timeout_secs: None,
            max_output_bytes: default_max_output_bytes(),
            stale_job_secs: default_stale_job_secs(),
        }
    }
}

impl Config {
    /// The cache window, or `None` when the cache is disabled.
    pub fn cache_ttl(&self) -> Option<chrono::Duration> {
        if self.job_cache_secs == 0 {
            None
        } else {
            Some(chrono::Duration::seconds(self.job_cache_secs as i64))
        }
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.analyzer_workers == 0 {
        return Err(ConfigError::Validation {
            message: "analyzerWorkers must be at least 1".to_string(),
        });
    }
    if config.max_output_bytes < 8192 {
        return Err(ConfigError::Validation {
            message: "maxOutputBytes must be at least 8192".to_string(),
        });
    }
    if config.run_timeout_secs == Some(0) {
        return Err(ConfigError::Validation {
            message: "runTimeoutSecs must be absent or positive".to_string(),
        });
    }
    Ok(())
}
