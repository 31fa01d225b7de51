//! Layered configuration: defaults, optional TOML file, `DOCSYNC__*` environment.

use crate::error::Result;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name searched for when no explicit config path is given.
pub const CONFIG_FILE_NAME: &str = "docsync.toml";
const ENV_PREFIX: &str = "DOCSYNC";

/// Top-level worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Default `tracing` filter directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// When set, logs are also written to a daily-rolling file in this directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Connection settings for the system of record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Location of the search index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// LanceDB dataset directory.
    #[serde(default = "default_search_path")]
    pub path: PathBuf,
    #[serde(default = "default_search_table")]
    pub table: String,
}

/// Retry policy applied by the task dispatch boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before each retry, in seconds.
    #[serde(default = "default_countdown_secs")]
    pub countdown_secs: u64,
}

fn default_log_filter() -> String {
    "docsync=info".to_string()
}

fn default_database_url() -> String {
    "sqlite://docsync.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_search_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docsync")
        .join("index")
}

fn default_search_table() -> String {
    "index_entities".to_string()
}

fn default_max_retries() -> u32 {
    7
}

fn default_countdown_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            search: SearchConfig::default(),
            retry: RetryPolicy::default(),
            log_filter: default_log_filter(),
            log_dir: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            path: default_search_path(),
            table: default_search_table(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            countdown_secs: default_countdown_secs(),
        }
    }
}

impl RetryPolicy {
    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }
}

impl Config {
    /// Load configuration.
    ///
    /// With an explicit `path` the file must exist. Otherwise `docsync.toml`
    /// is looked up in the working directory and then in the user config
    /// directory; a missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                for candidate in Self::default_locations() {
                    builder = builder.add_source(config::File::from(candidate).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        tracing::debug!(
            database = %config.database.url,
            index = %config.search.path.display(),
            "configuration loaded"
        );
        Ok(config)
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            locations.push(dir.join("docsync").join(CONFIG_FILE_NAME));
        }
        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_queue_policy() {
        let config = Config::default();
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.countdown(), Duration::from_secs(5));
        assert_eq!(config.search.table, "index_entities");
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docsync.toml");
        std::fs::write(
            &path,
            "[database]\nurl = \"sqlite::memory:\"\n\n[retry]\nmax_retries = 2\n",
        )
        .expect("write config");

        let config = Config::load(Some(&path)).expect("load config");
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.countdown_secs, 5);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = Config::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
