//! Configuration loading and typed config structures for the campaign planner.
//!
//! The canonical configuration lives in `campaign-config.yaml`. Every section
//! and every field has a default, so an empty file (or no file at all) yields
//! a working configuration.
//!
//! ```yaml
//! store:
//!   change_log_capacity: 100
//!   import_chunk_size: 250
//! events:
//!   history_capacity: 50
//! filter:
//!   slow_filter_threshold_ms: 50
//!   indexed_fields: [region, status, quarter]
//! data:
//!   snapshot_path: "data/campaigns.json"
//! logging:
//!   level: "info"
//!   json: false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use campaign_filter::{DEFAULT_INDEXED_FIELDS, FilterSettings};

/// Environment variable overriding `data.snapshot_path`.
pub const ENV_SNAPSHOT_PATH: &str = "CAMPAIGN_SNAPSHOT_PATH";

/// Environment variable overriding `logging.level`.
pub const ENV_LOG_LEVEL: &str = "CAMPAIGN_LOG_LEVEL";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level planner configuration, mirroring `campaign-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PlannerConfig {
    /// Record store tunables.
    #[serde(default)]
    pub store: StoreConfig,

    /// Event bus tunables.
    #[serde(default)]
    pub events: EventsConfig,

    /// Filter engine tunables.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Where the dataset comes from.
    #[serde(default)]
    pub data: DataConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PlannerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `CAMPAIGN_SNAPSHOT_PATH` overrides `data.snapshot_path`
    /// - `CAMPAIGN_LOG_LEVEL` overrides `logging.level`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config = Self::parse_without_env(yaml)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse_without_env(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit; treat it as all defaults.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Override values from the process environment when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override values from `lookup`, keyed by environment variable name.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_SNAPSHOT_PATH).filter(|v| !v.trim().is_empty()) {
            self.data.snapshot_path = PathBuf::from(path);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
    }
}

/// Record store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Entries kept by the change log before the oldest is evicted.
    #[serde(default = "default_change_log_capacity")]
    pub change_log_capacity: usize,

    /// Records prepared per chunk during a bulk import.
    #[serde(default = "default_import_chunk_size")]
    pub import_chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            change_log_capacity: default_change_log_capacity(),
            import_chunk_size: default_import_chunk_size(),
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventsConfig {
    /// Publish records kept for debugging.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

/// Filter engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilterConfig {
    /// Passes slower than this many milliseconds publish a performance
    /// warning.
    #[serde(default = "default_slow_filter_threshold_ms")]
    pub slow_filter_threshold_ms: u64,

    /// Fields kept in the secondary indexes.
    #[serde(default = "default_indexed_fields")]
    pub indexed_fields: Vec<String>,
}

impl FilterConfig {
    /// Engine settings derived from this section.
    pub fn settings(&self) -> FilterSettings {
        FilterSettings {
            slow_filter_threshold: Duration::from_millis(self.slow_filter_threshold_ms),
            indexed_fields: self.indexed_fields.clone(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            slow_filter_threshold_ms: default_slow_filter_threshold_ms(),
            indexed_fields: default_indexed_fields(),
        }
    }
}

/// Dataset location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataConfig {
    /// JSON snapshot (array of records) loaded at startup.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_change_log_capacity() -> usize {
    campaign_store::DEFAULT_CHANGE_LOG_CAPACITY
}

const fn default_import_chunk_size() -> usize {
    campaign_store::DEFAULT_IMPORT_CHUNK_SIZE
}

const fn default_history_capacity() -> usize {
    campaign_events::bus::DEFAULT_HISTORY_CAPACITY
}

const fn default_slow_filter_threshold_ms() -> u64 {
    50
}

fn default_indexed_fields() -> Vec<String> {
    DEFAULT_INDEXED_FIELDS.iter().map(|f| (*f).to_owned()).collect()
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/campaigns.json")
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PlannerConfig::default();
        assert_eq!(config.store.change_log_capacity, 100);
        assert_eq!(config.store.import_chunk_size, 250);
        assert_eq!(config.events.history_capacity, 50);
        assert_eq!(config.filter.slow_filter_threshold_ms, 50);
        assert!(config.filter.indexed_fields.contains(&"quarter".to_owned()));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
store:
  change_log_capacity: 20
  import_chunk_size: 10
events:
  history_capacity: 5
filter:
  slow_filter_threshold_ms: 120
  indexed_fields: [region, quarter]
data:
  snapshot_path: "fixtures/q3.json"
logging:
  level: "debug"
  json: true
"#;
        let config = PlannerConfig::parse_without_env(yaml).unwrap();
        assert_eq!(config.store.change_log_capacity, 20);
        assert_eq!(config.store.import_chunk_size, 10);
        assert_eq!(config.events.history_capacity, 5);
        assert_eq!(config.data.snapshot_path, PathBuf::from("fixtures/q3.json"));
        assert!(config.logging.json);

        let settings = config.filter.settings();
        assert_eq!(settings.slow_filter_threshold, Duration::from_millis(120));
        assert_eq!(settings.indexed_fields, vec!["region", "quarter"]);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = PlannerConfig::parse_without_env("filter:\n  slow_filter_threshold_ms: 75\n").unwrap();
        assert_eq!(config.filter.slow_filter_threshold_ms, 75);
        assert_eq!(config.filter.indexed_fields, default_indexed_fields());
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(PlannerConfig::parse_without_env("  \n").unwrap(), PlannerConfig::default());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let result = PlannerConfig::parse_without_env("store: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = PlannerConfig::default();
        config.apply_overrides_from(|key| match key {
            ENV_SNAPSHOT_PATH => Some("/tmp/override.json".to_owned()),
            ENV_LOG_LEVEL => Some("warn".to_owned()),
            _ => None,
        });
        assert_eq!(config.data.snapshot_path, PathBuf::from("/tmp/override.json"));
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = PlannerConfig::default();
        config.apply_overrides_from(|_| Some("   ".to_owned()));
        assert_eq!(config, PlannerConfig::default());
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = PlannerConfig::from_file(Path::new("/nonexistent/campaign-config.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
