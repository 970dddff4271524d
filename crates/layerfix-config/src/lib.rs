//! Shared configuration for the layerfix pipeline and CLI.
//!
//! `ortho_config` merges a TOML configuration file, `LAYERFIX_*` environment
//! variables and command-line flags into [`ConfigLayers`], later layers
//! winning. [`Config::from_layers`] fills whatever is still unset with the
//! built-in defaults, and the result is validated once so invalid settings
//! fail before any file is touched.

mod defaults;
mod error;
mod layers;
mod logging;
mod paths;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, DEFAULT_KEEP_LATEST, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_AGE_DAYS, DEFAULT_MEMORY_THRESHOLD_MB, DEFAULT_MIN_RULE_FREQUENCY,
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS,
    DEFAULT_RETRY_MULTIPLIER, default_log_filter, default_log_filter_string, default_log_format,
    default_state_dir,
};
pub use error::ConfigError;
pub use layers::{ConfigLayers, ConfigOverrides};
pub use logging::{LogFormat, LogFormatParseError};
pub use paths::{StatePaths, StatePathsError};

/// Retry behaviour for layer invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Factor applied to the delay after each retry.
    pub multiplier: u32,
    /// Ceiling on any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

/// Snapshot retention used by `backups prune`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Snapshots kept per original file, newest first.
    pub keep_latest: usize,
    /// Snapshots older than this many days are removed. Zero disables the
    /// age check.
    pub max_age_days: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            keep_latest: DEFAULT_KEEP_LATEST,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }
}

/// Merged configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root of backups, journal entries, rules, and rollback plans.
    pub state_dir: Utf8PathBuf,
    /// `tracing` filter directive.
    pub log_filter: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Maximum number of files processed at once.
    pub concurrency: usize,
    /// Files admitted per batch.
    pub batch_size: usize,
    /// Resident memory in MiB above which admission pauses.
    pub memory_threshold_mb: u64,
    /// Whether layers are snapshotted before they run.
    pub backups_enabled: bool,
    /// Whether layer output must also re-parse without new syntax errors.
    pub strict_parse_validation: bool,
    /// Occurrences required before a change becomes an adaptive rule.
    pub min_rule_frequency: u32,
    /// Feature flags passed to every layer.
    pub feature_flags: Vec<String>,
    /// Layer retry policy.
    pub retry: RetrySettings,
    /// Backup retention policy.
    pub retention: RetentionSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            memory_threshold_mb: DEFAULT_MEMORY_THRESHOLD_MB,
            backups_enabled: true,
            strict_parse_validation: false,
            min_rule_frequency: DEFAULT_MIN_RULE_FREQUENCY,
            feature_flags: Vec::new(),
            retry: RetrySettings::default(),
            retention: RetentionSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the configuration file and the process
    /// environment, applying `overrides` last.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a layer cannot be read or parsed and
    /// [`ConfigError::Invalid`] when the merged values fail validation.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let layers = ConfigLayers::load_from_iter(overrides.to_args()).map_err(ConfigError::Load)?;
        let config = Self::from_layers(layers);
        config.validate()?;
        Ok(config)
    }

    /// Fills every unset layer value with its built-in default.
    #[must_use]
    pub fn from_layers(layers: ConfigLayers) -> Self {
        let defaults = Self::default();
        Self {
            state_dir: layers.state_dir.unwrap_or(defaults.state_dir),
            log_filter: layers.log_filter.unwrap_or(defaults.log_filter),
            log_format: layers.log_format.unwrap_or(defaults.log_format),
            concurrency: layers.concurrency.unwrap_or(defaults.concurrency),
            batch_size: layers.batch_size.unwrap_or(defaults.batch_size),
            memory_threshold_mb: layers
                .memory_threshold_mb
                .unwrap_or(defaults.memory_threshold_mb),
            backups_enabled: layers.backups_enabled.unwrap_or(defaults.backups_enabled),
            strict_parse_validation: layers
                .strict_parse_validation
                .unwrap_or(defaults.strict_parse_validation),
            min_rule_frequency: layers
                .min_rule_frequency
                .unwrap_or(defaults.min_rule_frequency),
            feature_flags: layers.feature_flags.unwrap_or(defaults.feature_flags),
            retry: RetrySettings {
                max_attempts: layers.retry_attempts.unwrap_or(defaults.retry.max_attempts),
                base_delay_ms: layers.retry_delay_ms.unwrap_or(defaults.retry.base_delay_ms),
                multiplier: layers.delay_multiplier.unwrap_or(defaults.retry.multiplier),
                max_delay_ms: layers.delay_cap_ms.unwrap_or(defaults.retry.max_delay_ms),
            },
            retention: RetentionSettings {
                keep_latest: layers.keep_latest.unwrap_or(defaults.retention.keep_latest),
                max_age_days: layers
                    .prune_after_days
                    .unwrap_or(defaults.retention.max_age_days),
            },
        }
    }

    /// Checks the merged values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first unusable field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.multiplier == 0 {
            return Err(ConfigError::invalid("retry.multiplier", "must be at least 1"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                "must not be below retry.base_delay_ms",
            ));
        }
        if self.min_rule_frequency == 0 {
            return Err(ConfigError::invalid("min_rule_frequency", "must be at least 1"));
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::invalid("log_filter", "must not be empty"));
        }
        if self.feature_flags.iter().any(|flag| flag.trim().is_empty()) {
            return Err(ConfigError::invalid("feature_flags", "must not contain empty names"));
        }
        if self.state_dir.as_str().is_empty() {
            return Err(ConfigError::invalid("state_dir", "must not be empty"));
        }
        Ok(())
    }

    /// The configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// The configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
