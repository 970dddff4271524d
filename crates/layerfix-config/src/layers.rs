//! Raw values gathered by `ortho_config` before defaults and validation.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;

/// One flat record merged from the configuration file, `LAYERFIX_*`
/// environment variables and command-line flags, later layers winning.
///
/// Every field is optional. [`crate::Config::from_layers`] fills the gaps
/// with built-in defaults. Field names double as TOML keys, environment
/// suffixes (`LAYERFIX_BATCH_SIZE`) and long flags (`--batch-size`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "LAYERFIX")]
pub struct ConfigLayers {
    /// Root of backups, journal entries, rules, and rollback plans.
    pub state_dir: Option<Utf8PathBuf>,
    /// `tracing` filter directive.
    pub log_filter: Option<String>,
    /// Log output format.
    pub log_format: Option<LogFormat>,
    /// Maximum number of files processed at once.
    pub concurrency: Option<usize>,
    /// Files admitted per batch.
    pub batch_size: Option<usize>,
    /// Resident memory in MiB above which admission pauses.
    pub memory_threshold_mb: Option<u64>,
    /// Whether layers are snapshotted before they run.
    pub backups_enabled: Option<bool>,
    /// Whether layer output must also re-parse without new syntax errors.
    pub strict_parse_validation: Option<bool>,
    /// Occurrences required before a change becomes an adaptive rule.
    pub min_rule_frequency: Option<u32>,
    /// Feature flags passed to every layer.
    pub feature_flags: Option<Vec<String>>,
    /// Total attempts per layer invocation, including the first.
    pub retry_attempts: Option<u32>,
    /// Delay before the first retry, in milliseconds.
    pub retry_delay_ms: Option<u64>,
    /// Factor applied to the retry delay after each attempt.
    pub delay_multiplier: Option<u32>,
    /// Ceiling on any single retry delay, in milliseconds.
    pub delay_cap_ms: Option<u64>,
    /// Snapshots kept per original file by `backups prune`.
    pub keep_latest: Option<usize>,
    /// Age in days after which `backups prune` removes a snapshot.
    pub prune_after_days: Option<u64>,
}

/// Values supplied on the command line. `None` leaves the lower layers in
/// effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Explicit configuration file.
    pub config_path: Option<Utf8PathBuf>,
    /// State directory override.
    pub state_dir: Option<Utf8PathBuf>,
    /// Log filter override.
    pub log_filter: Option<String>,
    /// Log format override.
    pub log_format: Option<LogFormat>,
    /// Concurrency override.
    pub concurrency: Option<usize>,
}

impl ConfigOverrides {
    /// Renders the overrides as the argument list [`ConfigLayers`] parses,
    /// program name first.
    #[must_use]
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from("layerfix")];
        let mut push = |flag: &str, value: OsString| {
            args.push(OsString::from(flag));
            args.push(value);
        };
        if let Some(path) = &self.config_path {
            push("--config-path", path.as_os_str().to_owned());
        }
        if let Some(dir) = &self.state_dir {
            push("--state-dir", dir.as_os_str().to_owned());
        }
        if let Some(filter) = &self.log_filter {
            push("--log-filter", OsString::from(filter));
        }
        if let Some(format) = self.log_format {
            push("--log-format", OsString::from(format.to_string()));
        }
        if let Some(concurrency) = self.concurrency {
            push("--concurrency", OsString::from(concurrency.to_string()));
        }
        args
    }
}
