use std::env;

use camino::Utf8PathBuf;

#[cfg(unix)]
use libc::geteuid;

use crate::logging::LogFormat;

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default number of files processed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default number of files admitted per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default resident memory, in MiB, above which batch admission pauses.
pub const DEFAULT_MEMORY_THRESHOLD_MB: u64 = 1024;

/// Default number of identical successful changes needed to learn a rule.
pub const DEFAULT_MIN_RULE_FREQUENCY: u32 = 2;

/// Default maximum number of attempts per layer invocation.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay before the first retry, in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Default backoff multiplier between retries.
pub const DEFAULT_RETRY_MULTIPLIER: u32 = 2;

/// Default ceiling on a single retry delay, in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 2_000;

/// Default number of snapshots kept per file when pruning.
pub const DEFAULT_KEEP_LATEST: usize = 10;

/// Default maximum snapshot age in days when pruning.
pub const DEFAULT_MAX_AGE_DAYS: u64 = 30;

/// Default log filter expression used by the binary.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binary.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Computes the default state directory.
///
/// Prefers the platform state directory, then the local data directory, and
/// finally a per-user directory under the system temporary directory.
#[must_use]
pub fn default_state_dir() -> Utf8PathBuf {
    let (mut base, apply_namespace) = match platform_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };
    base.push("layerfix");
    if apply_namespace {
        if let Some(namespace) = user_namespace() {
            base.push(namespace);
        }
    }
    base
}

#[cfg(unix)]
fn platform_base_directory() -> Option<Utf8PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(not(unix))]
fn platform_base_directory() -> Option<Utf8PathBuf> {
    None
}

fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> Option<String> {
    let uid = unsafe { geteuid() };
    Some(format!("uid-{uid}"))
}

#[cfg(not(unix))]
fn user_namespace() -> Option<String> {
    None
}
