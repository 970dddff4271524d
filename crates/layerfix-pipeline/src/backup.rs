//! Content-addressed snapshots of files taken before each layer runs.
//!
//! Every snapshot is a `.bak` file holding the exact bytes of the buffer,
//! paired with a `.bak.json` sidecar describing where it came from. Both are
//! created with `create_new`, so an existing backup is never overwritten.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use layerfix_config::RetentionSettings;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::atomic::write_atomic;
use crate::clock::{next_sequence, rfc3339, unix_nanos};

const SNAPSHOT_EXTENSION: &str = "bak";
const SIDECAR_SUFFIX: &str = ".bak.json";
const SECONDS_PER_DAY: u64 = 86_400;

/// Errors raised by the backup store.
#[derive(Debug, Error)]
pub enum BackupError {
    /// A filesystem operation failed.
    #[error("backup I/O failed for {path}: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
    /// A sidecar could not be written or read as JSON.
    #[error("backup metadata at {path} is invalid: {source}")]
    Metadata {
        /// The sidecar path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The snapshot's bytes do not match the recorded hash.
    #[error("snapshot {path} is corrupt: expected sha256 {expected}, found {actual}")]
    HashMismatch {
        /// The snapshot path.
        path: PathBuf,
        /// The hash recorded at creation.
        expected: String,
        /// The hash of the bytes on disk.
        actual: String,
    },
    /// The snapshot is not valid UTF-8.
    #[error("snapshot {path} is not valid UTF-8")]
    NotUtf8 {
        /// The snapshot path.
        path: PathBuf,
    },
}

impl BackupError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Metadata stored next to each snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// Absolute path of the file the snapshot was taken from.
    pub original_path: PathBuf,
    /// Path of the snapshot file.
    pub backup_path: PathBuf,
    /// Creation time in nanoseconds since the Unix epoch.
    pub timestamp: u64,
    /// Process-wide sequence number breaking timestamp ties.
    pub sequence: u64,
    /// Creation time as RFC 3339.
    pub created_at: String,
    /// Why the snapshot was taken, such as `layer-4-hydration`.
    pub operation_tag: String,
    /// SHA-256 of the snapshot bytes, lowercase hex.
    pub content_hash: String,
    /// Snapshot length in bytes.
    pub size_bytes: u64,
}

/// Narrows [`BackupStore::list_backups`].
#[derive(Debug, Clone, Default)]
pub struct BackupFilter {
    /// Only snapshots of this file.
    pub original: Option<PathBuf>,
    /// Only snapshots with this tag.
    pub tag: Option<String>,
}

impl BackupFilter {
    /// Matches snapshots of `path`.
    #[must_use]
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        Self {
            original: Some(path.into()),
            tag: None,
        }
    }
}

/// Which snapshots [`BackupStore::prune`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Snapshots kept per original file, newest first.
    pub keep_latest: usize,
    /// Snapshots older than this are removed regardless of rank.
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    /// Builds a policy from configuration. Zero days disables the age check.
    #[must_use]
    pub fn from_settings(settings: &RetentionSettings) -> Self {
        let max_age = (settings.max_age_days > 0).then(|| {
            Duration::from_secs(settings.max_age_days.saturating_mul(SECONDS_PER_DAY))
        });
        Self {
            keep_latest: settings.keep_latest,
            max_age,
        }
    }
}

/// What a prune removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Snapshots deleted.
    pub removed: Vec<PathBuf>,
    /// Snapshots left in place.
    pub kept: usize,
    /// Snapshots that could not be deleted, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// A directory of snapshots.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    /// Creates a store rooted at `dir`. The directory is created on first
    /// write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding snapshots.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshots `content` as the current state of `original_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot or its sidecar cannot be created.
    pub fn create_backup(
        &self,
        original_path: &Path,
        content: &[u8],
        tag: &str,
    ) -> Result<BackupRecord, BackupError> {
        fs::create_dir_all(&self.dir).map_err(|error| BackupError::io(&self.dir, error))?;

        let original_path =
            std::path::absolute(original_path).map_err(|error| BackupError::io(original_path, error))?;
        let now = SystemTime::now();
        let timestamp = unix_nanos(now);
        let sequence = next_sequence();
        let tag = sanitise_tag(tag);
        let file_name = original_path
            .file_name()
            .map_or_else(|| "buffer".to_owned(), |name| name.to_string_lossy().into_owned());
        let backup_path = self.dir.join(format!(
            "{file_name}.{tag}.{timestamp}-{sequence}.{SNAPSHOT_EXTENSION}"
        ));

        write_new(&backup_path, content)?;

        let record = BackupRecord {
            original_path,
            backup_path: backup_path.clone(),
            timestamp,
            sequence,
            created_at: rfc3339(now),
            operation_tag: tag,
            content_hash: sha256_hex(content),
            size_bytes: u64::try_from(content.len()).unwrap_or(u64::MAX),
        };

        let sidecar = sidecar_path(&backup_path);
        let written = serde_json::to_vec_pretty(&record)
            .map_err(|source| BackupError::Metadata {
                path: sidecar.clone(),
                source,
            })
            .and_then(|json| write_new(&sidecar, &json));
        if let Err(error) = written {
            if let Err(cleanup) = fs::remove_file(&backup_path) {
                tracing::warn!(
                    target: "layerfix::backup",
                    path = %backup_path.display(),
                    error = %cleanup,
                    "failed to remove orphaned snapshot"
                );
            }
            return Err(error);
        }

        tracing::debug!(
            target: "layerfix::backup",
            event = "backup_created",
            original = %record.original_path.display(),
            backup = %record.backup_path.display(),
            tag = %record.operation_tag,
            size_bytes = record.size_bytes,
            "snapshot written"
        );
        Ok(record)
    }

    /// Snapshots the file at `path` as it is on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the snapshot cannot be
    /// created.
    pub fn create_backup_of_file(&self, path: &Path, tag: &str) -> Result<BackupRecord, BackupError> {
        let content = fs::read(path).map_err(|error| BackupError::io(path, error))?;
        self.create_backup(path, &content, tag)
    }

    /// Lists snapshots matching `filter`, newest first.
    ///
    /// Sidecars that cannot be parsed are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<BackupRecord>, BackupError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(BackupError::io(&self.dir, error)),
        };

        let original = filter
            .original
            .as_deref()
            .map(|path| std::path::absolute(path).map_err(|error| BackupError::io(path, error)))
            .transpose()?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| BackupError::io(&self.dir, error))?;
            let path = entry.path();
            if !path.to_string_lossy().ends_with(SIDECAR_SUFFIX) {
                continue;
            }
            let record = match read_sidecar(&path) {
                Ok(record) => record,
                Err(error) => {
                    tracing::warn!(
                        target: "layerfix::backup",
                        path = %path.display(),
                        %error,
                        "skipping unreadable backup metadata"
                    );
                    continue;
                }
            };
            if original
                .as_ref()
                .is_some_and(|wanted| wanted != &record.original_path)
            {
                continue;
            }
            if filter
                .tag
                .as_ref()
                .is_some_and(|tag| tag != &record.operation_tag)
            {
                continue;
            }
            records.push(record);
        }

        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        Ok(records)
    }

    /// The newest snapshot of `path`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn latest_for(&self, path: &Path) -> Result<Option<BackupRecord>, BackupError> {
        Ok(self
            .list_backups(&BackupFilter::for_file(path))?
            .into_iter()
            .next())
    }

    /// Reads a snapshot after checking its hash.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::HashMismatch`] when the bytes on disk differ
    /// from the recorded hash.
    pub fn read_snapshot(&self, record: &BackupRecord) -> Result<String, BackupError> {
        let bytes =
            fs::read(&record.backup_path).map_err(|error| BackupError::io(&record.backup_path, error))?;
        let actual = sha256_hex(&bytes);
        if actual != record.content_hash {
            return Err(BackupError::HashMismatch {
                path: record.backup_path.clone(),
                expected: record.content_hash.clone(),
                actual,
            });
        }
        String::from_utf8(bytes).map_err(|_| BackupError::NotUtf8 {
            path: record.backup_path.clone(),
        })
    }

    /// Loads the record for the snapshot at `backup_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar is missing or invalid.
    pub fn record_for(&self, backup_path: &Path) -> Result<BackupRecord, BackupError> {
        read_sidecar(&sidecar_path(backup_path))
    }

    /// Restores the snapshot at `backup_path` to `target`, or to the file it
    /// was taken from when `target` is `None`.
    ///
    /// The hash is verified before anything is written and the target is
    /// replaced atomically. On any error the target is untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar is unreadable, the hash does not match,
    /// or the target cannot be written.
    pub fn restore(&self, backup_path: &Path, target: Option<&Path>) -> Result<PathBuf, BackupError> {
        let record = self.record_for(backup_path)?;
        let content = self.read_snapshot(&record)?;
        let target = target.map_or_else(|| record.original_path.clone(), Path::to_path_buf);

        write_atomic(&target, content.as_bytes()).map_err(|error| BackupError::io(&target, error))?;

        tracing::info!(
            target: "layerfix::backup",
            event = "backup_restored",
            backup = %backup_path.display(),
            target = %target.display(),
            "snapshot restored"
        );
        Ok(target)
    }

    /// Removes snapshots the policy no longer keeps.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn prune(&self, policy: &RetentionPolicy) -> Result<PruneReport, BackupError> {
        self.prune_at(policy, SystemTime::now())
    }

    /// [`BackupStore::prune`] against an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn prune_at(&self, policy: &RetentionPolicy, now: SystemTime) -> Result<PruneReport, BackupError> {
        let mut groups: BTreeMap<PathBuf, Vec<BackupRecord>> = BTreeMap::new();
        for record in self.list_backups(&BackupFilter::default())? {
            groups
                .entry(record.original_path.clone())
                .or_default()
                .push(record);
        }

        let now = unix_nanos(now);
        let max_age = policy
            .max_age
            .map(|age| u64::try_from(age.as_nanos()).unwrap_or(u64::MAX));
        let mut report = PruneReport::default();

        for records in groups.values() {
            for (rank, record) in records.iter().enumerate() {
                let too_old = max_age.is_some_and(|age| now.saturating_sub(record.timestamp) > age);
                if rank < policy.keep_latest && !too_old {
                    report.kept += 1;
                    continue;
                }
                match remove_snapshot(record) {
                    Ok(()) => report.removed.push(record.backup_path.clone()),
                    Err(error) => report
                        .failed
                        .push((record.backup_path.clone(), error.to_string())),
                }
            }
        }

        tracing::info!(
            target: "layerfix::backup",
            event = "backups_pruned",
            removed = report.removed.len(),
            kept = report.kept,
            failed = report.failed.len(),
            "pruned snapshots"
        );
        Ok(report)
    }
}

fn sidecar_path(backup_path: &Path) -> PathBuf {
    let mut name = backup_path.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}

fn read_sidecar(path: &Path) -> Result<BackupRecord, BackupError> {
    let bytes = fs::read(path).map_err(|error| BackupError::io(path, error))?;
    serde_json::from_slice(&bytes).map_err(|source| BackupError::Metadata {
        path: path.to_path_buf(),
        source,
    })
}

fn write_new(path: &Path, content: &[u8]) -> Result<(), BackupError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|error| BackupError::io(path, error))?;
    file.write_all(content)
        .and_then(|()| file.sync_all())
        .map_err(|error| BackupError::io(path, error))
}

fn remove_snapshot(record: &BackupRecord) -> Result<(), BackupError> {
    fs::remove_file(&record.backup_path)
        .map_err(|error| BackupError::io(&record.backup_path, error))?;
    let sidecar = sidecar_path(&record.backup_path);
    fs::remove_file(&sidecar).map_err(|error| BackupError::io(sidecar, error))
}

/// Keeps tags safe for use inside a file name.
fn sanitise_tag(tag: &str) -> String {
    let cleaned: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "manual".to_owned()
    } else {
        cleaned
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
