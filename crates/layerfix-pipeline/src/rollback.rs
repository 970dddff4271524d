//! Rollback plans pairing rewritten files with their pre-run snapshots.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backup::BackupStore;
use crate::clock::{next_sequence, rfc3339, unix_nanos};
use crate::runner::FileReport;

/// Errors raised while persisting or applying a rollback plan.
#[derive(Debug, Error)]
pub enum RollbackError {
    /// Reading or writing the plan file failed.
    #[error("failed to access rollback plan {path}: {source}")]
    Io {
        /// The plan file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The plan file is not valid JSON.
    #[error("rollback plan {path} is malformed: {source}")]
    Format {
        /// The plan file.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// Confirmation was refused.
    #[error("rollback was not confirmed")]
    NotConfirmed,
}

impl RollbackError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One file to put back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackEntry {
    /// The rewritten file.
    pub original_path: PathBuf,
    /// Its first snapshot of the run.
    pub backup_path: PathBuf,
}

/// Everything needed to undo one `fix` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPlan {
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Files to restore.
    pub entries: Vec<RollbackEntry>,
    /// Files the run rewrote without a snapshot of their original content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unrestorable: Vec<PathBuf>,
}

/// Per-entry result of applying a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Files restored.
    pub restored: Vec<PathBuf>,
    /// Files that could not be restored, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Decides whether a plan may be applied.
pub trait Confirmation {
    /// Returns true to proceed with `plan`.
    fn confirm(&self, plan: &RollbackPlan) -> bool;
}

/// Confirms every plan, as `--yes` does.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirmation for AssumeYes {
    fn confirm(&self, _plan: &RollbackPlan) -> bool {
        true
    }
}

impl RollbackPlan {
    /// Builds a plan from the files a run wrote, pairing each with the
    /// snapshot of its content before the run.
    ///
    /// Written files without that snapshot are listed as unrestorable.
    #[must_use]
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a FileReport>) -> Self {
        let mut entries = Vec::new();
        let mut unrestorable = Vec::new();
        for report in reports.into_iter().filter(|report| report.written) {
            match &report.first_backup {
                Some(backup) => entries.push(RollbackEntry {
                    original_path: report.path.clone(),
                    backup_path: backup.clone(),
                }),
                None => {
                    tracing::warn!(
                        target: "layerfix::rollback",
                        event = "unrestorable_write",
                        path = %report.path.display(),
                        "file was rewritten without a pre-run snapshot"
                    );
                    unrestorable.push(report.path.clone());
                }
            }
        }
        Self {
            created_at: rfc3339(SystemTime::now()),
            entries,
            unrestorable,
        }
    }

    /// Returns true when the run rewrote nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.unrestorable.is_empty()
    }

    /// Writes the plan as `rollback-<nanos>-<seq>.json` under `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RollbackError::Io`] when the directory or file cannot be
    /// written.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, RollbackError> {
        fs::create_dir_all(dir).map_err(|source| RollbackError::io(dir, source))?;
        let path = dir.join(format!(
            "rollback-{}-{}.json",
            unix_nanos(SystemTime::now()),
            next_sequence()
        ));
        let json = serde_json::to_vec_pretty(self).map_err(|source| RollbackError::Format {
            path: path.clone(),
            source,
        })?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| RollbackError::io(&path, source))?;
        file.write_all(&json)
            .and_then(|()| file.sync_all())
            .map_err(|source| RollbackError::io(&path, source))?;
        tracing::info!(
            target: "layerfix::rollback",
            event = "plan_written",
            path = %path.display(),
            entries = self.entries.len(),
            "rollback plan written"
        );
        Ok(path)
    }

    /// Reads a plan written by [`RollbackPlan::write_to`].
    ///
    /// # Errors
    ///
    /// Returns [`RollbackError::Io`] or [`RollbackError::Format`].
    pub fn load(path: &Path) -> Result<Self, RollbackError> {
        let bytes = fs::read(path).map_err(|source| RollbackError::io(path, source))?;
        serde_json::from_slice(&bytes).map_err(|source| RollbackError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Restores every entry once `confirmation` agrees.
    ///
    /// Each restore is all-or-nothing; one failing entry does not stop the
    /// others. Unrestorable files are reported as failed.
    ///
    /// # Errors
    ///
    /// Returns [`RollbackError::NotConfirmed`] when confirmation is refused.
    pub fn apply(
        &self,
        store: &BackupStore,
        confirmation: &dyn Confirmation,
    ) -> Result<RollbackReport, RollbackError> {
        if !confirmation.confirm(self) {
            return Err(RollbackError::NotConfirmed);
        }
        let mut report = RollbackReport::default();
        for path in &self.unrestorable {
            report
                .failed
                .push((path.clone(), "no pre-run snapshot was taken".to_owned()));
        }
        for entry in &self.entries {
            match store.restore(&entry.backup_path, Some(&entry.original_path)) {
                Ok(path) => report.restored.push(path),
                Err(error) => {
                    tracing::warn!(
                        target: "layerfix::rollback",
                        event = "restore_failed",
                        path = %entry.original_path.display(),
                        backup = %entry.backup_path.display(),
                        %error,
                        "entry not restored"
                    );
                    report.failed.push((entry.original_path.clone(), error.to_string()));
                }
            }
        }
        tracing::info!(
            target: "layerfix::rollback",
            event = "plan_applied",
            restored = report.restored.len(),
            failed = report.failed.len(),
            "rollback finished"
        );
        Ok(report)
    }
}
