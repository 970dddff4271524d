//! Append-only journal of per-file executions.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::clock::{next_sequence, unix_nanos};
use crate::layer::{LayerId, LayerOutcome};
use crate::runner::ExecutionMode;

/// One layer's entry in an [`ExecutionState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSummary {
    /// Layer number.
    pub id: LayerId,
    /// Layer name.
    pub name: String,
    /// Outcome label: applied, unchanged, reverted, or failed.
    pub status: String,
    /// Whether the layer ran without error.
    pub success: bool,
    /// Committed changes.
    pub changes: Vec<layerfix_syntax::Change>,
    /// Warning messages.
    pub warnings: Vec<String>,
    /// Invocations made, including retries.
    pub attempts: u32,
}

impl From<&LayerOutcome> for LayerSummary {
    fn from(outcome: &LayerOutcome) -> Self {
        Self {
            id: outcome.id,
            name: outcome.id.name().to_owned(),
            status: outcome.status.label().to_owned(),
            success: outcome.status.is_success(),
            changes: outcome.changes.clone(),
            warnings: outcome
                .warnings
                .iter()
                .map(|warning| warning.message.clone())
                .collect(),
            attempts: outcome.attempts,
        }
    }
}

/// The journal record of one file execution. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    /// Nanoseconds since the Unix epoch when the execution started.
    pub timestamp: u64,
    /// The file that was processed.
    pub file: PathBuf,
    /// Whether files were rewritten or only analysed.
    pub mode: ExecutionMode,
    /// Whether writes and snapshots were suppressed.
    pub dry_run: bool,
    /// Per-layer results in execution order.
    pub layers_run: Vec<LayerSummary>,
    /// Snapshots taken during the execution.
    pub backups: Vec<PathBuf>,
    /// Sum of committed changes.
    pub total_changes: usize,
    /// Wall-clock duration.
    pub execution_time_ms: u64,
    /// Whether cancellation stopped the execution early.
    pub cancelled: bool,
    /// The error that aborted the execution, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
}

/// Writes [`ExecutionState`] records into a directory.
#[derive(Debug, Clone)]
pub struct StateRecorder {
    dir: PathBuf,
}

impl StateRecorder {
    /// Creates a recorder writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The journal directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `state` as a new journal entry.
    ///
    /// Failures are logged and swallowed: journalling never fails a run.
    pub fn record(&self, state: &ExecutionState) -> Option<PathBuf> {
        match self.try_record(state) {
            Ok(path) => {
                tracing::debug!(
                    target: "layerfix::journal",
                    event = "state_recorded",
                    path = %path.display(),
                    file = %state.file.display(),
                    "execution state recorded"
                );
                Some(path)
            }
            Err(error) => {
                tracing::warn!(
                    target: "layerfix::journal",
                    event = "state_record_failed",
                    dir = %self.dir.display(),
                    file = %state.file.display(),
                    %error,
                    "failed to record execution state"
                );
                None
            }
        }
    }

    fn try_record(&self, state: &ExecutionState) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!(
            "state-{}-{}.json",
            unix_nanos(SystemTime::now()),
            next_sequence()
        ));
        let json = serde_json::to_vec_pretty(state).map_err(io::Error::other)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(path)
    }

    /// Reads every journal entry, oldest first.
    ///
    /// Unreadable entries are skipped with a warning. A missing directory
    /// yields no entries.
    #[must_use]
    pub fn load_all(&self) -> Vec<ExecutionState> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) => {
                if error.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(
                        target: "layerfix::journal",
                        dir = %self.dir.display(),
                        %error,
                        "failed to read journal directory"
                    );
                }
                return Vec::new();
            }
        };

        let mut states: Vec<ExecutionState> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_journal_entry(path))
            .filter_map(|path| match read_state(&path) {
                Ok(state) => Some(state),
                Err(error) => {
                    tracing::warn!(
                        target: "layerfix::journal",
                        path = %path.display(),
                        %error,
                        "skipping unreadable journal entry"
                    );
                    None
                }
            })
            .collect();
        states.sort_by_key(|state| state.timestamp);
        states
    }
}

fn is_journal_entry(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("state-") && name.ends_with(".json"))
}

fn read_state(path: &Path) -> io::Result<ExecutionState> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerStatus;
    use layerfix_syntax::{Change, Warning};
    use tempfile::TempDir;

    fn state(file: &str, timestamp: u64) -> ExecutionState {
        ExecutionState {
            timestamp,
            file: PathBuf::from(file),
            mode: ExecutionMode::Fix,
            dry_run: false,
            layers_run: Vec::new(),
            backups: Vec::new(),
            total_changes: 0,
            execution_time_ms: 3,
            cancelled: false,
            fatal_error: None,
        }
    }

    #[test]
    fn records_are_written_and_reloaded() {
        let dir = TempDir::new().expect("temp dir");
        let recorder = StateRecorder::new(dir.path().join("journal"));

        let first = recorder.record(&state("a.ts", 2)).expect("first");
        let second = recorder.record(&state("a.ts", 1)).expect("second");
        assert_ne!(first, second);

        let loaded = recorder.load_all();
        let files: Vec<_> = loaded.iter().map(|s| s.timestamp).collect();
        assert_eq!(files, vec![1, 2]);
    }

    #[test]
    fn serialises_camel_case_fields() {
        let json = serde_json::to_value(state("a.ts", 1)).expect("json");
        for key in ["layersRun", "totalChanges", "executionTimeMs", "dryRun"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json.get("mode").and_then(|v| v.as_str()), Some("fix"));
    }

    #[test]
    fn skips_unparseable_entries() {
        let dir = TempDir::new().expect("temp dir");
        let recorder = StateRecorder::new(dir.path());
        fs::write(dir.path().join("state-0-0.json"), "{ nope").expect("seed");
        recorder.record(&state("b.ts", 5)).expect("record");

        assert_eq!(recorder.load_all().len(), 1);
    }

    #[test]
    fn unwritable_directory_is_swallowed() {
        let dir = TempDir::new().expect("temp dir");
        let blocker = dir.path().join("journal");
        fs::write(&blocker, "not a directory").expect("seed");
        let recorder = StateRecorder::new(&blocker);

        assert!(recorder.record(&state("c.ts", 1)).is_none());
    }

    #[test]
    fn summary_carries_status_and_warnings() {
        let outcome = LayerOutcome {
            id: LayerId::Hydration,
            status: LayerStatus::Reverted {
                reason: "unbalanced".to_owned(),
            },
            changes: vec![Change::new("global-guard", "wrapped")],
            warnings: vec![Warning::new("heads up")],
            attempts: 1,
            backup: None,
        };
        let summary = LayerSummary::from(&outcome);
        assert_eq!(summary.name, "hydration");
        assert_eq!(summary.status, "reverted");
        assert!(!summary.success);
        assert_eq!(summary.warnings, vec!["heads up".to_owned()]);
    }
}
