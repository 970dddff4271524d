//! File-level execution and the bounded batch runner.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::cancel::CancellationToken;
use crate::clock::unix_nanos;
use crate::journal::{ExecutionState, LayerSummary, StateRecorder};
use crate::layer::{FeatureFlags, LayerId, LayerOutcome, LayerStatus, PipelineContext};
use crate::memory::{MemorySampler, ProcMemorySampler};
use crate::orchestrator::Orchestrator;

/// Whether files are rewritten or only inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Report what would change without snapshots or writes.
    Analyze,
    /// Rewrite files in place.
    Fix,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Analyze => "analyze",
            Self::Fix => "fix",
        })
    }
}

/// Per-run execution settings shared by every file.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Analyze or fix.
    pub mode: ExecutionMode,
    /// Resolved layers, ascending.
    pub layers: Vec<LayerId>,
    /// Suppress snapshots and writes in fix mode.
    pub dry_run: bool,
    /// Log every committed change.
    pub verbose: bool,
    /// Flags handed to the layers.
    pub feature_flags: FeatureFlags,
}

impl ExecutionOptions {
    /// Options for `mode` over every layer.
    #[must_use]
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            layers: LayerId::ALL.to_vec(),
            dry_run: false,
            verbose: false,
            feature_flags: FeatureFlags::new(),
        }
    }

    /// True when nothing may be written: analyze mode or a dry run.
    #[must_use]
    pub fn suppresses_writes(&self) -> bool {
        self.mode == ExecutionMode::Analyze || self.dry_run
    }
}

/// How one file's execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Every layer ran and none had anything to change.
    NothingToFix,
    /// At least one layer was applied.
    Fixed,
    /// Nothing was applied and at least one layer was reverted.
    RolledBack,
    /// Nothing was applied or reverted and at least one layer failed.
    Failed,
    /// The file could not be read or written.
    Fatal,
    /// Cancellation stopped the file before anything was applied.
    Cancelled,
}

impl FileStatus {
    /// Lowercase label for summaries.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NothingToFix => "nothing to fix",
            Self::Fixed => "fixed",
            Self::RolledBack => "rolled back",
            Self::Failed => "failed",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Summary of one file's execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    /// The file processed.
    pub path: PathBuf,
    /// Classification of the run.
    pub status: FileStatus,
    /// Layers applied.
    pub applied: usize,
    /// Layers reverted.
    pub reverted: usize,
    /// Layers failed.
    pub failed: usize,
    /// Layers that ran without changes.
    pub unchanged: usize,
    /// Committed changes across layers.
    pub total_changes: usize,
    /// Snapshot holding the file as it was before the run, if one was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_backup: Option<PathBuf>,
    /// Whether the file on disk was rewritten.
    pub written: bool,
    /// Per-layer outcomes.
    pub outcomes: Vec<LayerOutcome>,
    /// The fatal error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileReport {
    fn fatal(path: &Path, error: String) -> Self {
        Self {
            path: path.to_path_buf(),
            status: FileStatus::Fatal,
            applied: 0,
            reverted: 0,
            failed: 0,
            unchanged: 0,
            total_changes: 0,
            first_backup: None,
            written: false,
            outcomes: Vec::new(),
            error: Some(error),
        }
    }
}

/// Classifies a run from its outcomes.
fn classify(outcomes: &[LayerOutcome], cancelled: bool, fatal: bool) -> FileStatus {
    let count = |wanted: fn(&LayerStatus) -> bool| outcomes.iter().filter(|o| wanted(&o.status)).count();
    let applied = count(|s| matches!(s, LayerStatus::Applied));
    if fatal {
        FileStatus::Fatal
    } else if cancelled && applied == 0 {
        FileStatus::Cancelled
    } else if applied > 0 {
        FileStatus::Fixed
    } else if count(|s| matches!(s, LayerStatus::Reverted { .. })) > 0 {
        FileStatus::RolledBack
    } else if count(|s| matches!(s, LayerStatus::Failed { .. })) > 0 {
        FileStatus::Failed
    } else {
        FileStatus::NothingToFix
    }
}

/// Runs the orchestrator over one file at a time.
#[derive(Debug)]
pub struct FileExecutor {
    orchestrator: Orchestrator,
    recorder: Option<StateRecorder>,
    options: ExecutionOptions,
}

impl FileExecutor {
    /// Creates an executor.
    #[must_use]
    pub const fn new(orchestrator: Orchestrator, options: ExecutionOptions) -> Self {
        Self {
            orchestrator,
            recorder: None,
            options,
        }
    }

    /// Journals every execution through `recorder`.
    #[must_use]
    pub fn with_recorder(mut self, recorder: StateRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// The options every file runs with.
    #[must_use]
    pub const fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// The token the orchestrator checks between layers.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        self.orchestrator.cancellation()
    }

    /// Runs the configured layers over `path`.
    ///
    /// Problems with this file never escape as errors; they are reported
    /// through the returned [`FileReport`].
    pub fn execute(&self, path: &Path) -> FileReport {
        let started = Instant::now();
        let timestamp = unix_nanos(SystemTime::now());

        let code = match read_source(path) {
            Ok(code) => code,
            Err(error) => {
                let report = FileReport::fatal(path, error);
                self.journal(timestamp, started, &report, &[], false);
                log_report(&report);
                return report;
            }
        };

        let mut ctx = PipelineContext::new(path)
            .with_dry_run(self.options.suppresses_writes())
            .with_verbose(self.options.verbose)
            .with_feature_flags(self.options.feature_flags.clone());
        let output = self
            .orchestrator
            .run_layers(&code, &self.options.layers, &mut ctx);

        let mut written = false;
        let mut error = None;
        if !ctx.dry_run && output.changed() && output.final_code != code {
            match write_atomic(path, output.final_code.as_bytes()) {
                Ok(()) => written = true,
                Err(write_error) => {
                    error = Some(format!("failed to write {}: {write_error}", path.display()));
                }
            }
        }

        let tally = |wanted: fn(&LayerStatus) -> bool| {
            output.outcomes.iter().filter(|o| wanted(&o.status)).count()
        };
        let report = FileReport {
            path: path.to_path_buf(),
            status: classify(&output.outcomes, output.cancelled, error.is_some()),
            applied: tally(|s| matches!(s, LayerStatus::Applied)),
            reverted: tally(|s| matches!(s, LayerStatus::Reverted { .. })),
            failed: tally(|s| matches!(s, LayerStatus::Failed { .. })),
            unchanged: tally(|s| matches!(s, LayerStatus::Unchanged)),
            total_changes: output.total_changes,
            first_backup: output.original_backup.clone(),
            written,
            outcomes: output.outcomes,
            error,
        };
        self.journal(timestamp, started, &report, &output.backups, output.cancelled);
        log_report(&report);
        report
    }

    fn journal(
        &self,
        timestamp: u64,
        started: Instant,
        report: &FileReport,
        backups: &[PathBuf],
        cancelled: bool,
    ) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let state = ExecutionState {
            timestamp,
            file: report.path.clone(),
            mode: self.options.mode,
            dry_run: self.options.suppresses_writes(),
            layers_run: report.outcomes.iter().map(LayerSummary::from).collect(),
            backups: backups.to_vec(),
            total_changes: report.total_changes,
            execution_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            cancelled,
            fatal_error: report.error.clone(),
        };
        recorder.record(&state);
    }
}

fn read_source(path: &Path) -> Result<String, String> {
    let bytes = fs::read(path).map_err(|error| format!("failed to read {}: {error}", path.display()))?;
    String::from_utf8(bytes).map_err(|_| format!("{} is not valid UTF-8", path.display()))
}

fn log_report(report: &FileReport) {
    match report.status {
        FileStatus::Fatal => tracing::error!(
            target: "layerfix::batch",
            event = "file_fatal",
            path = %report.path.display(),
            error = report.error.as_deref().unwrap_or_default(),
            "file could not be processed"
        ),
        status => tracing::info!(
            target: "layerfix::batch",
            event = "file_processed",
            path = %report.path.display(),
            status = status.label(),
            applied = report.applied,
            reverted = report.reverted,
            failed = report.failed,
            changes = report.total_changes,
            written = report.written,
            "file processed"
        ),
    }
}

/// Results of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// One report per processed file, in input order.
    pub files: Vec<FileReport>,
    /// Files never started because of cancellation.
    pub skipped: Vec<PathBuf>,
    /// Whether cancellation was observed.
    pub cancelled: bool,
    /// Batches that waited for memory to drop.
    pub memory_pauses: u32,
}

impl BatchReport {
    /// Number of files with `status`.
    #[must_use]
    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|file| file.status == status).count()
    }

    /// Returns true when files were given and every one was fatal.
    #[must_use]
    pub fn all_fatal(&self) -> bool {
        !self.files.is_empty() && self.count(FileStatus::Fatal) == self.files.len()
    }

    /// Committed changes across every file.
    #[must_use]
    pub fn total_changes(&self) -> usize {
        self.files.iter().map(|file| file.total_changes).sum()
    }
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_MAX_POLLS: u32 = 25;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Runs files through a [`FileExecutor`] on a bounded pool of threads.
pub struct BatchRunner {
    executor: Arc<FileExecutor>,
    concurrency: usize,
    batch_size: usize,
    memory: Arc<dyn MemorySampler>,
    memory_threshold: u64,
    poll_interval: Duration,
    max_polls: u32,
}

impl BatchRunner {
    /// Creates a runner with default limits.
    #[must_use]
    pub fn new(executor: Arc<FileExecutor>) -> Self {
        Self {
            executor,
            concurrency: layerfix_config::DEFAULT_CONCURRENCY,
            batch_size: layerfix_config::DEFAULT_BATCH_SIZE,
            memory: Arc::new(ProcMemorySampler),
            memory_threshold: layerfix_config::DEFAULT_MEMORY_THRESHOLD_MB.saturating_mul(BYTES_PER_MB),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets how many files are admitted per batch.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the memory sampler and the threshold in megabytes above which
    /// admission pauses.
    #[must_use]
    pub fn with_memory_limit(mut self, sampler: Arc<dyn MemorySampler>, threshold_mb: u64) -> Self {
        self.memory = sampler;
        self.memory_threshold = threshold_mb.saturating_mul(BYTES_PER_MB);
        self
    }

    /// Sets how often and how many times to re-sample memory while paused.
    #[must_use]
    pub const fn with_memory_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    /// Processes `files`, each at most once.
    pub fn run(&self, files: &[PathBuf]) -> BatchReport {
        let files = dedupe(files);
        let cancel = self.executor.cancellation();
        let mut report = BatchReport::default();

        for (number, batch) in files.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                report.skipped.extend(batch.iter().cloned());
                continue;
            }
            if self.wait_for_memory(cancel) {
                report.memory_pauses = report.memory_pauses.saturating_add(1);
            }
            tracing::debug!(
                target: "layerfix::batch",
                event = "batch_starting",
                batch = number,
                files = batch.len(),
                "starting batch"
            );
            let (done, skipped) = self.run_batch(batch, cancel);
            report.files.extend(done);
            report.skipped.extend(skipped);
        }

        report.cancelled = cancel.is_cancelled();
        tracing::info!(
            target: "layerfix::batch",
            event = "batch_finished",
            files = report.files.len(),
            skipped = report.skipped.len(),
            fixed = report.count(FileStatus::Fixed),
            fatal = report.count(FileStatus::Fatal),
            memory_pauses = report.memory_pauses,
            cancelled = report.cancelled,
            "run finished"
        );
        report
    }

    fn run_batch(&self, batch: &[PathBuf], cancel: &CancellationToken) -> (Vec<FileReport>, Vec<PathBuf>) {
        let workers = self.concurrency.min(batch.len()).max(1);
        let next = AtomicUsize::new(0);
        let (sender, receiver) = mpsc::channel();

        thread::scope(|scope| {
            for _ in 0..workers {
                let sender = sender.clone();
                let next = &next;
                let executor = &self.executor;
                scope.spawn(move || {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(path) = batch.get(index) else {
                            break;
                        };
                        let report = executor.execute(path);
                        if sender.send((index, report)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(sender);

        let mut slots: Vec<Option<FileReport>> = vec![None; batch.len()];
        for (index, report) in receiver {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(report);
            }
        }

        let mut done = Vec::new();
        let mut skipped = Vec::new();
        for (slot, path) in slots.into_iter().zip(batch) {
            match slot {
                Some(report) => done.push(report),
                None => skipped.push(path.clone()),
            }
        }
        (done, skipped)
    }

    /// Holds admission while resident memory is above the threshold.
    /// Returns true when it had to wait.
    fn wait_for_memory(&self, cancel: &CancellationToken) -> bool {
        let mut paused = false;
        for _ in 0..self.max_polls {
            match self.memory.resident_bytes() {
                Some(resident) if resident > self.memory_threshold => {
                    if !paused {
                        tracing::warn!(
                            target: "layerfix::batch",
                            event = "memory_pressure",
                            resident_bytes = resident,
                            threshold_bytes = self.memory_threshold,
                            "pausing admission until memory drops"
                        );
                    }
                    paused = true;
                    if cancel.is_cancelled() {
                        return paused;
                    }
                    thread::sleep(self.poll_interval);
                }
                _ => return paused,
            }
        }
        tracing::warn!(
            target: "layerfix::batch",
            event = "memory_pressure_persisted",
            polls = self.max_polls,
            "memory still above threshold; continuing"
        );
        paused
    }
}

impl fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRunner")
            .field("concurrency", &self.concurrency)
            .field("batch_size", &self.batch_size)
            .field("memory_threshold", &self.memory_threshold)
            .finish_non_exhaustive()
    }
}

/// Drops repeated paths, keeping first occurrences in order.
fn dedupe(files: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    files
        .iter()
        .filter(|path| {
            let key = std::path::absolute(path).unwrap_or_else(|_| (*path).clone());
            seen.insert(key)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerRegistry;
    use crate::retry::RetryPolicy;
    use crate::tests::support::{ScriptedLayer, registry_with};
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    fn executor(registry: LayerRegistry, mode: ExecutionMode, recorder: Option<StateRecorder>) -> FileExecutor {
        let orchestrator = Orchestrator::new(Arc::new(registry)).with_retry(RetryPolicy::immediate(1));
        let executor = FileExecutor::new(orchestrator, ExecutionOptions::new(mode));
        match recorder {
            Some(recorder) => executor.with_recorder(recorder),
            None => executor,
        }
    }

    fn replacing() -> LayerRegistry {
        registry_with(vec![ScriptedLayer::replacing(LayerId::Patterns, "var", "let")])
    }

    #[test]
    fn fix_mode_writes_and_journals() {
        let dir = TempDir::new().expect("temp dir");
        let file = dir.path().join("a.ts");
        fs::write(&file, "var a = 1;\n").expect("seed");
        let recorder = StateRecorder::new(dir.path().join("journal"));
        let executor = executor(replacing(), ExecutionMode::Fix, Some(recorder.clone()));

        let report = executor.execute(&file);

        assert_eq!(report.status, FileStatus::Fixed);
        assert!(report.written);
        assert_eq!(fs::read_to_string(&file).expect("read"), "let a = 1;\n");
        let states = recorder.load_all();
        assert_eq!(states.len(), 1);
        assert_eq!(states.first().map(|s| s.total_changes), Some(1));
    }

    #[test]
    fn analyze_mode_never_writes() {
        let dir = TempDir::new().expect("temp dir");
        let file = dir.path().join("a.ts");
        fs::write(&file, "var a = 1;\n").expect("seed");

        let report = executor(replacing(), ExecutionMode::Analyze, None).execute(&file);

        assert_eq!(report.status, FileStatus::Fixed);
        assert!(!report.written);
        assert_eq!(fs::read_to_string(&file).expect("read"), "var a = 1;\n");
    }

    #[test]
    fn missing_and_binary_files_are_fatal_and_journalled() {
        let dir = TempDir::new().expect("temp dir");
        let binary = dir.path().join("b.ts");
        fs::write(&binary, [0xff, 0xfe, 0x00]).expect("seed");
        let recorder = StateRecorder::new(dir.path().join("journal"));
        let executor = executor(replacing(), ExecutionMode::Fix, Some(recorder.clone()));

        let missing = executor.execute(&dir.path().join("missing.ts"));
        let invalid = executor.execute(&binary);

        assert_eq!(missing.status, FileStatus::Fatal);
        assert_eq!(invalid.status, FileStatus::Fatal);
        assert!(invalid.error.is_some_and(|e| e.contains("UTF-8")));
        assert!(recorder.load_all().iter().all(|s| s.fatal_error.is_some()));
    }

    #[test]
    fn classification_prefers_fixed_over_rolled_back() {
        let outcome = |status| LayerOutcome {
            id: LayerId::Patterns,
            status,
            changes: Vec::new(),
            warnings: Vec::new(),
            attempts: 1,
            backup: None,
        };
        let reverted = outcome(LayerStatus::Reverted {
            reason: "r".to_owned(),
        });
        let failed = outcome(LayerStatus::Failed { error: "e".to_owned() });

        assert_eq!(classify(&[outcome(LayerStatus::Applied), reverted.clone()], false, false), FileStatus::Fixed);
        assert_eq!(classify(&[reverted, failed.clone()], false, false), FileStatus::RolledBack);
        assert_eq!(classify(&[failed], false, false), FileStatus::Failed);
        assert_eq!(classify(&[], true, false), FileStatus::Cancelled);
        assert_eq!(classify(&[outcome(LayerStatus::Unchanged)], false, false), FileStatus::NothingToFix);
        assert_eq!(classify(&[], false, true), FileStatus::Fatal);
    }

    #[test]
    fn batch_deduplicates_and_keeps_order() {
        let dir = TempDir::new().expect("temp dir");
        let mut files = Vec::new();
        for name in ["c.ts", "a.ts", "b.ts"] {
            let path = dir.path().join(name);
            fs::write(&path, "var x;\n").expect("seed");
            files.push(path);
        }
        files.push(dir.path().join("a.ts"));

        let runner = BatchRunner::new(Arc::new(executor(replacing(), ExecutionMode::Fix, None)))
            .with_concurrency(3)
            .with_batch_size(2);
        let report = runner.run(&files);

        let names: Vec<_> = report
            .files
            .iter()
            .filter_map(|f| f.path.file_name().and_then(|n| n.to_str()).map(str::to_owned))
            .collect();
        assert_eq!(names, vec!["c.ts", "a.ts", "b.ts"]);
        assert_eq!(report.count(FileStatus::Fixed), 3);
        assert!(!report.all_fatal());
    }

    struct SteppedSampler {
        samples: AtomicU32,
        high_until: u32,
    }

    impl MemorySampler for SteppedSampler {
        fn resident_bytes(&self) -> Option<u64> {
            let sample = self.samples.fetch_add(1, Ordering::SeqCst);
            Some(if sample < self.high_until { u64::MAX } else { 0 })
        }
    }

    #[test]
    fn pauses_while_memory_is_high() {
        let dir = TempDir::new().expect("temp dir");
        let file = dir.path().join("a.ts");
        fs::write(&file, "var a;\n").expect("seed");
        let sampler = Arc::new(SteppedSampler {
            samples: AtomicU32::new(0),
            high_until: 2,
        });

        let runner = BatchRunner::new(Arc::new(executor(replacing(), ExecutionMode::Analyze, None)))
            .with_memory_limit(sampler.clone(), 1)
            .with_memory_polling(Duration::ZERO, 10);
        let report = runner.run(&[file]);

        assert_eq!(report.memory_pauses, 1);
        assert_eq!(report.files.len(), 1);
        assert_eq!(sampler.samples.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cancelled_runs_skip_every_file() {
        let dir = TempDir::new().expect("temp dir");
        let file = dir.path().join("a.ts");
        fs::write(&file, "var a;\n").expect("seed");
        let executor = Arc::new(executor(replacing(), ExecutionMode::Fix, None));
        executor.cancellation().cancel();

        let report = BatchRunner::new(executor).run(&[file.clone()]);

        assert!(report.cancelled);
        assert!(report.files.is_empty());
        assert_eq!(report.skipped, vec![file]);
    }
}
