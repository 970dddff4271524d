//! Runs a sequence of layers over one buffer.
//!
//! Each layer goes through the same steps: snapshot the buffer, invoke the
//! layer with retries, validate any changed output, then commit it or put
//! the previous buffer back. A failing layer never stops the layers after it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use layerfix_syntax::Warning;

use crate::backup::{BackupRecord, BackupStore};
use crate::cancel::CancellationToken;
use crate::layer::{
    LayerError, LayerId, LayerOutcome, LayerStatus, PipelineContext, Transform, TransformResult,
};
use crate::layers::LayerRegistry;
use crate::reporter::{PipelineReporter, StructuredPipelineReporter};
use crate::retry::{RetryOutcome, RetryPolicy, retry};
use crate::validator::{SafetyValidator, Validator};

/// What running the layers produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    /// The buffer after every committed layer.
    pub final_code: String,
    /// One outcome per layer that ran, in order.
    pub outcomes: Vec<LayerOutcome>,
    /// Layers that were applied or ran without changes.
    pub successful_layers: usize,
    /// Committed changes across all layers.
    pub total_changes: usize,
    /// Snapshots taken, in order.
    pub backups: Vec<PathBuf>,
    /// Snapshot of the untouched input, taken before the first layer ran.
    /// `None` when that snapshot was skipped or failed, even if later layers
    /// were snapshotted.
    pub original_backup: Option<PathBuf>,
    /// Whether cancellation stopped the run early.
    pub cancelled: bool,
}

impl PipelineOutput {
    /// Returns true when at least one layer was applied.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.status == LayerStatus::Applied)
    }
}

/// Sequential layer runner for one file at a time.
pub struct Orchestrator {
    registry: Arc<LayerRegistry>,
    validator: Arc<dyn Validator>,
    backups: Option<Arc<BackupStore>>,
    retry: RetryPolicy,
    reporter: Arc<dyn PipelineReporter>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Creates an orchestrator with the safety validator, default retries,
    /// structured reporting, and no snapshots.
    #[must_use]
    pub fn new(registry: Arc<LayerRegistry>) -> Self {
        Self {
            registry,
            validator: Arc::new(SafetyValidator),
            backups: None,
            retry: RetryPolicy::default(),
            reporter: Arc::new(StructuredPipelineReporter::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    /// Snapshots the buffer into `store` before each layer.
    #[must_use]
    pub fn with_backups(mut self, store: Arc<BackupStore>) -> Self {
        self.backups = Some(store);
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Replaces the reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn PipelineReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Shares a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token checked between layers.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs `layers` in order over `code`.
    ///
    /// Every outcome is also appended to `ctx.previous_results` so later
    /// layers can see it.
    pub fn run_layers(&self, code: &str, layers: &[LayerId], ctx: &mut PipelineContext) -> PipelineOutput {
        let mut current = code.to_owned();
        let mut output = PipelineOutput {
            final_code: String::new(),
            outcomes: Vec::with_capacity(layers.len()),
            successful_layers: 0,
            total_changes: 0,
            backups: Vec::new(),
            original_backup: None,
            cancelled: false,
        };

        for (index, &id) in layers.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.reporter
                    .cancelled(ctx.path(), layers.len().saturating_sub(index));
                output.cancelled = true;
                break;
            }
            self.reporter.layer_starting(ctx.path(), id);

            let snapshot = self.snapshot(&current, id, ctx);
            if let Some(record) = &snapshot {
                output.backups.push(record.backup_path.clone());
                if index == 0 {
                    output.original_backup = Some(record.backup_path.clone());
                }
            }

            let outcome = self.run_layer(id, &mut current, snapshot.as_ref(), ctx);

            if outcome.status.is_success() {
                output.successful_layers += 1;
            }
            output.total_changes += outcome.changes.len();
            if ctx.verbose {
                for change in &outcome.changes {
                    tracing::info!(
                        target: "layerfix::pipeline",
                        event = "change",
                        path = %ctx.path().display(),
                        layer = %id,
                        kind = %change.kind,
                        location = ?change.location,
                        "{}",
                        change.description
                    );
                }
            }
            self.reporter.layer_finished(ctx.path(), &outcome);
            ctx.previous_results.push(outcome.clone());
            output.outcomes.push(outcome);
        }

        output.final_code = current;
        output
    }

    fn snapshot(&self, current: &str, id: LayerId, ctx: &PipelineContext) -> Option<BackupRecord> {
        if ctx.dry_run {
            return None;
        }
        let store = self.backups.as_ref()?;
        let tag = format!("layer-{}-{}", id.number(), id.name());
        match store.create_backup(ctx.path(), current.as_bytes(), &tag) {
            Ok(record) => Some(record),
            Err(error) => {
                self.reporter.backup_failed(ctx.path(), id, &error);
                None
            }
        }
    }

    fn run_layer(
        &self,
        id: LayerId,
        current: &mut String,
        snapshot: Option<&BackupRecord>,
        ctx: &PipelineContext,
    ) -> LayerOutcome {
        let layer = self.registry.get(id);
        let input: &str = current;
        let RetryOutcome { result, attempts } =
            retry(&self.retry, |_| invoke(layer, id, input, ctx));

        let mut outcome = LayerOutcome {
            id,
            status: LayerStatus::Unchanged,
            changes: Vec::new(),
            warnings: Vec::new(),
            attempts,
            backup: snapshot.map(|record| record.backup_path.clone()),
        };

        let result = match result {
            Ok(result) => result,
            Err(error) => {
                outcome.status = LayerStatus::Failed {
                    error: error.to_string(),
                };
                return outcome;
            }
        };

        let TransformResult {
            success,
            code,
            changes,
            warnings,
            error,
        } = result;
        outcome.warnings = warnings;

        if !success {
            outcome.status = LayerStatus::Failed {
                error: error.unwrap_or_else(|| "layer reported failure".to_owned()),
            };
            return outcome;
        }
        if code == *current {
            return outcome;
        }

        let verdict = self.validator.validate(current, &code, ctx.path());
        if !verdict.valid || verdict.should_revert {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "validation failed".to_owned());
            *current = self.restore(current, snapshot);
            outcome.status = LayerStatus::Reverted { reason };
            return outcome;
        }
        if changes.is_empty() {
            outcome.warnings.push(Warning::new(
                "layer rewrote the buffer without reporting changes; output discarded",
            ));
            return outcome;
        }

        *current = code;
        outcome.changes = changes;
        outcome.status = LayerStatus::Applied;
        outcome
    }

    /// The pre-layer buffer, read back from its snapshot when there is one.
    fn restore(&self, pre_layer: &str, snapshot: Option<&BackupRecord>) -> String {
        let Some((store, record)) = self.backups.as_ref().zip(snapshot) else {
            return pre_layer.to_owned();
        };
        match store.read_snapshot(record) {
            Ok(content) => content,
            Err(error) => {
                tracing::warn!(
                    target: "layerfix::pipeline",
                    event = "snapshot_unusable",
                    backup = %record.backup_path.display(),
                    %error,
                    "reverting from the in-memory buffer"
                );
                pre_layer.to_owned()
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("backups", &self.backups)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Calls `layer`, turning a panic into a [`LayerError`].
fn invoke(
    layer: &dyn Transform,
    id: LayerId,
    code: &str,
    ctx: &PipelineContext,
) -> Result<TransformResult, LayerError> {
    panic::catch_unwind(AssertUnwindSafe(|| layer.transform(code, ctx))).unwrap_or_else(|payload| {
        Err(LayerError::Panicked {
            layer: id,
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{PanickingLayer, ScriptedLayer, registry_with};
    use std::fs;
    use rstest::rstest;
    use tempfile::TempDir;

    fn orchestrator(registry: LayerRegistry) -> Orchestrator {
        Orchestrator::new(Arc::new(registry)).with_retry(RetryPolicy::immediate(3))
    }

    #[test]
    fn zero_change_layers_count_as_successful() {
        let orchestrator = orchestrator(registry_with(Vec::new()));
        let mut ctx = PipelineContext::new("src/plain.ts");
        let output = orchestrator.run_layers("export const a = 1;\n", &LayerId::ALL, &mut ctx);

        assert_eq!(output.successful_layers, 7);
        assert!(!output.changed());
        assert_eq!(output.final_code, "export const a = 1;\n");
        assert_eq!(ctx.previous_results.len(), 7);
    }

    #[test]
    fn panics_are_contained_and_retried() {
        let registry = registry_with(Vec::new()).replace(PanickingLayer::new(LayerId::Components));
        let orchestrator = orchestrator(registry);
        let mut ctx = PipelineContext::new("src/plain.ts");
        let output = orchestrator.run_layers(
            "let a = 1;\n",
            &[LayerId::Patterns, LayerId::Components, LayerId::Hydration],
            &mut ctx,
        );

        let statuses: Vec<_> = output.outcomes.iter().map(|o| o.status.label()).collect();
        assert_eq!(statuses, vec!["unchanged", "failed", "unchanged"]);
        let failed = output.outcomes.get(1).expect("components outcome");
        assert_eq!(failed.attempts, 3);
        assert!(matches!(&failed.status, LayerStatus::Failed { error } if error.contains("panicked")));
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn revert_restores_pre_layer_buffer(#[case] with_backups: bool) {
        let dir = TempDir::new().expect("temp dir");
        let registry = registry_with(vec![
            ScriptedLayer::replacing(LayerId::Patterns, "a", "b"),
            ScriptedLayer::replacing(LayerId::Components, "}", ""),
        ]);
        let mut orchestrator = orchestrator(registry);
        if with_backups {
            orchestrator = orchestrator.with_backups(Arc::new(BackupStore::new(dir.path())));
        }
        let mut ctx = PipelineContext::new(dir.path().join("f.ts"));
        let input = "function a() {}\n";
        let output = orchestrator.run_layers(input, &[LayerId::Patterns, LayerId::Components], &mut ctx);

        assert_eq!(output.final_code, "function b() {}\n");
        let reverted = output.outcomes.get(1).expect("components outcome");
        assert!(matches!(reverted.status, LayerStatus::Reverted { .. }));
        assert!(reverted.changes.is_empty());
        assert_eq!(output.backups.len(), if with_backups { 2 } else { 0 });
        assert_eq!(output.original_backup.as_ref(), output.backups.first());
        assert_eq!(output.total_changes, 1);
    }

    #[test]
    fn original_backup_holds_the_untouched_input() {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(BackupStore::new(dir.path().join("backups")));
        let registry = registry_with(vec![
            ScriptedLayer::replacing(LayerId::Patterns, "a", "b"),
            ScriptedLayer::replacing(LayerId::Components, "b", "c"),
        ]);
        let orchestrator = orchestrator(registry).with_backups(Arc::clone(&store));
        let mut ctx = PipelineContext::new(dir.path().join("f.ts"));
        let input = "let a = 1;\n";
        let output = orchestrator.run_layers(input, &[LayerId::Patterns, LayerId::Components], &mut ctx);

        let original = output.original_backup.expect("original snapshot");
        let second = output.backups.get(1).expect("second snapshot");
        assert_eq!(fs::read_to_string(&original).expect("read"), input);
        assert_eq!(fs::read_to_string(second).expect("read"), "let b = 1;\n");
    }

    #[test]
    fn failed_first_snapshot_leaves_no_original_backup() {
        let dir = TempDir::new().expect("temp dir");
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, "not a directory").expect("seed");
        let orchestrator = orchestrator(registry_with(vec![ScriptedLayer::replacing(
            LayerId::Patterns,
            "1",
            "2",
        )]))
        .with_backups(Arc::new(BackupStore::new(blocked.clone())));
        let mut ctx = PipelineContext::new(dir.path().join("f.ts"));
        let output = orchestrator.run_layers("let a = 1;", &[LayerId::Patterns], &mut ctx);

        assert!(output.changed());
        assert!(output.original_backup.is_none());
    }

    #[test]
    fn dry_run_takes_no_snapshots() {
        let dir = TempDir::new().expect("temp dir");
        let orchestrator = orchestrator(registry_with(vec![ScriptedLayer::replacing(
            LayerId::Patterns,
            "1",
            "2",
        )]))
        .with_backups(Arc::new(BackupStore::new(dir.path())));
        let mut ctx = PipelineContext::new(dir.path().join("f.ts")).with_dry_run(true);
        let output = orchestrator.run_layers("let a = 1;", &[LayerId::Patterns], &mut ctx);

        assert!(output.changed());
        assert!(output.backups.is_empty());
        assert_eq!(output.final_code, "let a = 2;");
    }

    #[test]
    fn cancellation_stops_before_the_next_layer() {
        let orchestrator = orchestrator(registry_with(Vec::new()));
        orchestrator.cancellation().cancel();
        let mut ctx = PipelineContext::new("src/plain.ts");
        let output = orchestrator.run_layers("let a;", &LayerId::ALL, &mut ctx);

        assert!(output.cancelled);
        assert!(output.outcomes.is_empty());
    }

    #[test]
    fn silent_rewrites_are_discarded() {
        let registry = registry_with(vec![ScriptedLayer::silent(LayerId::Patterns, "let b;")]);
        let orchestrator = orchestrator(registry);
        let mut ctx = PipelineContext::new("src/plain.ts");
        let output = orchestrator.run_layers("let a;", &[LayerId::Patterns], &mut ctx);

        assert_eq!(output.final_code, "let a;");
        let outcome = output.outcomes.first().expect("outcome");
        assert_eq!(outcome.status, LayerStatus::Unchanged);
        assert_eq!(outcome.warnings.len(), 1);
    }
}
