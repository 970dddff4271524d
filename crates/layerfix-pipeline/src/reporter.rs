//! Structured reporting for pipeline lifecycle events.

use std::path::Path;
use std::sync::Arc;

use crate::backup::BackupError;
use crate::layer::{LayerId, LayerOutcome, LayerStatus};

/// Observer notified as the orchestrator works through a file.
pub trait PipelineReporter: Send + Sync {
    /// Invoked before a layer is backed up and run.
    fn layer_starting(&self, path: &Path, layer: LayerId);

    /// Invoked once a layer's outcome is settled.
    fn layer_finished(&self, path: &Path, outcome: &LayerOutcome);

    /// Invoked when the pre-layer snapshot could not be taken.
    fn backup_failed(&self, path: &Path, layer: LayerId, error: &BackupError);

    /// Invoked when cancellation stops the remaining layers.
    fn cancelled(&self, path: &Path, remaining: usize);
}

impl<T> PipelineReporter for Arc<T>
where
    T: PipelineReporter + ?Sized,
{
    fn layer_starting(&self, path: &Path, layer: LayerId) {
        (**self).layer_starting(path, layer);
    }

    fn layer_finished(&self, path: &Path, outcome: &LayerOutcome) {
        (**self).layer_finished(path, outcome);
    }

    fn backup_failed(&self, path: &Path, layer: LayerId, error: &BackupError) {
        (**self).backup_failed(path, layer, error);
    }

    fn cancelled(&self, path: &Path, remaining: usize) {
        (**self).cancelled(path, remaining);
    }
}

/// Default reporter that records pipeline events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredPipelineReporter;

impl StructuredPipelineReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PipelineReporter for StructuredPipelineReporter {
    fn layer_starting(&self, path: &Path, layer: LayerId) {
        tracing::debug!(
            target: "layerfix::pipeline",
            event = "layer_starting",
            path = %path.display(),
            layer = %layer,
            "starting layer"
        );
    }

    fn layer_finished(&self, path: &Path, outcome: &LayerOutcome) {
        match &outcome.status {
            LayerStatus::Applied | LayerStatus::Unchanged => tracing::info!(
                target: "layerfix::pipeline",
                event = "layer_finished",
                path = %path.display(),
                layer = %outcome.id,
                status = outcome.status.label(),
                changes = outcome.changes.len(),
                warnings = outcome.warnings.len(),
                attempts = outcome.attempts,
                "layer finished"
            ),
            LayerStatus::Reverted { reason } => tracing::warn!(
                target: "layerfix::pipeline",
                event = "layer_reverted",
                path = %path.display(),
                layer = %outcome.id,
                reason = %reason,
                "layer output failed validation; reverted"
            ),
            LayerStatus::Failed { error } => tracing::warn!(
                target: "layerfix::pipeline",
                event = "layer_failed",
                path = %path.display(),
                layer = %outcome.id,
                attempts = outcome.attempts,
                error = %error,
                "layer failed"
            ),
        }
    }

    fn backup_failed(&self, path: &Path, layer: LayerId, error: &BackupError) {
        tracing::warn!(
            target: "layerfix::pipeline",
            event = "backup_failed",
            path = %path.display(),
            layer = %layer,
            error = %error,
            "continuing without a snapshot"
        );
    }

    fn cancelled(&self, path: &Path, remaining: usize) {
        tracing::info!(
            target: "layerfix::pipeline",
            event = "cancelled",
            path = %path.display(),
            remaining,
            "cancellation requested; remaining layers skipped"
        );
    }
}
