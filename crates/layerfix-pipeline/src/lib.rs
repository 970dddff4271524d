//! Layered, fail-safe rewriting of JavaScript and TypeScript sources.
//!
//! A run resolves the requested layers with [`sequencer::resolve`], then
//! hands each file to a [`FileExecutor`]. The [`Orchestrator`] inside it
//! snapshots the buffer before every layer, invokes the layer under a
//! [`RetryPolicy`], and validates the output. Invalid output is reverted to
//! the snapshot and the remaining layers carry on from there.
//!
//! Everything a run leaves behind lives under the configured state
//! directory: content-addressed snapshots in [`BackupStore`], one
//! [`ExecutionState`] per file in the journal, learned [`RuleSet`]s, and a
//! [`RollbackPlan`] for every `fix` run that rewrote files.
//!
//! [`Session`] wires all of this from a [`layerfix_config::Config`].

mod atomic;
pub mod backup;
mod cancel;
mod clock;
pub mod journal;
pub mod layer;
pub mod layers;
pub mod memory;
pub mod orchestrator;
pub mod reporter;
pub mod retry;
pub mod rollback;
pub mod rules;
pub mod runner;
pub mod sequencer;
pub mod session;
pub mod telemetry;
pub mod validator;

#[cfg(test)]
mod tests;

pub use backup::{
    BackupError, BackupFilter, BackupRecord, BackupStore, PruneReport, RetentionPolicy,
};
pub use cancel::CancellationToken;
pub use journal::{ExecutionState, LayerSummary, StateRecorder};
pub use layer::{
    FeatureFlags, LayerError, LayerId, LayerOutcome, LayerStatus, PipelineContext, Transform,
    TransformResult, UnknownLayerId,
};
pub use layers::{LayerRegistry, RegistryError};
pub use memory::{MemorySampler, ProcMemorySampler};
pub use orchestrator::{Orchestrator, PipelineOutput};
pub use reporter::{PipelineReporter, StructuredPipelineReporter};
pub use retry::{RetryOutcome, RetryPolicy, retry};
pub use rollback::{AssumeYes, Confirmation, RollbackEntry, RollbackError, RollbackPlan, RollbackReport};
pub use rules::{AdaptiveRule, RuleSet, RuleStore, RuleStoreError};
pub use runner::{
    BatchReport, BatchRunner, ExecutionMode, ExecutionOptions, FileExecutor, FileReport, FileStatus,
};
pub use sequencer::{Resolution, resolve};
pub use session::{Session, SessionError, SessionReport};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use validator::{
    SafetyValidator, SyntaxValidator, ValidationResult, Validator, ValidatorChain,
};
