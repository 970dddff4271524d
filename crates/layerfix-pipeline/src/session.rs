//! Wires configuration, persisted state, and the layers into one run.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use layerfix_config::{Config, StatePaths, StatePathsError};

use crate::backup::BackupStore;
use crate::cancel::CancellationToken;
use crate::journal::StateRecorder;
use crate::layers::{LayerRegistry, RegistryError};
use crate::memory::ProcMemorySampler;
use crate::orchestrator::Orchestrator;
use crate::retry::RetryPolicy;
use crate::rollback::RollbackPlan;
use crate::rules::{RuleSet, RuleStore};
use crate::runner::{BatchReport, BatchRunner, ExecutionMode, ExecutionOptions, FileExecutor};
use crate::validator::{Validator, ValidatorChain};

/// Errors raised while preparing a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The state directories could not be created.
    #[error(transparent)]
    State(#[from] StatePathsError),
    /// The built-in layers could not be built.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// What a session did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    /// Per-file results.
    #[serde(flatten)]
    pub batch: BatchReport,
    /// The rollback plan written for this run, if any file was rewritten.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_plan: Option<PathBuf>,
    /// Rules added or strengthened from the journal.
    pub rules_learned: usize,
}

/// One configured analyze or fix run.
#[derive(Debug)]
pub struct Session {
    options: ExecutionOptions,
    paths: StatePaths,
    min_rule_frequency: u32,
    rules: Arc<RuleSet>,
    rule_store: RuleStore,
    recorder: StateRecorder,
    runner: BatchRunner,
    cancel: CancellationToken,
}

impl Session {
    /// Prepares a run from `config`.
    ///
    /// Snapshots are taken only when backups are enabled and the run may
    /// write. Feature flags from the configuration are merged with those in
    /// `options`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the state directories cannot be created
    /// or a built-in layer fails to build.
    pub fn from_config(config: &Config, mut options: ExecutionOptions) -> Result<Self, SessionError> {
        let paths = StatePaths::from_config(config)?;
        let rule_store = RuleStore::new(paths.rules_path());
        let rules = Arc::new(rule_store.load().unwrap_or_else(|error| {
            tracing::warn!(
                target: "layerfix::rules",
                event = "rules_unreadable",
                path = %rule_store.path().display(),
                %error,
                "continuing without learned rules"
            );
            RuleSet::new()
        }));

        options.feature_flags = config
            .feature_flags
            .iter()
            .map(String::as_str)
            .chain(options.feature_flags.iter())
            .collect();

        let cancel = CancellationToken::new();
        let registry = LayerRegistry::standard(Arc::clone(&rules))?;
        let validator: Arc<dyn Validator> =
            Arc::new(ValidatorChain::standard(config.strict_parse_validation));
        let mut orchestrator = Orchestrator::new(Arc::new(registry))
            .with_validator(validator)
            .with_retry(RetryPolicy::from_settings(&config.retry))
            .with_cancellation(cancel.clone());
        if config.backups_enabled && !options.suppresses_writes() {
            orchestrator = orchestrator.with_backups(Arc::new(BackupStore::new(paths.backups_dir())));
        }

        let recorder = StateRecorder::new(paths.journal_dir());
        let executor = FileExecutor::new(orchestrator, options.clone()).with_recorder(recorder.clone());
        let runner = BatchRunner::new(Arc::new(executor))
            .with_concurrency(config.concurrency)
            .with_batch_size(config.batch_size)
            .with_memory_limit(Arc::new(ProcMemorySampler), config.memory_threshold_mb);

        Ok(Self {
            options,
            paths,
            min_rule_frequency: config.min_rule_frequency,
            rules,
            rule_store,
            recorder,
            runner,
            cancel,
        })
    }

    /// The token that stops the run between files and between layers.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every file, then mines rules and writes a rollback plan when
    /// files were rewritten.
    pub fn run(&self, files: &[PathBuf]) -> SessionReport {
        let batch = self.runner.run(files);
        let writes = self.options.mode == ExecutionMode::Fix && !self.options.suppresses_writes();
        let rules_learned = if writes { self.learn_rules() } else { 0 };
        let rollback_plan = if writes { self.write_rollback_plan(&batch) } else { None };
        SessionReport {
            batch,
            rollback_plan,
            rules_learned,
        }
    }

    fn learn_rules(&self) -> usize {
        let mut rules = RuleSet::clone(&self.rules);
        let learned = rules.learn_from(&self.recorder.load_all(), self.min_rule_frequency);
        if learned == 0 {
            return 0;
        }
        if let Err(error) = self.rule_store.save(&rules) {
            tracing::warn!(
                target: "layerfix::rules",
                event = "rules_not_saved",
                path = %self.rule_store.path().display(),
                %error,
                "learned rules were not saved"
            );
            return 0;
        }
        tracing::info!(
            target: "layerfix::rules",
            event = "rules_learned",
            learned,
            total = rules.len(),
            "adaptive rules updated"
        );
        learned
    }

    fn write_rollback_plan(&self, batch: &BatchReport) -> Option<PathBuf> {
        let plan = RollbackPlan::from_reports(&batch.files);
        if plan.is_empty() {
            return None;
        }
        plan.write_to(self.paths.state_dir())
            .inspect_err(|error| {
                tracing::warn!(
                    target: "layerfix::rollback",
                    event = "plan_not_written",
                    %error,
                    "files were rewritten but no rollback plan was saved"
                );
            })
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::fs;
    use tempfile::TempDir;

    fn config(state: &TempDir) -> Config {
        Config {
            state_dir: Utf8PathBuf::from_path_buf(state.path().join("state")).expect("utf-8 temp path"),
            ..Config::default()
        }
    }

    #[test]
    fn fix_runs_write_a_plan_that_restores_the_original() {
        let dir = TempDir::new().expect("temp dir");
        let file = dir.path().join("app.tsx");
        let original = "const msg = &quot;hi&quot;;\nconsole.log(msg);\n";
        fs::write(&file, original).expect("seed");
        let config = config(&dir);

        let session = Session::from_config(&config, ExecutionOptions::new(ExecutionMode::Fix))
            .expect("session");
        let report = session.run(&[file.clone()]);

        assert!(fs::read_to_string(&file).expect("read") != original);
        let plan_path = report.rollback_plan.expect("rollback plan");
        let plan = RollbackPlan::load(&plan_path).expect("load plan");
        let store = BackupStore::new(config.state_dir.as_std_path().join("backups"));
        plan.apply(&store, &crate::rollback::AssumeYes).expect("apply");
        assert_eq!(fs::read_to_string(&file).expect("read"), original);
    }

    #[test]
    fn analyze_runs_leave_no_plan_and_no_snapshots() {
        let dir = TempDir::new().expect("temp dir");
        let file = dir.path().join("app.tsx");
        fs::write(&file, "console.log(1);\nconst a = 1;\n").expect("seed");
        let config = config(&dir);

        let session = Session::from_config(&config, ExecutionOptions::new(ExecutionMode::Analyze))
            .expect("session");
        let report = session.run(&[file]);

        assert!(report.rollback_plan.is_none());
        assert_eq!(report.batch.total_changes(), 1);
        let backups = fs::read_dir(config.state_dir.as_std_path().join("backups"))
            .expect("backups dir")
            .count();
        assert_eq!(backups, 0);
    }

    #[test]
    fn learned_entity_rules_leave_string_literals_alone() {
        let dir = TempDir::new().expect("temp dir");
        let config = Config {
            min_rule_frequency: 2,
            ..config(&dir)
        };
        let quoted = dir.path().join("quoted.ts");
        fs::write(&quoted, "const a = &quot;x&quot;;\n").expect("seed");
        let first = Session::from_config(&config, ExecutionOptions::new(ExecutionMode::Fix))
            .expect("session")
            .run(&[quoted]);
        assert_eq!(first.rules_learned, 1);

        let literal = dir.path().join("literal.ts");
        let source = "export const s = \"&quot;\";\n";
        fs::write(&literal, source).expect("seed");
        let second = Session::from_config(&config, ExecutionOptions::new(ExecutionMode::Fix))
            .expect("session")
            .run(&[literal.clone()]);

        assert_eq!(fs::read_to_string(&literal).expect("read"), source);
        assert_eq!(second.batch.total_changes(), 0);
    }
}
