//! Behavioural tests for sequencing, reverts, retries, and rollback.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use super::support::{FlakyLayer, ScriptedLayer, registry_with};
use crate::backup::BackupStore;
use crate::layer::{LayerId, LayerOutcome, LayerStatus, Transform};
use crate::layers::LayerRegistry;
use crate::orchestrator::Orchestrator;
use crate::retry::RetryPolicy;
use crate::rollback::{AssumeYes, RollbackPlan};
use crate::runner::{ExecutionMode, ExecutionOptions, FileExecutor, FileReport};
use crate::sequencer::{Resolution, resolve};

/// Test world for pipeline scenarios.
pub struct PipelineWorld {
    temp_dir: TempDir,
    registry: Option<LayerRegistry>,
    file: Option<PathBuf>,
    original: String,
    flaky_calls: Option<Arc<AtomicU32>>,
    resolution: Option<Resolution>,
    report: Option<FileReport>,
}

impl PipelineWorld {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("create temp dir"),
            registry: None,
            file: None,
            original: String::new(),
            flaky_calls: None,
            resolution: None,
            report: None,
        }
    }

    fn add_layer(&mut self, layer: impl Transform + 'static) {
        let registry = self.registry.take().unwrap_or_else(|| registry_with(Vec::new()));
        self.registry = Some(registry.replace(layer));
    }

    fn store(&self) -> BackupStore {
        BackupStore::new(self.temp_dir.path().join("backups"))
    }

    fn file(&self) -> PathBuf {
        self.file.clone().expect("a source file was given")
    }

    fn report(&self) -> &FileReport {
        self.report.as_ref().expect("the pipeline ran")
    }

    fn outcome(&self, id: LayerId) -> &LayerOutcome {
        self.report()
            .outcomes
            .iter()
            .find(|outcome| outcome.id == id)
            .expect("layer ran")
    }
}

fn unquote(value: &str) -> &str {
    value.trim_matches('"')
}

fn layer_id(value: &str) -> LayerId {
    let number: i64 = unquote(value).parse().expect("numeric layer id");
    LayerId::try_from(number).expect("known layer id")
}

fn count(value: &str) -> u32 {
    unquote(value).parse().expect("numeric count")
}

#[fixture]
fn world() -> RefCell<PipelineWorld> {
    RefCell::new(PipelineWorld::new())
}

// ---- Given steps ----

#[given("a source file {name} containing {content}")]
fn given_source_file(world: &RefCell<PipelineWorld>, name: String, content: String) {
    let mut world = world.borrow_mut();
    let path = world.temp_dir.path().join(unquote(&name));
    let content = unquote(&content).to_owned();
    fs::write(&path, &content).expect("write source file");
    world.file = Some(path);
    world.original = content;
}

#[given("layer {id} replaces {from} with {to}")]
fn given_replacing_layer(world: &RefCell<PipelineWorld>, id: String, from: String, to: String) {
    world
        .borrow_mut()
        .add_layer(ScriptedLayer::replacing(layer_id(&id), unquote(&from), unquote(&to)));
}

#[given("layer {id} fails {times} times before succeeding")]
fn given_flaky_layer(world: &RefCell<PipelineWorld>, id: String, times: String) {
    let layer = FlakyLayer::new(layer_id(&id), count(&times));
    let mut world = world.borrow_mut();
    world.flaky_calls = Some(layer.calls());
    world.add_layer(layer);
}

#[given("layer {id} always fails")]
fn given_failing_layer(world: &RefCell<PipelineWorld>, id: String) {
    world
        .borrow_mut()
        .add_layer(FlakyLayer::new(layer_id(&id), u32::MAX));
}

// ---- When steps ----

#[when("layers {list} are requested")]
fn when_layers_requested(world: &RefCell<PipelineWorld>, list: String) {
    let requested: Vec<i64> = unquote(&list)
        .split(',')
        .map(|number| number.trim().parse().expect("numeric layer id"))
        .collect();
    world.borrow_mut().resolution = Some(resolve(&requested, false));
}

#[when("the pipeline fixes the file")]
fn when_pipeline_fixes(world: &RefCell<PipelineWorld>) {
    let mut world = world.borrow_mut();
    let registry = world.registry.take().unwrap_or_else(|| registry_with(Vec::new()));
    let orchestrator = Orchestrator::new(Arc::new(registry))
        .with_retry(RetryPolicy::immediate(3))
        .with_backups(Arc::new(world.store()));
    let executor = FileExecutor::new(orchestrator, ExecutionOptions::new(ExecutionMode::Fix));
    let report = executor.execute(&world.file());
    world.report = Some(report);
}

#[when("the rollback plan is applied")]
fn when_rollback_applied(world: &RefCell<PipelineWorld>) {
    let world = world.borrow();
    let plan = RollbackPlan::from_reports([world.report()]);
    assert!(!plan.is_empty(), "the run should have written the file");
    let restored = plan.apply(&world.store(), &AssumeYes).expect("apply plan");
    assert!(restored.failed.is_empty(), "restore failures: {:?}", restored.failed);
}

// ---- Then steps ----

#[then("the execution order is {list}")]
fn then_execution_order(world: &RefCell<PipelineWorld>, list: String) {
    let world = world.borrow();
    let resolution = world.resolution.as_ref().expect("layers were resolved");
    let order: Vec<String> = resolution.order.iter().map(|id| id.number().to_string()).collect();
    assert_eq!(order.join(","), unquote(&list));
}

#[then("layer number {number} is rejected")]
fn then_layer_rejected(world: &RefCell<PipelineWorld>, number: String) {
    let world = world.borrow();
    let resolution = world.resolution.as_ref().expect("layers were resolved");
    let number: i64 = unquote(&number).parse().expect("numeric layer id");
    assert_eq!(resolution.rejected, vec![number]);
}

#[then("layer {id} is reverted")]
fn then_layer_reverted(world: &RefCell<PipelineWorld>, id: String) {
    let world = world.borrow();
    let outcome = world.outcome(layer_id(&id));
    assert!(
        matches!(outcome.status, LayerStatus::Reverted { .. }),
        "expected a revert, got {:?}",
        outcome.status
    );
}

#[then("layer {id} is applied after {attempts} attempts")]
fn then_layer_applied_after(world: &RefCell<PipelineWorld>, id: String, attempts: String) {
    let world = world.borrow();
    let outcome = world.outcome(layer_id(&id));
    assert_eq!(outcome.status, LayerStatus::Applied);
    assert_eq!(outcome.attempts, count(&attempts));
    let calls = world.flaky_calls.as_ref().expect("a flaky layer was given");
    assert_eq!(calls.load(Ordering::SeqCst), count(&attempts));
}

#[then("layer {id} failed after {attempts} attempts")]
fn then_layer_failed_after(world: &RefCell<PipelineWorld>, id: String, attempts: String) {
    let world = world.borrow();
    let outcome = world.outcome(layer_id(&id));
    assert!(matches!(outcome.status, LayerStatus::Failed { .. }));
    assert_eq!(outcome.attempts, count(&attempts));
}

#[then("the file contains {expected}")]
fn then_file_contains(world: &RefCell<PipelineWorld>, expected: String) {
    let world = world.borrow();
    let content = fs::read_to_string(world.file()).expect("read file");
    assert!(
        content.contains(unquote(&expected)),
        "expected file to contain {expected}, got '{content}'"
    );
}

#[then("the file is byte-identical to the original")]
fn then_file_identical(world: &RefCell<PipelineWorld>) {
    let world = world.borrow();
    let content = fs::read(world.file()).expect("read file");
    assert_eq!(content, world.original.as_bytes());
}

#[then("the file is classified as {label}")]
fn then_file_classified(world: &RefCell<PipelineWorld>, label: String) {
    assert_eq!(world.borrow().report().status.label(), unquote(&label));
}

#[scenario(path = "tests/features/pipeline.feature")]
fn pipeline(#[from(world)] _: RefCell<PipelineWorld>) {}
