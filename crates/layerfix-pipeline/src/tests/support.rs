//! Scripted layers for exercising the orchestrator without real rewrites.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use layerfix_syntax::Change;

use crate::layer::{LayerError, LayerId, PipelineContext, Transform, TransformResult};
use crate::layers::LayerRegistry;
use crate::rules::RuleSet;

enum Script {
    Noop,
    Replacing { from: String, to: String },
    Silent(String),
}

/// A layer whose behaviour is fixed by the test.
pub(crate) struct ScriptedLayer {
    id: LayerId,
    script: Script,
}

impl ScriptedLayer {
    /// Returns its input untouched.
    pub(crate) const fn noop(id: LayerId) -> Self {
        Self {
            id,
            script: Script::Noop,
        }
    }

    /// Replaces every `from` with `to`, reporting one change when it matched.
    pub(crate) fn replacing(id: LayerId, from: &str, to: &str) -> Self {
        Self {
            id,
            script: Script::Replacing {
                from: from.to_owned(),
                to: to.to_owned(),
            },
        }
    }

    /// Returns `code` but reports no changes.
    pub(crate) fn silent(id: LayerId, code: &str) -> Self {
        Self {
            id,
            script: Script::Silent(code.to_owned()),
        }
    }
}

impl Transform for ScriptedLayer {
    fn id(&self) -> LayerId {
        self.id
    }

    fn transform(&self, code: &str, _ctx: &PipelineContext) -> Result<TransformResult, LayerError> {
        Ok(match &self.script {
            Script::Noop => TransformResult::unchanged(code),
            Script::Replacing { from, to } if code.contains(from.as_str()) => TransformResult::changed(
                code.replace(from.as_str(), to),
                vec![Change::new("scripted", format!("replaced {from:?}")).with_snippets(from.as_str(), to.as_str())],
            ),
            Script::Replacing { .. } => TransformResult::unchanged(code),
            Script::Silent(output) => TransformResult::unchanged(output.as_str()),
        })
    }
}

/// Panics on every call.
pub(crate) struct PanickingLayer(LayerId);

impl PanickingLayer {
    pub(crate) const fn new(id: LayerId) -> Self {
        Self(id)
    }
}

impl Transform for PanickingLayer {
    fn id(&self) -> LayerId {
        self.0
    }

    fn transform(&self, _code: &str, _ctx: &PipelineContext) -> Result<TransformResult, LayerError> {
        panic!("scripted panic in layer {}", self.0);
    }
}

/// Fails transiently for a fixed number of calls, then appends a marker.
pub(crate) struct FlakyLayer {
    id: LayerId,
    failures: u32,
    calls: Arc<AtomicU32>,
}

impl FlakyLayer {
    /// Fails the first `failures` calls.
    pub(crate) fn new(id: LayerId, failures: u32) -> Self {
        Self {
            id,
            failures,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Shared call counter, readable after the layer moves into a registry.
    pub(crate) fn calls(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

impl Transform for FlakyLayer {
    fn id(&self) -> LayerId {
        self.id
    }

    fn transform(&self, code: &str, _ctx: &PipelineContext) -> Result<TransformResult, LayerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(LayerError::transient(self.id, format!("attempt {} failed", call + 1)));
        }
        if code.ends_with("// flaky\n") {
            return Ok(TransformResult::unchanged(code));
        }
        Ok(TransformResult::changed(
            format!("{code}// flaky\n"),
            vec![Change::new("scripted", "appended marker")],
        ))
    }
}

/// The standard registry with every layer replaced by a no-op, then by
/// `layers`.
pub(crate) fn registry_with(layers: Vec<ScriptedLayer>) -> LayerRegistry {
    let registry = match LayerRegistry::standard(Arc::new(RuleSet::new())) {
        Ok(registry) => registry,
        Err(error) => panic!("built-in layers failed to build: {error}"),
    };
    let registry = LayerId::ALL
        .into_iter()
        .fold(registry, |registry, id| registry.replace(ScriptedLayer::noop(id)));
    layers
        .into_iter()
        .fold(registry, |registry, layer| registry.replace(layer))
}
