//! The seven built-in layers and the registry that holds them.

mod adaptive;
mod components;
mod configuration;
mod framework;
mod hydration;
mod img_alt;
mod patterns;
mod testing;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use layerfix_syntax::{
    AstFirstTransformer, PatternFallback, RegexFallback, Strategy, SupportedLanguage, SyntaxError,
    VisitorSet,
};
use thiserror::Error;

use crate::layer::{LayerId, PipelineContext, Transform, TransformResult};
use crate::rules::RuleSet;

pub use adaptive::AdaptiveLayer;
pub use components::ComponentsLayer;
pub use configuration::ConfigurationLayer;
pub use framework::{FrameworkLayer, NO_USE_CLIENT_FLAG};
pub use hydration::HydrationLayer;
pub use img_alt::ImgAltVisitor;
pub use patterns::PatternsLayer;
pub use testing::TestingLayer;

/// Failure to build the built-in layers.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A built-in text pattern failed to compile.
    #[error("built-in pattern failed to compile: {0}")]
    Pattern(#[from] regex::Error),
    /// A built-in fallback failed to build.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
}

/// One transform per layer, fixed once built.
pub struct LayerRegistry {
    layers: [Box<dyn Transform>; 7],
}

impl LayerRegistry {
    /// The built-in layers. The adaptive layer applies `rules`.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn standard(rules: Arc<RuleSet>) -> Result<Self, RegistryError> {
        Ok(Self {
            layers: [
                Box::new(ConfigurationLayer::new()?),
                Box::new(PatternsLayer::new()?),
                Box::new(ComponentsLayer::new()?),
                Box::new(HydrationLayer::new()?),
                Box::new(FrameworkLayer::new()?),
                Box::new(TestingLayer::new()?),
                Box::new(AdaptiveLayer::new(rules)),
            ],
        })
    }

    /// Swaps in `layer` for the built-in with the same id.
    #[must_use]
    pub fn replace(mut self, layer: impl Transform + 'static) -> Self {
        let slot = self.slot_mut(layer.id());
        *slot = Box::new(layer);
        self
    }

    /// The transform for `id`.
    #[must_use]
    pub fn get(&self, id: LayerId) -> &dyn Transform {
        let [configuration, patterns, components, hydration, framework, testing, adaptive] =
            &self.layers;
        let layer = match id {
            LayerId::Configuration => configuration,
            LayerId::Patterns => patterns,
            LayerId::Components => components,
            LayerId::Hydration => hydration,
            LayerId::Framework => framework,
            LayerId::Testing => testing,
            LayerId::Adaptive => adaptive,
        };
        layer.as_ref()
    }

    fn slot_mut(&mut self, id: LayerId) -> &mut Box<dyn Transform> {
        let [configuration, patterns, components, hydration, framework, testing, adaptive] =
            &mut self.layers;
        match id {
            LayerId::Configuration => configuration,
            LayerId::Patterns => patterns,
            LayerId::Components => components,
            LayerId::Hydration => hydration,
            LayerId::Framework => framework,
            LayerId::Testing => testing,
            LayerId::Adaptive => adaptive,
        }
    }
}

impl fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.layers.iter().map(|layer| layer.id()))
            .finish()
    }
}

/// Returns true for paths with a JavaScript or TypeScript extension.
pub(crate) fn is_script(path: &Path) -> bool {
    SupportedLanguage::from_path(path).is_some()
}

/// A visitor set paired with its pattern fallback.
struct StructuralPass {
    visitors: VisitorSet,
    fallback: RegexFallback,
    transformer: AstFirstTransformer,
}

impl StructuralPass {
    fn new(visitors: VisitorSet, fallback: RegexFallback) -> Self {
        Self {
            visitors,
            fallback,
            transformer: AstFirstTransformer::new(),
        }
    }

    /// Runs the pass, reporting a rejected fallback as a failed result.
    fn run(&self, layer: LayerId, code: &str, ctx: &PipelineContext) -> TransformResult {
        let fallback: &dyn PatternFallback = &self.fallback;
        match self
            .transformer
            .run(code, &self.visitors, Some(fallback), ctx.path())
        {
            Ok(outcome) => {
                if outcome.strategy == Strategy::Fallback {
                    tracing::debug!(
                        target: "layerfix::layers",
                        layer = %layer,
                        path = %ctx.path().display(),
                        changes = outcome.changes.len(),
                        "pattern fallback used"
                    );
                }
                TransformResult::changed(outcome.code, outcome.changes)
                    .with_warnings(outcome.warnings)
            }
            Err(error) => TransformResult::failed(code, error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerError;

    struct Stub(LayerId);

    impl Transform for Stub {
        fn id(&self) -> LayerId {
            self.0
        }

        fn transform(&self, _: &str, _: &PipelineContext) -> Result<TransformResult, LayerError> {
            Ok(TransformResult::unchanged("stub"))
        }
    }

    #[test]
    fn standard_registry_is_ordered_by_id() {
        let registry = LayerRegistry::standard(Arc::new(RuleSet::new())).expect("registry");
        for id in LayerId::ALL {
            assert_eq!(registry.get(id).id(), id);
        }
    }

    #[test]
    fn replace_swaps_only_the_matching_slot() {
        let registry = LayerRegistry::standard(Arc::new(RuleSet::new()))
            .expect("registry")
            .replace(Stub(LayerId::Framework));
        let ctx = PipelineContext::new("app/page.tsx");

        let swapped = registry
            .get(LayerId::Framework)
            .transform("const a = 1;", &ctx)
            .expect("stub");
        assert_eq!(swapped.code, "stub");

        let untouched = registry
            .get(LayerId::Testing)
            .transform("const a = 1;", &ctx)
            .expect("testing");
        assert_eq!(untouched.code, "const a = 1;");
    }
}
