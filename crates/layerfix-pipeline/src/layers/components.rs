//! Layer 3: component structure.

use layerfix_syntax::{IterationKeyVisitor, RegexFallback, TransformEngine, VisitorSet, Warning};

use super::img_alt::ImgAltVisitor;
use super::{RegistryError, StructuralPass, is_script};
use crate::layer::{LayerError, LayerId, PipelineContext, Transform, TransformResult};

/// Adds missing list keys and `<img>` alt text.
pub struct ComponentsLayer {
    keys: StructuralPass,
    img_alt: VisitorSet,
    engine: TransformEngine,
}

impl ComponentsLayer {
    /// Builds the layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the key fallback fails to build.
    pub fn new() -> Result<Self, RegistryError> {
        Ok(Self {
            keys: StructuralPass::new(
                VisitorSet::new().with(IterationKeyVisitor),
                RegexFallback::iteration_keys()?,
            ),
            img_alt: VisitorSet::new().with(ImgAltVisitor),
            engine: TransformEngine::new(),
        })
    }
}

impl Transform for ComponentsLayer {
    fn id(&self) -> LayerId {
        LayerId::Components
    }

    fn transform(&self, code: &str, ctx: &PipelineContext) -> Result<TransformResult, LayerError> {
        if !is_script(ctx.path()) {
            return Ok(TransformResult::unchanged(code));
        }

        let keyed = self.keys.run(self.id(), code, ctx);
        if !keyed.success {
            return Ok(keyed);
        }

        let TransformResult {
            code: keyed_code,
            mut changes,
            mut warnings,
            ..
        } = keyed;

        let code = match self
            .engine
            .transform_with_visitors(&keyed_code, &self.img_alt, ctx.path())
        {
            Ok(outcome) => {
                changes.extend(outcome.changes);
                warnings.extend(outcome.warnings);
                outcome.code
            }
            Err(error) if error.is_parse_error() => {
                tracing::debug!(
                    target: "layerfix::layers",
                    path = %ctx.path().display(),
                    %error,
                    "img alt pass skipped"
                );
                keyed_code
            }
            Err(error) => {
                warnings.push(Warning::new(format!("img alt pass skipped: {error}")));
                keyed_code
            }
        };

        Ok(TransformResult::changed(code, changes).with_warnings(warnings))
    }
}
