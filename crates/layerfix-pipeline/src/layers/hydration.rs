//! Layer 4: server rendering safety.

use layerfix_syntax::{GlobalGuardVisitor, RegexFallback, VisitorSet};

use super::{RegistryError, StructuralPass, is_script};
use crate::layer::{LayerError, LayerId, PipelineContext, Transform, TransformResult};

/// Guards browser-only globals so modules evaluate on the server.
pub struct HydrationLayer {
    guards: StructuralPass,
}

impl HydrationLayer {
    /// Builds the layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage fallback fails to build.
    pub fn new() -> Result<Self, RegistryError> {
        Ok(Self {
            guards: StructuralPass::new(
                VisitorSet::new().with(GlobalGuardVisitor),
                RegexFallback::storage_guards()?,
            ),
        })
    }
}

impl Transform for HydrationLayer {
    fn id(&self) -> LayerId {
        LayerId::Hydration
    }

    fn transform(&self, code: &str, ctx: &PipelineContext) -> Result<TransformResult, LayerError> {
        if !is_script(ctx.path()) {
            return Ok(TransformResult::unchanged(code));
        }
        Ok(self.guards.run(self.id(), code, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn layer() -> HydrationLayer {
        HydrationLayer::new().expect("layer")
    }

    fn run(layer: &HydrationLayer, code: &str) -> TransformResult {
        layer
            .transform(code, &PipelineContext::new("src/theme.ts"))
            .expect("transform")
    }

    #[rstest]
    fn guards_module_scope_storage(layer: HydrationLayer) {
        let result = run(&layer, "const theme = localStorage.getItem('x');\n");
        assert_eq!(
            result.code,
            "const theme = typeof window !== \"undefined\" ? localStorage.getItem('x') : null;\n"
        );
        assert!(!run(&layer, &result.code).has_changes());
    }

    #[rstest]
    fn leaves_effect_bodies_alone(layer: HydrationLayer) {
        let input = "useEffect(() => {\n  document.title = 'x';\n}, []);\n";
        let result = run(&layer, input);
        assert!(result.success);
        assert!(!result.has_changes());
    }

    #[rstest]
    fn leaves_shadowed_globals_alone(layer: HydrationLayer) {
        let input = "export function save(localStorage: Storage) {\n  localStorage.setItem('k', 'v');\n}\n";
        let result = run(&layer, input);
        assert!(result.success);
        assert!(!result.has_changes(), "{:?}", result.changes);
        assert_eq!(result.code, input);
    }

    #[rstest]
    fn guards_storage_in_unparseable_files(layer: HydrationLayer) {
        let input = "const theme = localStorage.getItem('x');\nconst broken = ;\n";
        let result = run(&layer, input);
        assert!(result.success);
        assert!(
            result
                .code
                .starts_with("const theme = (typeof window !== \"undefined\" ? localStorage.getItem('x') : null);")
        );
    }
}
