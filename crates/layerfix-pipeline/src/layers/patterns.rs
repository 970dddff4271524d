//! Layer 2: source-wide pattern cleanup.

use layerfix_syntax::{
    Change, ConsoleLogVisitor, RegexFallback, VisitorSet, literal_ranges, offset_to_location,
    within_literal,
};
use regex::Regex;

use super::{RegistryError, StructuralPass, is_script};
use crate::layer::{LayerError, LayerId, PipelineContext, Transform, TransformResult};

/// Decodes HTML entities that leaked into code and removes `console.log`
/// statements.
pub struct PatternsLayer {
    entity: Regex,
    console: StructuralPass,
}

impl PatternsLayer {
    /// Builds the layer.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self, RegistryError> {
        Ok(Self {
            entity: Regex::new("&(?:quot|#x27|#39|apos);")?,
            console: StructuralPass::new(
                VisitorSet::new().with(ConsoleLogVisitor),
                RegexFallback::console_statements()?,
            ),
        })
    }

    /// Decodes entities that sit outside string, comment, and JSX text
    /// content.
    fn decode_entities(&self, code: &str, ctx: &PipelineContext) -> Result<(String, Vec<Change>), LayerError> {
        if !self.entity.is_match(code) {
            return Ok((code.to_owned(), Vec::new()));
        }
        let literals = literal_ranges(code, ctx.path())?;

        let hits: Vec<_> = self
            .entity
            .find_iter(code)
            .filter(|found| !within_literal(&literals, found.start()))
            .collect();

        let mut decoded = code.to_owned();
        let mut changes = Vec::with_capacity(hits.len());
        for found in hits.iter().rev() {
            let replacement = decode(found.as_str());
            decoded.replace_range(found.range(), replacement);
            changes.push(
                Change::new("html-entity", format!("decoded {} to {replacement}", found.as_str()))
                    .at(offset_to_location(code, found.start()))
                    .with_snippets(found.as_str(), replacement),
            );
        }
        changes.reverse();
        Ok((decoded, changes))
    }
}

fn decode(entity: &str) -> &'static str {
    if entity == "&quot;" { "\"" } else { "'" }
}

impl Transform for PatternsLayer {
    fn id(&self) -> LayerId {
        LayerId::Patterns
    }

    fn transform(&self, code: &str, ctx: &PipelineContext) -> Result<TransformResult, LayerError> {
        if !is_script(ctx.path()) {
            return Ok(TransformResult::unchanged(code));
        }

        let (decoded, mut changes) = self.decode_entities(code, ctx)?;
        let pass = self.console.run(self.id(), &decoded, ctx);
        if !pass.success {
            return Ok(TransformResult::failed(
                code,
                pass.error.unwrap_or_else(|| "console cleanup failed".to_owned()),
            ));
        }
        changes.extend(pass.changes);
        Ok(TransformResult::changed(pass.code, changes).with_warnings(pass.warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn layer() -> PatternsLayer {
        PatternsLayer::new().expect("layer")
    }

    fn run(layer: &PatternsLayer, code: &str) -> TransformResult {
        layer
            .transform(code, &PipelineContext::new("src/util.ts"))
            .expect("transform")
    }

    #[rstest]
    fn decodes_entities_in_code(layer: PatternsLayer) {
        let result = run(&layer, "const a = &quot;x&quot;;\n");
        assert_eq!(result.code, "const a = \"x\";\n");
        assert_eq!(result.changes.len(), 2);
        assert!(result.changes.iter().all(|c| c.kind == "html-entity"));
    }

    #[rstest]
    #[case("const s = \"&quot;\";\n")]
    #[case("// it&#39;s fine\nconst a = 1;\n")]
    #[case("const t = `&apos;`;\n")]
    fn leaves_entities_in_literals(layer: PatternsLayer, #[case] input: &str) {
        let result = run(&layer, input);
        assert_eq!(result.code, input);
        assert!(!result.has_changes());
    }

    #[rstest]
    fn removes_console_log_statements(layer: PatternsLayer) {
        let input = "function f() {\n  console.log(\"debug\");\n  return 1;\n}\n";
        let result = run(&layer, input);
        assert_eq!(result.code, "function f() {\n  return 1;\n}\n");
        assert!(!run(&layer, &result.code).has_changes());
    }

    #[rstest]
    fn decodes_then_cleans_console(layer: PatternsLayer) {
        let input = "console.log(&quot;hi&quot;);\nexport const a = 1;\n";
        let result = run(&layer, input);
        assert_eq!(result.code, "export const a = 1;\n");
        assert_eq!(result.changes.len(), 3);
    }

    #[rstest]
    fn ignores_non_script_files(layer: PatternsLayer) {
        let code = "{ \"a\": \"&quot;\" }";
        let result = layer
            .transform(code, &PipelineContext::new("tsconfig.json"))
            .expect("transform");
        assert_eq!(result.code, code);
    }
}
