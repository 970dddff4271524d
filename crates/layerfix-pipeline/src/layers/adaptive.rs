//! Layer 7: rules learned from earlier runs.
//!
//! In scripts a rule only rewrites code: matches that touch a string,
//! template, comment, regex or JSX text range are left alone, and the whole
//! layer output is dropped if it re-parses with more errors than its input.

use std::ops::Range;
use std::sync::Arc;

use layerfix_syntax::{
    Change, TreeSitterSyntacticLock, Warning, literal_ranges, offset_to_location,
};

use super::configuration::is_config_file;
use super::is_script;
use crate::layer::{LayerError, LayerId, PipelineContext, Transform, TransformResult};
use crate::rules::{AdaptiveRule, RuleSet};

/// Applies confident learned rules as literal replacements.
#[derive(Debug, Clone)]
pub struct AdaptiveLayer {
    rules: Arc<RuleSet>,
    lock: Arc<TreeSitterSyntacticLock>,
}

impl AdaptiveLayer {
    /// Creates the layer over a shared rule snapshot.
    #[must_use]
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            rules,
            lock: Arc::new(TreeSitterSyntacticLock::new()),
        }
    }

    fn applies(rule: &AdaptiveRule, ctx: &PipelineContext) -> bool {
        let path = ctx.path();
        let right_kind_of_file = if rule.source_layer == LayerId::Configuration {
            is_config_file(path)
        } else {
            is_script(path)
        };
        right_kind_of_file
            && !ctx.layer_applied(rule.source_layer)
            && !rule.replacement.contains(&rule.pattern)
    }

    /// Start offsets of the matches `rule` may rewrite.
    fn code_matches(
        rule: &AdaptiveRule,
        code: &str,
        ctx: &PipelineContext,
    ) -> Result<Vec<usize>, LayerError> {
        let all: Vec<usize> = code.match_indices(&rule.pattern).map(|(at, _)| at).collect();
        if all.is_empty() || !is_script(ctx.path()) {
            return Ok(all);
        }
        let literals = literal_ranges(code, ctx.path())?;
        let width = rule.pattern.len();
        Ok(all
            .into_iter()
            .filter(|&at| !overlaps_any(&literals, at..at + width))
            .collect())
    }
}

fn overlaps_any(ranges: &[Range<usize>], span: Range<usize>) -> bool {
    ranges
        .iter()
        .any(|range| range.start < span.end && span.start < range.end)
}

impl Transform for AdaptiveLayer {
    fn id(&self) -> LayerId {
        LayerId::Adaptive
    }

    fn transform(&self, code: &str, ctx: &PipelineContext) -> Result<TransformResult, LayerError> {
        let mut current = code.to_owned();
        let mut changes = Vec::new();
        for rule in self.rules.confident().filter(|rule| Self::applies(rule, ctx)) {
            let hits = Self::code_matches(rule, &current, ctx)?;
            let Some(&first) = hits.first() else {
                continue;
            };
            changes.push(
                Change::new(
                    "adaptive-rule",
                    format!(
                        "applied rule learned from layer {} to {} occurrence(s)",
                        rule.source_layer,
                        hits.len()
                    ),
                )
                .at(offset_to_location(&current, first))
                .with_snippets(rule.pattern.as_str(), rule.replacement.as_str()),
            );
            for &at in hits.iter().rev() {
                current.replace_range(at..at + rule.pattern.len(), &rule.replacement);
            }
        }

        if !changes.is_empty()
            && is_script(ctx.path())
            && self.lock.introduces_errors(ctx.path(), code, &current)?
        {
            tracing::warn!(
                target: "layerfix::pipeline",
                event = "adaptive_rejected",
                path = %ctx.path().display(),
                rules = changes.len(),
                "learned rules broke the syntax tree; output discarded"
            );
            return Ok(TransformResult::unchanged(code).with_warnings(vec![Warning::new(
                "learned rules produced unparseable output and were not applied",
            )]));
        }
        Ok(TransformResult::changed(current, changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{LayerOutcome, LayerStatus};
    use rstest::rstest;

    fn rule(pattern: &str, replacement: &str, source_layer: LayerId, occurrences: u32) -> AdaptiveRule {
        AdaptiveRule {
            pattern: pattern.to_owned(),
            replacement: replacement.to_owned(),
            source_layer,
            occurrences,
            confidence: f64::from(occurrences) / f64::from(occurrences + 1),
        }
    }

    fn layer(rules: Vec<AdaptiveRule>) -> AdaptiveLayer {
        AdaptiveLayer::new(Arc::new(RuleSet { rules }))
    }

    #[test]
    fn applies_confident_rules() {
        let layer = layer(vec![rule("var ", "let ", LayerId::Patterns, 3)]);
        let result = layer
            .transform("var a = 1;\nvar b = 2;\n", &PipelineContext::new("a.js"))
            .expect("transform");
        assert_eq!(result.code, "let a = 1;\nlet b = 2;\n");
        assert_eq!(result.changes.len(), 1);
    }

    #[test]
    fn skips_rules_whose_source_layer_already_applied() {
        let layer = layer(vec![rule("var ", "let ", LayerId::Patterns, 3)]);
        let mut ctx = PipelineContext::new("a.js");
        ctx.previous_results.push(LayerOutcome {
            id: LayerId::Patterns,
            status: LayerStatus::Applied,
            changes: Vec::new(),
            warnings: Vec::new(),
            attempts: 1,
            backup: None,
        });
        let result = layer.transform("var a = 1;", &ctx).expect("transform");
        assert!(!result.has_changes());
    }

    #[test]
    fn skips_unconfident_and_self_containing_rules() {
        let layer = layer(vec![
            rule("foo", "bar", LayerId::Patterns, 0),
            rule("x", "xx", LayerId::Patterns, 9),
        ]);
        let result = layer
            .transform("foo x", &PipelineContext::new("a.ts"))
            .expect("transform");
        assert_eq!(result.code, "foo x");
    }

    #[rstest]
    #[case("export const s = \"&quot;\";\n")]
    #[case("// keep &quot; here\nexport const a = 1;\n")]
    #[case("export const t = `say &quot;hi&quot;`;\n")]
    fn leaves_literal_content_alone(#[case] input: &str) {
        let layer = layer(vec![rule("&quot;", "\"", LayerId::Patterns, 2)]);
        let result = layer
            .transform(input, &PipelineContext::new("src/util.ts"))
            .expect("transform");
        assert_eq!(result.code, input);
        assert!(!result.has_changes());
    }

    #[test]
    fn leaves_jsx_text_alone_but_rewrites_code() {
        let layer = layer(vec![rule("&quot;", "\"", LayerId::Patterns, 2)]);
        let input = "const a = &quot;x&quot;;\nexport const P = () => <p>&quot;quoted&quot;</p>;\n";
        let result = layer
            .transform(input, &PipelineContext::new("app/page.tsx"))
            .expect("transform");
        assert_eq!(
            result.code,
            "const a = \"x\";\nexport const P = () => <p>&quot;quoted&quot;</p>;\n"
        );
        let [change] = result.changes.as_slice() else {
            panic!("expected one change, got {:?}", result.changes);
        };
        assert!(change.description.contains("2 occurrence(s)"));
    }

    #[test]
    fn discards_output_that_no_longer_parses() {
        let layer = layer(vec![rule("done;", "{", LayerId::Patterns, 5)]);
        let input = "export const a = done;\n";
        let result = layer
            .transform(input, &PipelineContext::new("src/util.ts"))
            .expect("transform");
        assert_eq!(result.code, input);
        assert!(!result.has_changes());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn configuration_rules_only_touch_config_files() {
        let layer = layer(vec![rule("\"es5\"", "\"es2017\"", LayerId::Configuration, 4)]);
        let script = layer
            .transform("const t = \"es5\";", &PipelineContext::new("a.ts"))
            .expect("transform");
        assert!(!script.has_changes());
        let config = layer
            .transform("{\"target\": \"es5\"}", &PipelineContext::new("tsconfig.json"))
            .expect("transform");
        assert!(config.has_changes());
    }
}
