//! Layer 6: test file hygiene.

use std::collections::BTreeSet;
use std::path::Path;

use layerfix_syntax::{Change, Location};
use regex::Regex;

use super::{RegistryError, is_script};
use crate::layer::{LayerError, LayerId, PipelineContext, Transform, TransformResult};

const REACT_TESTING_LIBRARY: &str = "@testing-library/react";
const JEST_DOM: &str = "@testing-library/jest-dom";

const JEST_DOM_MATCHERS: &[&str] = &[
    "toBeInTheDocument",
    "toHaveTextContent",
    "toHaveAttribute",
    "toHaveClass",
    "toBeVisible",
    "toBeDisabled",
    "toBeEnabled",
    "toHaveValue",
    "toHaveStyle",
];

/// Adds the testing-library imports a test file uses but never imports.
#[derive(Debug, Clone)]
pub struct TestingLayer {
    render_call: Regex,
    screen_use: Regex,
    named_import: Regex,
    local_binding: Regex,
    matcher_call: Regex,
}

impl TestingLayer {
    /// Builds the layer.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self, RegistryError> {
        Ok(Self {
            render_call: Regex::new(r"\brender\s*\(")?,
            screen_use: Regex::new(r"\bscreen\s*\.")?,
            named_import: Regex::new(r#"import\s+(?:type\s+)?(?:[\w$]+\s*,\s*)?\{([^}]*)\}\s*from\s*['"][^'"]+['"]"#)?,
            local_binding: Regex::new(r"\b(?:function|const|let|var|class)\s+(render|screen)\b")?,
            matcher_call: Regex::new(&format!(r"\.(?:{})\s*\(", JEST_DOM_MATCHERS.join("|")))?,
        })
    }

    /// Names brought into scope by named imports or local declarations.
    fn bound_names<'a>(&self, code: &'a str) -> BTreeSet<&'a str> {
        let mut names = BTreeSet::new();
        for caps in self.named_import.captures_iter(code) {
            let Some(list) = caps.get(1) else { continue };
            for specifier in list.as_str().split(',') {
                let local = specifier.rsplit(" as ").next().unwrap_or(specifier).trim();
                if !local.is_empty() {
                    names.insert(local);
                }
            }
        }
        for caps in self.local_binding.captures_iter(code) {
            if let Some(name) = caps.get(1) {
                names.insert(name.as_str());
            }
        }
        names
    }

    fn missing_library_names(&self, code: &str) -> Vec<&'static str> {
        let bound = self.bound_names(code);
        let mut missing = Vec::new();
        if self.render_call.is_match(code) && !bound.contains("render") {
            missing.push("render");
        }
        if self.screen_use.is_match(code) && !bound.contains("screen") {
            missing.push("screen");
        }
        missing
    }
}

fn is_test_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(".test.") || name.contains(".spec."))
}

impl Transform for TestingLayer {
    fn id(&self) -> LayerId {
        LayerId::Testing
    }

    fn transform(&self, code: &str, ctx: &PipelineContext) -> Result<TransformResult, LayerError> {
        let path = ctx.path();
        if !is_script(path) || !is_test_file(path) {
            return Ok(TransformResult::unchanged(code));
        }

        let mut header = String::new();
        let mut changes = Vec::new();
        let top = Location { line: 1, column: 1 };

        let missing = self.missing_library_names(code);
        if !missing.is_empty() {
            let names = missing.join(", ");
            header.push_str(&format!("import {{ {names} }} from '{REACT_TESTING_LIBRARY}';\n"));
            changes.push(
                Change::new("testing-import", format!("imported {names} from {REACT_TESTING_LIBRARY}"))
                    .at(top),
            );
        }

        if self.matcher_call.is_match(code) && !code.contains(JEST_DOM) {
            header.push_str(&format!("import '{JEST_DOM}';\n"));
            changes.push(Change::new("testing-import", format!("imported {JEST_DOM} matchers")).at(top));
        }

        if header.is_empty() {
            return Ok(TransformResult::unchanged(code));
        }
        Ok(TransformResult::changed(format!("{header}{code}"), changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn layer() -> TestingLayer {
        TestingLayer::new().expect("layer")
    }

    fn run(layer: &TestingLayer, file: &str, code: &str) -> TransformResult {
        layer
            .transform(code, &PipelineContext::new(file))
            .expect("transform")
    }

    #[rstest]
    fn adds_missing_imports(layer: TestingLayer) {
        let input = "test('renders', () => {\n  render(<App />);\n  expect(screen.getByText('hi')).toBeInTheDocument();\n});\n";
        let result = run(&layer, "src/App.test.tsx", input);
        assert_eq!(
            result.code,
            format!(
                "import {{ render, screen }} from '@testing-library/react';\nimport '@testing-library/jest-dom';\n{input}"
            )
        );
        assert_eq!(result.changes.len(), 2);
        assert!(!run(&layer, "src/App.test.tsx", &result.code).has_changes());
    }

    #[rstest]
    fn imports_only_what_is_missing(layer: TestingLayer) {
        let input = "import { render as r, render } from '@testing-library/react';\nrender(<A />);\nscreen.getByRole('button');\n";
        let result = run(&layer, "a.spec.jsx", input);
        assert!(result.code.starts_with("import { screen } from '@testing-library/react';\n"));
    }

    #[rstest]
    fn ignores_non_test_files(layer: TestingLayer) {
        let input = "render(<App />);\n";
        assert!(!run(&layer, "src/App.tsx", input).has_changes());
    }

    #[rstest]
    fn respects_local_helpers(layer: TestingLayer) {
        let input = "function render(ui) { return ui; }\nrender(1);\n";
        assert!(!run(&layer, "util.test.ts", input).has_changes());
    }
}
