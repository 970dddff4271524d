//! Layer 1: project configuration files.
//!
//! Edits are made on the text so comments and formatting survive.

use std::path::Path;

use layerfix_syntax::{Change, offset_to_location};
use regex::Regex;

use crate::layer::{LayerError, LayerId, PipelineContext, Transform, TransformResult};

const TARGET: &str = "es2017";

/// Modernises `tsconfig.json` and `next.config.*`.
#[derive(Debug, Clone)]
pub struct ConfigurationLayer {
    legacy_target: Regex,
    strict_key: Regex,
    compiler_options: Regex,
    app_dir_line: Regex,
    app_dir_inline: Regex,
}

impl ConfigurationLayer {
    /// Builds the layer.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            legacy_target: Regex::new(r#"("target"\s*:\s*")(?i:es3|es5)(")"#)?,
            strict_key: Regex::new(r#""strict"\s*:"#)?,
            compiler_options: Regex::new(r#""compilerOptions"\s*:\s*\{"#)?,
            app_dir_line: Regex::new(
                r#"(?m)^[ \t]*["']?appDir["']?\s*:\s*(?:true|false)[ \t]*,?[ \t]*\r?\n"#,
            )?,
            app_dir_inline: Regex::new(r#"["']?appDir["']?\s*:\s*(?:true|false)\s*,?\s*"#)?,
        })
    }

    fn tsconfig(&self, code: &str) -> TransformResult {
        let mut changes = Vec::new();
        let mut current = code.to_owned();

        if let Some(caps) = self.legacy_target.captures(&current)
            && let Some(whole) = caps.get(0)
        {
            let replacement = self
                .legacy_target
                .replace(whole.as_str(), format!("${{1}}{TARGET}${{2}}"))
                .into_owned();
            changes.push(
                Change::new("tsconfig-target", format!("raised compilerOptions.target to {TARGET}"))
                    .at(offset_to_location(&current, whole.start()))
                    .with_snippets(whole.as_str(), replacement.as_str()),
            );
            current.replace_range(whole.range(), &replacement);
        }

        if !self.strict_key.is_match(&current)
            && let Some(brace) = self.compiler_options.find(&current)
        {
            let insertion = strict_insertion(current.get(brace.end()..).unwrap_or_default());
            changes.push(
                Change::new("tsconfig-strict", "enabled compilerOptions.strict")
                    .at(offset_to_location(&current, brace.start())),
            );
            current.insert_str(brace.end(), &insertion);
        }

        TransformResult::changed(current, changes)
    }

    fn next_config(&self, code: &str) -> TransformResult {
        let mut changes = Vec::new();
        let mut current = code.to_owned();
        for pattern in [&self.app_dir_line, &self.app_dir_inline] {
            while let Some(found) = pattern.find(&current) {
                changes.push(
                    Change::new("next-app-dir", "removed deprecated experimental.appDir flag")
                        .at(offset_to_location(&current, found.start()))
                        .with_snippets(found.as_str(), ""),
                );
                current.replace_range(found.range(), "");
            }
        }
        TransformResult::changed(current, changes)
    }
}

/// The text inserted right after the `compilerOptions` opening brace.
fn strict_insertion(rest: &str) -> String {
    if rest.trim_start().starts_with('}') {
        return r#" "strict": true "#.to_owned();
    }
    let after_newline = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'));
    match after_newline {
        Some(next_line) => {
            let indent: String = next_line
                .chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .collect();
            let newline = if rest.starts_with("\r\n") { "\r\n" } else { "\n" };
            format!(r#"{newline}{indent}"strict": true,"#)
        }
        None => r#" "strict": true,"#.to_owned(),
    }
}

pub(crate) fn is_tsconfig(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == "tsconfig.json")
}

pub(crate) fn is_next_config(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("next.config."))
}

/// Returns true for files this layer rewrites.
pub(crate) fn is_config_file(path: &Path) -> bool {
    is_tsconfig(path) || is_next_config(path)
}

impl Transform for ConfigurationLayer {
    fn id(&self) -> LayerId {
        LayerId::Configuration
    }

    fn transform(&self, code: &str, ctx: &PipelineContext) -> Result<TransformResult, LayerError> {
        let path = ctx.path();
        Ok(if is_tsconfig(path) {
            self.tsconfig(code)
        } else if is_next_config(path) {
            self.next_config(code)
        } else {
            TransformResult::unchanged(code)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn layer() -> ConfigurationLayer {
        ConfigurationLayer::new().expect("layer")
    }

    fn run(layer: &ConfigurationLayer, file: &str, code: &str) -> TransformResult {
        layer
            .transform(code, &PipelineContext::new(file))
            .expect("transform")
    }

    #[rstest]
    fn modernises_tsconfig(layer: ConfigurationLayer) {
        let input = "{\n  \"compilerOptions\": {\n    \"target\": \"ES5\",\n    \"jsx\": \"preserve\"\n  }\n}\n";
        let result = run(&layer, "tsconfig.json", input);

        assert_eq!(
            result.code,
            "{\n  \"compilerOptions\": {\n    \"strict\": true,\n    \"target\": \"es2017\",\n    \"jsx\": \"preserve\"\n  }\n}\n"
        );
        assert_eq!(result.changes.len(), 2);
        let again = run(&layer, "tsconfig.json", &result.code);
        assert!(!again.has_changes());
    }

    #[rstest]
    #[case("{\"compilerOptions\": {}}", "{\"compilerOptions\": { \"strict\": true }}")]
    #[case(
        "{\"compilerOptions\": {\"jsx\": \"react\"}}",
        "{\"compilerOptions\": { \"strict\": true,\"jsx\": \"react\"}}"
    )]
    fn inserts_strict_inline(layer: ConfigurationLayer, #[case] input: &str, #[case] expected: &str) {
        assert_eq!(run(&layer, "tsconfig.json", input).code, expected);
    }

    #[rstest]
    fn keeps_existing_strict_setting(layer: ConfigurationLayer) {
        let input = "{\"compilerOptions\": {\"strict\": false, \"target\": \"es2020\"}}";
        let result = run(&layer, "tsconfig.json", input);
        assert!(!result.has_changes());
        assert_eq!(result.code, input);
    }

    #[rstest]
    fn removes_app_dir_flag(layer: ConfigurationLayer) {
        let input = "module.exports = {\n  experimental: {\n    appDir: true,\n    serverActions: true,\n  },\n};\n";
        let result = run(&layer, "next.config.js", input);
        assert_eq!(
            result.code,
            "module.exports = {\n  experimental: {\n    serverActions: true,\n  },\n};\n"
        );
        assert_eq!(result.changes.len(), 1);
    }

    #[rstest]
    fn removes_inline_app_dir_flag(layer: ConfigurationLayer) {
        let input = "module.exports = { experimental: { appDir: true } };";
        let result = run(&layer, "next.config.mjs", input);
        assert_eq!(result.code, "module.exports = { experimental: { } };");
    }

    #[rstest]
    fn ignores_other_files(layer: ConfigurationLayer) {
        let input = "const target = \"es5\";";
        let result = run(&layer, "src/index.ts", input);
        assert!(result.success);
        assert!(!result.has_changes());
    }
}
