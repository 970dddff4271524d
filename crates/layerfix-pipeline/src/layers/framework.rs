//! Layer 5: framework conventions for files under an `app/` directory.

use std::path::{Component, Path};

use layerfix_syntax::{Change, Location, offset_to_location};
use regex::Regex;

use super::{RegistryError, is_script};
use crate::layer::{LayerError, LayerId, PipelineContext, Transform, TransformResult};

/// Feature flag that turns off `'use client'` insertion.
pub const NO_USE_CLIENT_FLAG: &str = "no-use-client";

const CLIENT_HOOKS: &[&str] = &[
    "useState",
    "useEffect",
    "useLayoutEffect",
    "useReducer",
    "useRef",
    "useCallback",
    "useMemo",
    "useContext",
    "useTransition",
];

/// Adds `'use client'` where client hooks are used and moves router imports
/// to `next/navigation`.
#[derive(Debug, Clone)]
pub struct FrameworkLayer {
    hook_call: Regex,
    directive: Regex,
    router_import: Regex,
}

impl FrameworkLayer {
    /// Builds the layer.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self, RegistryError> {
        Ok(Self {
            hook_call: Regex::new(&format!(r"\b(?:{})\s*\(", CLIENT_HOOKS.join("|")))?,
            directive: Regex::new(r#"(?m)^\s*['"]use (?:client|server)['"]"#)?,
            router_import: Regex::new(r#"(from\s*|require\(\s*)(['"])next/router(['"])"#)?,
        })
    }

    fn needs_use_client(&self, code: &str, ctx: &PipelineContext) -> bool {
        !ctx.feature_flags.is_enabled(NO_USE_CLIENT_FLAG)
            && !self.has_directive(code)
            && self.hook_call.is_match(code)
    }

    /// True when the module already declares a client or server directive
    /// before any other statement.
    fn has_directive(&self, code: &str) -> bool {
        let body = skip_leading_comments(code);
        self.directive
            .find(body)
            .is_some_and(|found| found.start() == 0)
            || code.contains("'use server'")
            || code.contains("\"use server\"")
    }
}

/// Strips leading whitespace and comments.
fn skip_leading_comments(code: &str) -> &str {
    let mut rest = code.trim_start();
    loop {
        if let Some(line) = rest.strip_prefix("//") {
            rest = line.find('\n').map_or("", |end| line.get(end..).unwrap_or_default());
        } else if let Some(block) = rest.strip_prefix("/*") {
            rest = block
                .find("*/")
                .map_or("", |end| block.get(end.saturating_add(2)..).unwrap_or_default());
        } else {
            return rest;
        }
        rest = rest.trim_start();
    }
}

fn in_app_directory(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, Component::Normal(name) if name == "app"))
}

impl Transform for FrameworkLayer {
    fn id(&self) -> LayerId {
        LayerId::Framework
    }

    fn transform(&self, code: &str, ctx: &PipelineContext) -> Result<TransformResult, LayerError> {
        let path = ctx.path();
        if !is_script(path) || !in_app_directory(path) {
            return Ok(TransformResult::unchanged(code));
        }

        let mut changes = Vec::new();
        for caps in self.router_import.captures_iter(code) {
            if let Some(whole) = caps.get(0) {
                let after = self
                    .router_import
                    .replace(whole.as_str(), "${1}${2}next/navigation${3}")
                    .into_owned();
                changes.push(
                    Change::new("next-navigation", "replaced next/router with next/navigation")
                        .at(offset_to_location(code, whole.start()))
                        .with_snippets(whole.as_str(), after),
                );
            }
        }
        let mut current = self
            .router_import
            .replace_all(code, "${1}${2}next/navigation${3}")
            .into_owned();

        if self.needs_use_client(&current, ctx) {
            current.insert_str(0, "'use client';\n\n");
            changes.push(
                Change::new("use-client", "added 'use client' directive for client hooks")
                    .at(Location { line: 1, column: 1 }),
            );
        }

        Ok(TransformResult::changed(current, changes))
    }
}
