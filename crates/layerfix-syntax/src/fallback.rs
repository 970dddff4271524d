//! AST-first rewriting with a gated pattern fallback.
//!
//! [`AstFirstTransformer::run`] tries the structural engine first. A
//! structural result with at least one change is used on its own. When the
//! engine raises or changes nothing, the caller's [`PatternFallback`] runs
//! instead, and its output is kept only if it is delimiter-balanced and its
//! re-parse carries no more syntax errors than the input did. Rejected
//! output is discarded whole.

use std::fmt;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::change::{Change, Warning};
use crate::delimiters::check_balance_for;
use crate::engine::{TransformEngine, VisitorSet};
use crate::error::SyntaxError;
use crate::language::SupportedLanguage;
use crate::position::offset_to_location;
use crate::syntactic_lock::TreeSitterSyntacticLock;

/// Why a fallback is being consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTrigger {
    /// The structural engine raised, usually on unparseable input.
    StructuralError,
    /// The structural engine parsed the input but proposed nothing.
    NoStructuralChanges,
}

/// Output of a pattern fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackOutput {
    /// The rewritten buffer.
    pub code: String,
    /// One entry per replacement.
    pub changes: Vec<Change>,
}

/// A text-level rewrite used when structural rewriting is unavailable.
pub trait PatternFallback: Send + Sync {
    /// Stable identifier used in logs and rejection errors.
    fn name(&self) -> &'static str;

    /// Rewrites `code`. Must not fail; an empty change list means no match.
    fn apply(&self, code: &str, trigger: FallbackTrigger) -> FallbackOutput;
}

/// Built-in rule sets, compiled on first use and shared afterwards.
static ITERATION_KEYS: Lazy<Result<RegexFallback, String>> =
    Lazy::new(|| compile_iteration_keys().map_err(|error| error.to_string()));
static STORAGE_GUARDS: Lazy<Result<RegexFallback, String>> =
    Lazy::new(|| compile_storage_guards().map_err(|error| error.to_string()));
static CONSOLE_STATEMENTS: Lazy<Result<RegexFallback, String>> =
    Lazy::new(|| compile_console_statements().map_err(|error| error.to_string()));

fn shared(rules: &Lazy<Result<RegexFallback, String>>) -> Result<RegexFallback, SyntaxError> {
    rules
        .as_ref()
        .map(Clone::clone)
        .map_err(|message| SyntaxError::internal_error(message.clone()))
}

/// One regular-expression replacement.
#[derive(Debug, Clone)]
pub struct RegexRule {
    regex: Regex,
    replacement: String,
    kind: &'static str,
    description: &'static str,
    parse_failures_only: bool,
}

impl RegexRule {
    /// Compiles a rule. `replacement` uses `$1`/`${name}` capture syntax.
    ///
    /// # Errors
    ///
    /// Returns [`SyntaxError::InternalError`] if `pattern` does not compile.
    pub fn new(
        pattern: &str,
        replacement: impl Into<String>,
        kind: &'static str,
        description: &'static str,
    ) -> Result<Self, SyntaxError> {
        let regex = Regex::new(pattern)
            .map_err(|e| SyntaxError::internal_error(format!("invalid fallback pattern: {e}")))?;
        Ok(Self {
            regex,
            replacement: replacement.into(),
            kind,
            description,
            parse_failures_only: false,
        })
    }

    /// Restricts the rule to inputs the structural engine could not parse.
    ///
    /// Rules whose matches the engine handles precisely should not second
    /// guess a clean parse that found nothing to change.
    #[must_use]
    pub const fn on_parse_failure_only(mut self) -> Self {
        self.parse_failures_only = true;
        self
    }

    fn expand(&self, caps: &Captures<'_>) -> String {
        let mut out = String::new();
        caps.expand(&self.replacement, &mut out);
        out
    }
}

/// A pattern fallback made of ordered regex rules.
#[derive(Debug, Clone)]
pub struct RegexFallback {
    name: &'static str,
    rules: Vec<RegexRule>,
}

impl RegexFallback {
    /// Creates a fallback from rules applied in order.
    #[must_use]
    pub const fn new(name: &'static str, rules: Vec<RegexRule>) -> Self {
        Self { name, rules }
    }

    /// Keys attribute-less elements returned directly by a one-parameter
    /// arrow callback.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn iteration_keys() -> Result<Self, SyntaxError> {
        shared(&ITERATION_KEYS)
    }

    /// Guards storage calls that start a statement or follow an assignment,
    /// an argument separator, or `return`.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn storage_guards() -> Result<Self, SyntaxError> {
        shared(&STORAGE_GUARDS)
    }

    /// Deletes whole-line `console.log(...)` statements.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn console_statements() -> Result<Self, SyntaxError> {
        shared(&CONSOLE_STATEMENTS)
    }
}

fn compile_iteration_keys() -> Result<RegexFallback, SyntaxError> {
    let rule = RegexRule::new(
        r"\.map\(\s*\(?\s*([A-Za-z_$][\w$]*)\s*\)?\s*=>\s*(\(?\s*)<([A-Za-z][\w.]*)>",
        ".map(($1, index) => $2<$3 key={index}>",
        "iteration-key",
        "added key={index} to element rendered by .map()",
    )?;
    Ok(RegexFallback::new("iteration-key-pattern", vec![rule]))
}

fn compile_storage_guards() -> Result<RegexFallback, SyntaxError> {
    const CALL: &str = r"((?:localStorage|sessionStorage)\.(?:getItem|setItem|removeItem|clear)\([^()\n]*\))";
    let statement = RegexRule::new(
        &format!(r"(?m)^([ \t]*){CALL}"),
        r#"${1}typeof window !== "undefined" ? $2 : null"#,
        "global-guard",
        "guarded storage call with `typeof window`",
    )?
    .on_parse_failure_only();
    let operand = RegexRule::new(
        &format!(r"((?:[^=!<>]=|\(|,|\breturn)[ \t]*){CALL}"),
        r#"$1(typeof window !== "undefined" ? $2 : null)"#,
        "global-guard",
        "guarded storage call with `typeof window`",
    )?
    .on_parse_failure_only();
    Ok(RegexFallback::new("storage-guard-pattern", vec![statement, operand]))
}

fn compile_console_statements() -> Result<RegexFallback, SyntaxError> {
    let rule = RegexRule::new(
        r"(?m)^[ \t]*console\.log\((?:[^()\n]|\([^()\n]*\))*\);?[ \t]*(?:\r?\n|$)",
        "",
        "console-log",
        "removed console.log statement",
    )?
    .on_parse_failure_only();
    Ok(RegexFallback::new("console-log-pattern", vec![rule]))
}

impl PatternFallback for RegexFallback {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, code: &str, trigger: FallbackTrigger) -> FallbackOutput {
        let mut current = code.to_owned();
        let mut changes = Vec::new();
        for rule in &self.rules {
            if rule.parse_failures_only && trigger != FallbackTrigger::StructuralError {
                continue;
            }
            for caps in rule.regex.captures_iter(&current) {
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                changes.push(
                    Change::new(rule.kind, rule.description)
                        .at(offset_to_location(&current, whole.start()))
                        .with_snippets(whole.as_str(), rule.expand(&caps)),
                );
            }
            current = rule
                .regex
                .replace_all(&current, rule.replacement.as_str())
                .into_owned();
        }
        FallbackOutput {
            code: current,
            changes,
        }
    }
}

/// Which path produced an [`AstFirstOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The structural engine's output was used.
    Structural,
    /// The pattern fallback's output passed the gate and was used.
    Fallback,
    /// Neither path changed the buffer.
    Unchanged,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Structural => "structural",
            Self::Fallback => "fallback",
            Self::Unchanged => "unchanged",
        })
    }
}

/// Result of [`AstFirstTransformer::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstFirstOutcome {
    /// The resulting buffer.
    pub code: String,
    /// Changes from whichever path was used.
    pub changes: Vec<Change>,
    /// Warnings from both paths.
    pub warnings: Vec<Warning>,
    /// Which path produced `code`.
    pub strategy: Strategy,
}

impl AstFirstOutcome {
    fn unchanged(code: &str, warnings: Vec<Warning>) -> Self {
        Self {
            code: code.to_owned(),
            changes: Vec::new(),
            warnings,
            strategy: Strategy::Unchanged,
        }
    }
}

/// Runs the structural engine with a gated pattern fallback.
#[derive(Debug, Default)]
pub struct AstFirstTransformer {
    engine: TransformEngine,
    lock: TreeSitterSyntacticLock,
}

impl AstFirstTransformer {
    /// Creates a transformer with its own parser cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `visitors` to `code`, consulting `fallback` when the
    /// structural pass raises or changes nothing.
    ///
    /// # Errors
    ///
    /// Returns the structural error when there is no fallback to try, and
    /// [`SyntaxError::FallbackRejected`] when the structural pass raised and
    /// the fallback's output failed the gate.
    pub fn run(
        &self,
        code: &str,
        visitors: &VisitorSet,
        fallback: Option<&dyn PatternFallback>,
        path: &Path,
    ) -> Result<AstFirstOutcome, SyntaxError> {
        let (trigger, mut warnings, structural_error) =
            match self.engine.transform_with_visitors(code, visitors, path) {
                Ok(outcome) if outcome.has_changes() => {
                    return Ok(AstFirstOutcome {
                        code: outcome.code,
                        changes: outcome.changes,
                        warnings: outcome.warnings,
                        strategy: Strategy::Structural,
                    });
                }
                Ok(outcome) => (FallbackTrigger::NoStructuralChanges, outcome.warnings, None),
                Err(error) => (FallbackTrigger::StructuralError, Vec::new(), Some(error)),
            };

        let Some(fallback) = fallback else {
            return match structural_error {
                Some(error) => Err(error),
                None => Ok(AstFirstOutcome::unchanged(code, warnings)),
            };
        };

        let output = fallback.apply(code, trigger);
        if output.changes.is_empty() || output.code == code {
            if let Some(error) = structural_error {
                warnings.push(Warning::new(format!(
                    "structural rewrite unavailable: {error}"
                )));
            }
            return Ok(AstFirstOutcome::unchanged(code, warnings));
        }

        match self.gate(code, &output.code, path) {
            Ok(()) => {
                tracing::debug!(
                    target: "layerfix::syntax",
                    fallback = fallback.name(),
                    path = %path.display(),
                    changes = output.changes.len(),
                    "pattern fallback accepted"
                );
                Ok(AstFirstOutcome {
                    code: output.code,
                    changes: output.changes,
                    warnings,
                    strategy: Strategy::Fallback,
                })
            }
            Err(reason) => {
                tracing::debug!(
                    target: "layerfix::syntax",
                    fallback = fallback.name(),
                    path = %path.display(),
                    %reason,
                    "pattern fallback rejected"
                );
                if structural_error.is_some() {
                    return Err(SyntaxError::fallback_rejected(fallback.name(), reason));
                }
                warnings.push(Warning::new(format!(
                    "discarded `{}` output: {reason}",
                    fallback.name()
                )));
                Ok(AstFirstOutcome::unchanged(code, warnings))
            }
        }
    }

    fn gate(&self, before: &str, after: &str, path: &Path) -> Result<(), String> {
        check_balance_for(after, SupportedLanguage::for_path(path))
            .map_err(|issue| issue.to_string())?;
        match self.lock.introduces_errors(path, before, after) {
            Ok(false) => Ok(()),
            Ok(true) => Err("re-parse introduced new syntax errors".to_owned()),
            Err(error) => Err(error.to_string()),
        }
    }
}
