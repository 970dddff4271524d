//! Safety validation of layer output.
//!
//! Validators compare the buffer a layer received with the buffer it
//! produced. The orchestrator only consults them when the two differ, and
//! reverts the layer when a validator asks for it.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use layerfix_syntax::{SupportedLanguage, TreeSitterSyntacticLock, check_balance_for};

/// Verdict on one layer's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the output is acceptable.
    pub valid: bool,
    /// Whether the orchestrator should restore the pre-layer buffer.
    pub should_revert: bool,
    /// Why the output was rejected.
    pub reason: Option<String>,
    /// Hints for a human reviewer.
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    /// Accepts the output.
    #[must_use]
    pub const fn accept() -> Self {
        Self {
            valid: true,
            should_revert: false,
            reason: None,
            suggestions: Vec::new(),
        }
    }

    /// Rejects the output and asks for a revert.
    #[must_use]
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            should_revert: true,
            reason: Some(reason.into()),
            suggestions: Vec::new(),
        }
    }

    /// Adds a reviewer hint.
    #[must_use]
    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Judges whether a layer's output may replace its input.
pub trait Validator: Send + Sync {
    /// Validates `after`, derived from `before`, for the file at `path`.
    fn validate(&self, before: &str, after: &str, path: &Path) -> ValidationResult;
}

impl<T: Validator + ?Sized> Validator for Arc<T> {
    fn validate(&self, before: &str, after: &str, path: &Path) -> ValidationResult {
        self.as_ref().validate(before, after, path)
    }
}

/// The always-on checks: non-empty output with balanced delimiters.
#[derive(Debug, Default, Clone, Copy)]
pub struct SafetyValidator;

impl Validator for SafetyValidator {
    fn validate(&self, _before: &str, after: &str, path: &Path) -> ValidationResult {
        if after.trim().is_empty() {
            return ValidationResult::reject("layer produced empty output")
                .suggest("check the layer for a rule that deletes the whole buffer");
        }
        match check_balance_for(after, SupportedLanguage::for_path(path)) {
            Ok(()) => ValidationResult::accept(),
            Err(issue) => ValidationResult::reject(format!("unbalanced delimiters: {issue}"))
                .suggest("inspect the layer's edits around the reported position"),
        }
    }
}

/// Rejects output whose parse has more error nodes than its input.
///
/// Only files with a recognised script extension are checked; configuration
/// files pass through.
#[derive(Debug, Default)]
pub struct SyntaxValidator {
    lock: TreeSitterSyntacticLock,
}

impl SyntaxValidator {
    /// Creates a validator with its own parser cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Validator for SyntaxValidator {
    fn validate(&self, before: &str, after: &str, path: &Path) -> ValidationResult {
        if SupportedLanguage::from_path(path).is_none() {
            return ValidationResult::accept();
        }
        match self.lock.introduces_errors(path, before, after) {
            Ok(false) => ValidationResult::accept(),
            Ok(true) => ValidationResult::reject("output introduces new syntax errors"),
            Err(error) => ValidationResult::reject(format!("could not parse output: {error}")),
        }
    }
}

/// Runs validators in order; the first rejection wins.
#[derive(Default)]
pub struct ValidatorChain {
    validators: Vec<Box<dyn Validator>>,
}

impl ValidatorChain {
    /// Creates an empty chain that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a validator.
    #[must_use]
    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// The safety validator, followed by the syntax validator when `strict`.
    #[must_use]
    pub fn standard(strict: bool) -> Self {
        let chain = Self::new().with(SafetyValidator);
        if strict {
            chain.with(SyntaxValidator::new())
        } else {
            chain
        }
    }

    /// Number of validators in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Returns true when the chain has no validators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl fmt::Debug for ValidatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorChain")
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl Validator for ValidatorChain {
    fn validate(&self, before: &str, after: &str, path: &Path) -> ValidationResult {
        self.validators
            .iter()
            .map(|validator| validator.validate(before, after, path))
            .find(|result| !result.valid || result.should_revert)
            .unwrap_or_else(ValidationResult::accept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    const PATH: &str = "src/app.tsx";

    #[rstest]
    #[case("")]
    #[case("   \n\t")]
    fn rejects_empty_output(#[case] after: &str) {
        let result = SafetyValidator.validate("let a = 1;", after, Path::new(PATH));
        assert!(!result.valid);
        assert!(result.should_revert);
        assert!(result.reason.is_some_and(|reason| reason.contains("empty")));
    }

    #[rstest]
    #[case("function f() {")]
    #[case("call(a, b]")]
    #[case("}")]
    fn rejects_unbalanced_output(#[case] after: &str) {
        let result = SafetyValidator.validate("", after, Path::new(PATH));
        assert!(result.should_revert);
        assert!(
            result
                .reason
                .is_some_and(|reason| reason.starts_with("unbalanced delimiters"))
        );
    }

    #[rstest]
    #[case("const s = '{';")]
    #[case("// )\nlet a = [1, 2];")]
    #[case("const t = `${a}}`;")]
    fn accepts_delimiters_inside_literals(#[case] after: &str) {
        assert!(SafetyValidator.validate("", after, Path::new(PATH)).valid);
    }

    #[rstest]
    #[case("export const P = ({ x }) => <p>It's {x ? 'a' : 'b'}</p>;")]
    #[case("export const Q = () => <blockquote>\"Don't\" {who}</blockquote>;")]
    fn accepts_quotes_in_jsx_text(#[case] after: &str) {
        let result = SafetyValidator.validate("", after, Path::new(PATH));
        assert!(result.valid, "{:?}", result.reason);
    }

    #[test]
    fn keyed_list_with_apostrophes_is_not_reverted() {
        use crate::layer::{PipelineContext, Transform};
        use crate::layers::ComponentsLayer;

        let input = "export const L = ({ items }) => (\n  <ul>{items.map((item) => <li>It's {item.name ? 'yes' : 'no'}</li>)}</ul>\n);\n";
        let layer = ComponentsLayer::new().expect("layer");
        let output = layer
            .transform(input, &PipelineContext::new(PATH))
            .expect("transform");

        assert!(output.code.contains("key={index}"), "{}", output.code);
        let result = SafetyValidator.validate(input, &output.code, Path::new(PATH));
        assert!(result.valid, "{:?}", result.reason);
    }

    #[test]
    fn syntax_validator_compares_against_input() {
        let validator = SyntaxValidator::new();
        let broken = "const = ;";
        assert!(validator.validate(broken, broken, Path::new(PATH)).valid);
        assert!(
            validator
                .validate("const a = 1;", "const a = ;", Path::new(PATH))
                .should_revert
        );
    }

    #[test]
    fn syntax_validator_ignores_config_files() {
        let validator = SyntaxValidator::new();
        let result = validator.validate("{}", "{ not js", Path::new("tsconfig.json"));
        assert!(result.valid);
    }

    struct Reject(&'static str);

    impl Validator for Reject {
        fn validate(&self, _: &str, _: &str, _: &Path) -> ValidationResult {
            ValidationResult::reject(self.0)
        }
    }

    #[test]
    fn chain_reports_first_rejection() {
        let chain = ValidatorChain::new()
            .with(SafetyValidator)
            .with(Reject("first"))
            .with(Reject("second"));
        let result = chain.validate("a", "b", Path::new(PATH));
        assert_eq!(result.reason.as_deref(), Some("first"));
    }

    #[test]
    fn standard_chain_length_follows_strictness() {
        assert_eq!(ValidatorChain::standard(false).len(), 1);
        assert_eq!(ValidatorChain::standard(true).len(), 2);
        assert!(ValidatorChain::new().validate("a", "", Path::new(PATH)).valid);
    }

    proptest! {
        #[test]
        fn dropping_a_closing_brace_is_rejected(depth in 1_usize..6, body in "[a-z ;=0-9]{0,12}") {
            let open = "function f() {".repeat(depth);
            let close = "}".repeat(depth);
            let balanced = format!("{open}{body}{close}");
            let truncated = format!("{open}{body}{}", "}".repeat(depth - 1));

            prop_assert!(SafetyValidator.validate("", &balanced, Path::new(PATH)).valid);
            prop_assert!(SafetyValidator.validate(&balanced, &truncated, Path::new(PATH)).should_revert);
        }
    }
}
