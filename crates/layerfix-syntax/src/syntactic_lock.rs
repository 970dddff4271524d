//! Tree-sitter re-parse gate for rewritten buffers.
//!
//! [`TreeSitterSyntacticLock`] parses candidate output and reports the syntax
//! errors it contains. The pattern fallback gate and the strict validator
//! both use [`TreeSitterSyntacticLock::introduces_errors`], which compares a
//! candidate against the buffer it was derived from so that inputs which
//! already carried errors are not held to a stricter standard than before.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::SyntaxError;
use crate::language::SupportedLanguage;
use crate::parser::{ParsedSource, Parser};

/// Tree-sitter based syntactic validation.
///
/// # Thread Safety
///
/// Parsers are cached per language behind a mutex, so a single lock can be
/// shared across worker threads.
pub struct TreeSitterSyntacticLock {
    parsers: Mutex<HashMap<SupportedLanguage, Parser>>,
}

impl TreeSitterSyntacticLock {
    /// Creates a new syntactic lock.
    ///
    /// Parsers for each language are created lazily on first use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            parsers: Mutex::new(HashMap::new()),
        }
    }

    fn with_parse<T>(
        &self,
        path: &Path,
        content: &str,
        inspect: impl FnOnce(&ParsedSource) -> T,
    ) -> Result<T, SyntaxError> {
        let language = SupportedLanguage::for_path(path);
        let mut parsers = self
            .parsers
            .lock()
            .map_err(|_| SyntaxError::parser_init(language, "parser cache poisoned"))?;
        let parser = match parsers.entry(language) {
            Entry::Occupied(cached) => cached.into_mut(),
            Entry::Vacant(slot) => slot.insert(Parser::new(language)?),
        };
        let parsed = parser.parse(content)?;
        Ok(inspect(&parsed))
    }

    /// Validates a single buffer.
    ///
    /// Returns the syntax errors found. An empty list means the buffer parsed
    /// cleanly. Unknown extensions are parsed with the TSX grammar.
    ///
    /// # Errors
    ///
    /// Returns an error if the parser cannot be initialised or the internal
    /// parser lock is poisoned.
    pub fn validate_file(
        &self,
        path: &Path,
        content: &str,
    ) -> Result<Vec<ValidationFailure>, SyntaxError> {
        self.with_parse(path, content, |result| {
            result
                .errors()
                .into_iter()
                .map(|e| ValidationFailure {
                    path: path.to_path_buf(),
                    line: e.line,
                    column: e.column,
                    message: e.message,
                })
                .collect()
        })
    }

    /// Counts the syntax errors in a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the parser cannot be initialised.
    pub fn error_count(&self, path: &Path, content: &str) -> Result<usize, SyntaxError> {
        self.with_parse(path, content, ParsedSource::error_count)
    }

    /// Returns true when `after` has more syntax errors than `before`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parser cannot be initialised.
    pub fn introduces_errors(
        &self,
        path: &Path,
        before: &str,
        after: &str,
    ) -> Result<bool, SyntaxError> {
        let baseline = self.error_count(path, before)?;
        let candidate = self.error_count(path, after)?;
        Ok(candidate > baseline)
    }
}

impl Default for TreeSitterSyntacticLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TreeSitterSyntacticLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSitterSyntacticLock")
            .field(
                "cached_parsers",
                &self.parsers.lock().map(|parsers| parsers.len()).ok(),
            )
            .finish_non_exhaustive()
    }
}

/// A validation failure from the syntactic lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Path to the affected file.
    pub path: PathBuf,
    /// Line number (one-based).
    pub line: u32,
    /// Column number (one-based).
    pub column: u32,
    /// Human-readable description of the problem.
    pub message: String,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.path.display(),
            self.line,
            self.column,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("page.tsx", "export const A = () => <div />;", true)]
    #[case("page.tsx", "export const A = () => <div>;", false)]
    #[case("util.ts", "const x: number = 1;", true)]
    #[case("util.ts", "const x: number = ;", false)]
    fn validates_buffers(#[case] file: &str, #[case] content: &str, #[case] should_pass: bool) {
        let lock = TreeSitterSyntacticLock::new();
        let failures = lock
            .validate_file(Path::new(file), content)
            .expect("validate");
        assert_eq!(failures.is_empty(), should_pass, "{failures:?}");
    }

    #[test]
    fn failure_display_includes_location() {
        let failure = ValidationFailure {
            path: PathBuf::from("src/app.tsx"),
            line: 3,
            column: 7,
            message: "syntax error".to_owned(),
        };
        assert_eq!(failure.to_string(), "src/app.tsx:3:7: syntax error");
    }

    #[test]
    fn compares_error_counts_against_baseline() {
        let lock = TreeSitterSyntacticLock::new();
        let path = Path::new("a.ts");

        assert!(
            !lock
                .introduces_errors(path, "let a = 1;", "let a = 2;")
                .expect("compare")
        );
        assert!(
            lock.introduces_errors(path, "let a = 1;", "let a = ;")
                .expect("compare")
        );
        assert!(
            !lock
                .introduces_errors(path, "let a = ;", "let a = ;")
                .expect("compare")
        );
    }
}
