//! Tree-sitter parsing for script buffers.
//!
//! Tree-sitter always produces a tree; broken input shows up as ERROR and
//! MISSING nodes, which [`ParsedSource`] reports as [`ParseDiagnostic`]s.

use std::fmt;
use std::ops::Range;
use std::path::Path;

use crate::error::SyntaxError;
use crate::language::SupportedLanguage;
use crate::position::point_to_one_based;

/// Longest snippet of offending source kept on a diagnostic, in characters.
const SNIPPET_CHARS: usize = 40;

/// One ERROR or MISSING node found in a parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    /// Byte span of the node.
    pub byte_range: Range<usize>,
    /// One-based line of the node start.
    pub line: u32,
    /// One-based column of the node start.
    pub column: u32,
    /// Offending source text, shortened to a few dozen characters.
    pub snippet: String,
    /// Either "unexpected input" or "expected <kind>".
    pub message: String,
}

impl ParseDiagnostic {
    fn from_node(node: tree_sitter::Node<'_>, source: &str) -> Self {
        let byte_range = node.byte_range();
        let text = source.get(byte_range.clone()).unwrap_or_default();
        let snippet = if text.chars().count() > SNIPPET_CHARS {
            let head: String = text.chars().take(SNIPPET_CHARS).collect();
            format!("{head}…")
        } else {
            text.to_owned()
        };
        let message = if node.is_missing() {
            format!("expected {}", node.kind())
        } else {
            "unexpected input".to_owned()
        };
        let (line, column) = point_to_one_based(node.start_position());
        Self {
            byte_range,
            line,
            column,
            snippet,
            message,
        }
    }
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)?;
        if !self.snippet.is_empty() {
            write!(f, " near `{}`", self.snippet)?;
        }
        Ok(())
    }
}

/// A parsed buffer together with the tree Tree-sitter built for it.
#[derive(Debug)]
pub struct ParsedSource {
    tree: tree_sitter::Tree,
    source: String,
}

impl ParsedSource {
    /// Root of the syntax tree.
    #[must_use]
    pub fn root_node(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    /// Every ERROR and MISSING node, in document order.
    #[must_use]
    pub fn errors(&self) -> Vec<ParseDiagnostic> {
        let mut found = Vec::new();
        self.for_each_error(|node| {
            found.push(ParseDiagnostic::from_node(node, &self.source));
            true
        });
        found
    }

    /// The first ERROR or MISSING node, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<ParseDiagnostic> {
        let mut first = None;
        self.for_each_error(|node| {
            first = Some(ParseDiagnostic::from_node(node, &self.source));
            false
        });
        first
    }

    /// Number of ERROR and MISSING nodes.
    #[must_use]
    pub fn error_count(&self) -> usize {
        let mut count = 0;
        self.for_each_error(|_| {
            count += 1;
            true
        });
        count
    }

    /// Visits error nodes in pre-order until `visit` returns false.
    ///
    /// Subtrees without errors are never entered.
    fn for_each_error(&self, mut visit: impl FnMut(tree_sitter::Node<'_>) -> bool) {
        let root = self.tree.root_node();
        if !root.has_error() {
            return;
        }
        let mut cursor = root.walk();
        loop {
            let node = cursor.node();
            if (node.is_error() || node.is_missing()) && !visit(node) {
                return;
            }
            if node.has_error() && cursor.goto_first_child() {
                continue;
            }
            loop {
                if cursor.goto_next_sibling() {
                    break;
                }
                if !cursor.goto_parent() {
                    return;
                }
            }
        }
    }
}

/// A Tree-sitter parser bound to one grammar.
pub struct Parser {
    inner: tree_sitter::Parser,
    language: SupportedLanguage,
}

impl Parser {
    /// Creates a parser for `language`.
    ///
    /// # Errors
    ///
    /// Returns [`SyntaxError::ParserInitError`] if the grammar cannot be loaded.
    pub fn new(language: SupportedLanguage) -> Result<Self, SyntaxError> {
        let mut inner = tree_sitter::Parser::new();
        inner
            .set_language(&language.tree_sitter_language())
            .map_err(|error| SyntaxError::parser_init(language, error.to_string()))?;
        Ok(Self { inner, language })
    }

    /// Creates a parser for the grammar `path` selects.
    ///
    /// # Errors
    ///
    /// Returns [`SyntaxError::ParserInitError`] if the grammar cannot be loaded.
    pub fn for_path(path: &Path) -> Result<Self, SyntaxError> {
        Self::new(SupportedLanguage::for_path(path))
    }

    /// Grammar this parser uses.
    #[must_use]
    pub const fn language(&self) -> SupportedLanguage {
        self.language
    }

    /// Parses `source` from scratch.
    ///
    /// Syntax errors do not fail the call; inspect the result instead.
    ///
    /// # Errors
    ///
    /// Returns [`SyntaxError::ParseError`] only when Tree-sitter gives up
    /// without producing a tree.
    pub fn parse(&mut self, source: &str) -> Result<ParsedSource, SyntaxError> {
        let tree = self
            .inner
            .parse(source, None)
            .ok_or_else(|| SyntaxError::parse(self.language, "no syntax tree produced"))?;
        Ok(ParsedSource {
            tree,
            source: source.to_owned(),
        })
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}
