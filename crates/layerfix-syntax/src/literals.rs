//! Ranges of a buffer that hold literal text rather than code.
//!
//! Text-level rewrites use these ranges to leave string, template, comment,
//! regex, and JSX text content alone. The ranges come from a best-effort
//! parse, so buffers with syntax errors still yield the literals Tree-sitter
//! could recover.

use std::ops::Range;
use std::path::Path;

use crate::engine::walk_preorder;
use crate::error::SyntaxError;
use crate::language::SupportedLanguage;
use crate::parser::Parser;

const LITERAL_KINDS: &[&str] = &[
    "string",
    "template_string",
    "comment",
    "regex",
    "jsx_text",
    "html_character_reference",
];

/// Byte ranges of literal nodes in `source`, in source order.
///
/// # Errors
///
/// Returns an error if the parser cannot be initialised.
pub fn literal_ranges(source: &str, path: &Path) -> Result<Vec<Range<usize>>, SyntaxError> {
    let mut parser = Parser::new(SupportedLanguage::for_path(path))?;
    let parsed = parser.parse(source)?;
    let mut ranges: Vec<Range<usize>> = Vec::new();
    walk_preorder(parsed.root_node(), |node| {
        if !LITERAL_KINDS.contains(&node.kind()) {
            return;
        }
        let range = node.byte_range();
        let nested = ranges
            .last()
            .is_some_and(|outer| outer.start <= range.start && range.end <= outer.end);
        if !nested {
            ranges.push(range);
        }
    });
    Ok(ranges)
}

/// Returns true when `offset` falls inside any of `ranges`.
#[must_use]
pub fn within_literal(ranges: &[Range<usize>], offset: usize) -> bool {
    ranges.iter().any(|range| range.contains(&offset))
}
