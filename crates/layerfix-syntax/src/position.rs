//! Shared position conversion helpers.
//!
//! Tree-sitter positions are zero-based. Changes, warnings, and validation
//! failures report one-based line and column numbers.

use crate::change::Location;

/// Converts a Tree-sitter position (0-based) to one-based display coordinates.
#[must_use]
pub(crate) fn point_to_one_based(pos: tree_sitter::Point) -> (u32, u32) {
    // Line/column numbers will realistically never exceed u32::MAX.
    let line = u32::try_from(pos.row.saturating_add(1)).unwrap_or(u32::MAX);
    let column = u32::try_from(pos.column.saturating_add(1)).unwrap_or(u32::MAX);
    (line, column)
}

/// Builds a one-based [`Location`] for the start of a node.
#[must_use]
pub(crate) fn node_location(node: tree_sitter::Node<'_>) -> Location {
    let (line, column) = point_to_one_based(node.start_position());
    Location { line, column }
}

/// Computes a one-based location for a byte offset by scanning the source.
///
/// Offsets past the end of the source clamp to the final position.
#[must_use]
pub fn offset_to_location(source: &str, offset: usize) -> Location {
    let mut line: u32 = 1;
    let mut column: u32 = 1;
    for (index, ch) in source.char_indices() {
        if index >= offset {
            break;
        }
        if ch == '\n' {
            line = line.saturating_add(1);
            column = 1;
        } else {
            column = column.saturating_add(1);
        }
    }
    Location { line, column }
}
