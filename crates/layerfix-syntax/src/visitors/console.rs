//! Removes `console.log(...)` statements.

use tree_sitter::Node;

use crate::change::Change;
use crate::edits::TextEdit;
use crate::engine::{VisitContext, Visitor, node_text};

/// Statement containers from which a statement can be deleted outright.
const STATEMENT_LISTS: &[&str] = &["program", "statement_block", "switch_case", "switch_default"];

/// Deletes `console.log` expression statements.
///
/// Statements that are the sole body of an `if` or loop are left alone since
/// deleting them would leave the construct without a body.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleLogVisitor;

impl ConsoleLogVisitor {
    /// Stable visitor name.
    pub const NAME: &'static str = "console-log";
}

impl Visitor for ConsoleLogVisitor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn visit(&self, node: Node<'_>, cx: &mut VisitContext<'_>) {
        if node.kind() != "expression_statement" {
            return;
        }
        if !node
            .parent()
            .is_some_and(|parent| STATEMENT_LISTS.contains(&parent.kind()))
        {
            return;
        }
        let mut cursor = node.walk();
        let Some(call) = node.named_children(&mut cursor).next() else {
            return;
        };
        if call.kind() != "call_expression" {
            return;
        }
        let is_console_log = call
            .child_by_field_name("function")
            .is_some_and(|callee| node_text(callee, cx.source()) == "console.log");
        if !is_console_log {
            return;
        }

        let range = removal_range(cx.source(), node.start_byte(), node.end_byte());
        cx.propose(
            vec![TextEdit::replace(range, "")],
            Change::new("console-log", "removed console.log statement")
                .at(VisitContext::location(node)),
        );
    }
}

/// Widens a statement's range to its whole line when nothing else shares it.
fn removal_range(source: &str, start: usize, end: usize) -> std::ops::Range<usize> {
    let before = source.get(..start).unwrap_or_default();
    let line_start = before.rfind('\n').map_or(0, |i| i.saturating_add(1));
    let after = source.get(end..).unwrap_or_default();
    let line_end = after.find('\n').map_or(source.len(), |i| end.saturating_add(i));

    let leading_blank = source
        .get(line_start..start)
        .is_some_and(|s| s.trim().is_empty());
    let trailing_blank = source
        .get(end..line_end)
        .is_some_and(|s| s.trim().is_empty());

    if leading_blank && trailing_blank {
        let through_newline = if line_end < source.len() {
            line_end.saturating_add(1)
        } else {
            line_end
        };
        line_start..through_newline
    } else {
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widens_to_whole_line_when_alone() {
        let source = "a();\n  console.log(1);\nb();\n";
        let start = source.find("console").expect("start");
        let end = source.find(");\nb").map(|i| i + 2).expect("end");
        assert_eq!(
            source.get(removal_range(source, start, end)),
            Some("  console.log(1);\n")
        );
    }

    #[test]
    fn keeps_neighbours_on_shared_lines() {
        let source = "a(); console.log(1); // note\n";
        let start = source.find("console").expect("start");
        let end = start + "console.log(1);".len();
        assert_eq!(removal_range(source, start, end), start..end);
    }
}
