//! The structural transform engine.
//!
//! [`TransformEngine::transform_with_visitors`] parses a buffer, walks the
//! immutable tree once in pre-order, and offers every node to each visitor in
//! a [`VisitorSet`]. Visitors only propose rewrites; the engine plans,
//! applies, and re-parses the result before handing it back.

use std::fmt;
use std::path::Path;

use crate::change::{Change, Location, Warning};
use crate::edits::{EditPlan, Rewrite, TextEdit};
use crate::error::SyntaxError;
use crate::language::SupportedLanguage;
use crate::parser::Parser;
use crate::position::node_location;

/// A structural rewrite rule driven by tree nodes.
pub trait Visitor: Send + Sync {
    /// Stable identifier used in logs and overlap warnings.
    fn name(&self) -> &'static str;

    /// Inspects `node` and proposes rewrites through `cx`.
    fn visit(&self, node: tree_sitter::Node<'_>, cx: &mut VisitContext<'_>);
}

/// Per-run state handed to visitors.
#[derive(Debug)]
pub struct VisitContext<'src> {
    source: &'src str,
    path: &'src Path,
    current: &'static str,
    rewrites: Vec<Rewrite>,
    warnings: Vec<Warning>,
}

impl<'src> VisitContext<'src> {
    fn new(source: &'src str, path: &'src Path) -> Self {
        Self {
            source,
            path,
            current: "",
            rewrites: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// The buffer being transformed.
    #[must_use]
    pub const fn source(&self) -> &'src str {
        self.source
    }

    /// The path the buffer was read from.
    #[must_use]
    pub const fn path(&self) -> &'src Path {
        self.path
    }

    /// Returns the source text covered by `node`.
    #[must_use]
    pub fn text(&self, node: tree_sitter::Node<'_>) -> &'src str {
        node_text(node, self.source)
    }

    /// Proposes a group of edits described by `change`.
    pub fn propose(&mut self, edits: Vec<TextEdit>, change: Change) {
        self.rewrites.push(Rewrite::new(self.current, edits, change));
    }

    /// Records a warning anchored at `node`.
    pub fn warn(&mut self, node: tree_sitter::Node<'_>, message: impl Into<String>) {
        self.warnings
            .push(Warning::at(message, node_location(node)));
    }

    /// Location of `node` for change records.
    #[must_use]
    pub fn location(node: tree_sitter::Node<'_>) -> Location {
        node_location(node)
    }
}

/// Returns the source text covered by `node`, or an empty string when the
/// node's range does not fall on character boundaries.
#[must_use]
pub fn node_text<'src>(node: tree_sitter::Node<'_>, source: &'src str) -> &'src str {
    source.get(node.byte_range()).unwrap_or_default()
}

/// An ordered collection of visitors applied in a single walk.
#[derive(Default)]
pub struct VisitorSet {
    visitors: Vec<Box<dyn Visitor>>,
}

impl VisitorSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a visitor, returning the extended set.
    #[must_use]
    pub fn with(mut self, visitor: impl Visitor + 'static) -> Self {
        self.visitors.push(Box::new(visitor));
        self
    }

    /// Returns true when the set holds no visitors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }

    /// Names of the visitors in application order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.visitors.iter().map(|v| v.name())
    }
}

impl fmt::Debug for VisitorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Result of a structural transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutcome {
    /// The rewritten buffer (identical to the input when nothing changed).
    pub code: String,
    /// One entry per applied rewrite.
    pub changes: Vec<Change>,
    /// Non-fatal notes raised by visitors or the planner.
    pub warnings: Vec<Warning>,
}

impl TransformOutcome {
    /// Returns true when at least one rewrite was applied.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Tree-sitter driven rewrite engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransformEngine;

impl TransformEngine {
    /// Creates an engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Applies `visitors` to `code`.
    ///
    /// The grammar is chosen from `path`'s extension.
    ///
    /// # Errors
    ///
    /// Returns [`SyntaxError::ParseError`] when the input contains syntax
    /// errors and [`SyntaxError::RewriteError`] when the rewritten output no
    /// longer parses cleanly. In both cases no edit is applied.
    pub fn transform_with_visitors(
        &self,
        code: &str,
        visitors: &VisitorSet,
        path: &Path,
    ) -> Result<TransformOutcome, SyntaxError> {
        let language = SupportedLanguage::for_path(path);
        let mut parser = Parser::new(language)?;
        let parsed = parser.parse(code)?;

        if let Some(first) = parsed.first_error() {
            return Err(SyntaxError::parse(
                language,
                format!("{}: {first}", path.display()),
            ));
        }

        let mut cx = VisitContext::new(code, path);
        walk_preorder(parsed.root_node(), |node| {
            for visitor in &visitors.visitors {
                cx.current = visitor.name();
                visitor.visit(node, &mut cx);
            }
        });

        let VisitContext {
            rewrites,
            mut warnings,
            ..
        } = cx;
        let plan = EditPlan::resolve(rewrites);
        if plan.is_empty() {
            warnings.extend_from_slice(plan.warnings());
            return Ok(TransformOutcome {
                code: code.to_owned(),
                changes: Vec::new(),
                warnings,
            });
        }

        let (output, changes, plan_warnings) = plan.apply(code)?;
        warnings.extend(plan_warnings);

        let reparsed = parser.parse(&output)?;
        if let Some(first) = reparsed.first_error() {
            return Err(SyntaxError::rewrite(format!(
                "rewritten output for {} no longer parses: {first}",
                path.display()
            )));
        }

        tracing::debug!(
            target: "layerfix::syntax",
            path = %path.display(),
            %language,
            changes = changes.len(),
            "structural transform applied"
        );

        Ok(TransformOutcome {
            code: output,
            changes,
            warnings,
        })
    }
}

/// Visits `root` and every descendant in pre-order.
pub(crate) fn walk_preorder<'tree>(
    root: tree_sitter::Node<'tree>,
    mut visit: impl FnMut(tree_sitter::Node<'tree>),
) {
    let mut cursor = root.walk();
    'walk: loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                continue 'walk;
            }
            if !cursor.goto_parent() {
                break 'walk;
            }
        }
    }
}
