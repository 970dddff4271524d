//! Edit planning and application.
//!
//! Visitors never mutate the buffer. They propose [`Rewrite`]s made of one
//! or more [`TextEdit`]s against the original byte offsets. Planning accepts
//! rewrites outermost-first and drops any rewrite that overlaps one already
//! accepted. Application then splices the accepted edits from the end of the
//! buffer towards the start so earlier offsets stay valid.

use std::ops::Range;

use crate::change::{Change, Warning};
use crate::error::SyntaxError;

/// A replacement of a byte range in the original buffer.
///
/// An empty range is an insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    /// Byte range in the original buffer.
    pub range: Range<usize>,
    /// Text to splice in.
    pub replacement: String,
}

impl TextEdit {
    /// Creates a replacement edit.
    #[must_use]
    pub fn replace(range: Range<usize>, replacement: impl Into<String>) -> Self {
        Self {
            range,
            replacement: replacement.into(),
        }
    }

    /// Creates an insertion at `offset`.
    #[must_use]
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::replace(offset..offset, text)
    }

    fn overlaps(&self, other: &Self) -> bool {
        let (a, b) = (&self.range, &other.range);
        match (a.is_empty(), b.is_empty()) {
            (true, true) => a.start == b.start,
            (true, false) => b.start < a.start && a.start < b.end,
            (false, true) => a.start < b.start && b.start < a.end,
            (false, false) => a.start < b.end && b.start < a.end,
        }
    }
}

/// An atomic group of edits proposed by one visitor.
///
/// Either every edit in the group is applied or none is.
#[derive(Debug, Clone)]
pub struct Rewrite {
    visitor: &'static str,
    edits: Vec<TextEdit>,
    change: Change,
}

impl Rewrite {
    /// Creates a rewrite attributed to `visitor`.
    #[must_use]
    pub const fn new(visitor: &'static str, edits: Vec<TextEdit>, change: Change) -> Self {
        Self {
            visitor,
            edits,
            change,
        }
    }

    /// The visitor that proposed this rewrite.
    #[must_use]
    pub const fn visitor(&self) -> &'static str {
        self.visitor
    }

    /// The edits making up this rewrite.
    #[must_use]
    pub fn edits(&self) -> &[TextEdit] {
        &self.edits
    }

    /// The change record describing this rewrite.
    #[must_use]
    pub const fn change(&self) -> &Change {
        &self.change
    }

    fn span(&self) -> Range<usize> {
        let start = self.edits.iter().map(|e| e.range.start).min().unwrap_or(0);
        let end = self.edits.iter().map(|e| e.range.end).max().unwrap_or(0);
        start..end
    }

    fn conflicts_with(&self, other: &Self) -> bool {
        self.edits
            .iter()
            .any(|mine| other.edits.iter().any(|theirs| mine.overlaps(theirs)))
    }

    fn nested_in(&self, other: &Self) -> bool {
        let (inner, outer) = (self.span(), other.span());
        self.visitor == other.visitor && outer.start <= inner.start && inner.end <= outer.end
    }
}

/// Rewrites accepted for application, plus warnings about dropped ones.
#[derive(Debug, Default)]
pub struct EditPlan {
    accepted: Vec<Rewrite>,
    warnings: Vec<Warning>,
}

impl EditPlan {
    /// Resolves overlaps between proposed rewrites.
    ///
    /// Rewrites are considered in source order, widest first, so the
    /// outermost candidate wins. A rewrite nested inside an accepted rewrite
    /// from the same visitor is subsumed silently; any other conflict is
    /// dropped with a warning.
    #[must_use]
    pub fn resolve(mut proposed: Vec<Rewrite>) -> Self {
        proposed.retain(|r| !r.edits.is_empty());
        proposed.sort_by(|a, b| {
            let (sa, sb) = (a.span(), b.span());
            sa.start.cmp(&sb.start).then(sb.end.cmp(&sa.end))
        });

        let mut plan = Self::default();
        for candidate in proposed {
            let Some(blocker) = plan.accepted.iter().find(|a| candidate.conflicts_with(a)) else {
                plan.accepted.push(candidate);
                continue;
            };
            if candidate.nested_in(blocker) {
                tracing::trace!(
                    target: "layerfix::syntax",
                    visitor = candidate.visitor,
                    "nested rewrite subsumed by enclosing rewrite"
                );
                continue;
            }
            plan.warnings.push(Warning {
                message: format!(
                    "dropped overlapping rewrite from `{}`: {}",
                    candidate.visitor, candidate.change.description
                ),
                location: candidate.change.location,
            });
        }
        plan
    }

    /// Returns true when no rewrite was accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Warnings about rewrites that were dropped.
    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Applies the plan to `source`, returning the new buffer and one change
    /// per accepted rewrite in source order.
    ///
    /// # Errors
    ///
    /// Returns an error if an edit range falls outside the buffer or off a
    /// UTF-8 boundary.
    pub fn apply(self, source: &str) -> Result<(String, Vec<Change>, Vec<Warning>), SyntaxError> {
        let mut edits: Vec<&TextEdit> = self.accepted.iter().flat_map(|r| r.edits.iter()).collect();
        let output = apply_edits(source, &mut edits)?;

        let changes = self
            .accepted
            .iter()
            .map(|rewrite| {
                let mut change = rewrite.change.clone();
                if change.before.is_none() {
                    if let [single] = rewrite.edits.as_slice() {
                        let before = source.get(single.range.clone()).unwrap_or_default();
                        change.before = Some(before.to_owned());
                        change.after = Some(single.replacement.clone());
                    }
                }
                change
            })
            .collect();

        Ok((output, changes, self.warnings))
    }
}

/// Splices edits into `source` from the end towards the start.
///
/// Edits sharing a start offset are applied widest first so an insertion at
/// the start of a replaced range lands before the replacement.
///
/// # Errors
///
/// Returns an error if a range falls outside the buffer or off a UTF-8
/// boundary.
pub fn apply_edits(source: &str, edits: &mut [&TextEdit]) -> Result<String, SyntaxError> {
    edits.sort_by(|a, b| {
        b.range
            .start
            .cmp(&a.range.start)
            .then(b.range.end.cmp(&a.range.end))
    });

    let mut result = source.to_owned();
    for edit in edits.iter() {
        let range = edit.range.clone();
        if range.start > range.end || range.end > result.len() {
            return Err(SyntaxError::internal_error(format!(
                "edit range {range:?} is outside the buffer"
            )));
        }
        if !result.is_char_boundary(range.start) || !result.is_char_boundary(range.end) {
            return Err(SyntaxError::internal_error(
                "edit range is not on a UTF-8 boundary",
            ));
        }
        result.replace_range(range, &edit.replacement);
    }
    Ok(result)
}
