//! Per-file execution context handed to every layer.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::{LayerId, LayerOutcome, LayerStatus};

/// Ordered set of enabled feature flag names.
///
/// Flags never change which layers run or in what order; individual layers
/// may consult them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureFlags(BTreeSet<String>);

impl FeatureFlags {
    /// Creates an empty flag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `name` is enabled.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Enabled flags in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for FeatureFlags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(Into::into)
                .map(|flag: String| flag.trim().to_owned())
                .filter(|flag| !flag.is_empty())
                .collect(),
        )
    }
}

/// State owned by one orchestrator invocation for one file.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// The file being transformed.
    pub file_path: PathBuf,
    /// When set, no snapshots are taken and nothing is written.
    pub dry_run: bool,
    /// Emit per-change detail at info level.
    pub verbose: bool,
    /// Outcomes of the layers that already ran for this file.
    pub previous_results: Vec<LayerOutcome>,
    /// Enabled feature flags.
    pub feature_flags: FeatureFlags,
}

impl PipelineContext {
    /// Creates a context for `file_path` with no earlier results.
    #[must_use]
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            dry_run: false,
            verbose: false,
            previous_results: Vec::new(),
            feature_flags: FeatureFlags::new(),
        }
    }

    /// Sets the dry-run flag.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the verbose flag.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Replaces the feature flags.
    #[must_use]
    pub fn with_feature_flags(mut self, flags: FeatureFlags) -> Self {
        self.feature_flags = flags;
        self
    }

    /// The file being transformed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Returns true when `layer` already ran in this execution and had its
    /// output committed.
    #[must_use]
    pub fn layer_applied(&self, layer: LayerId) -> bool {
        self.previous_results
            .iter()
            .any(|outcome| outcome.id == layer && outcome.status == LayerStatus::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_sorted_and_trimmed() {
        let flags: FeatureFlags = ["zeta", " alpha ", ""].into_iter().collect();
        let names: Vec<_> = flags.iter().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(flags.is_enabled("alpha"));
        assert!(!flags.is_enabled("beta"));
    }

    #[test]
    fn reports_applied_layers_only() {
        let mut ctx = PipelineContext::new("src/a.ts");
        ctx.previous_results.push(LayerOutcome {
            id: LayerId::Patterns,
            status: LayerStatus::Applied,
            changes: Vec::new(),
            warnings: Vec::new(),
            attempts: 1,
            backup: None,
        });
        ctx.previous_results.push(LayerOutcome {
            id: LayerId::Components,
            status: LayerStatus::Unchanged,
            changes: Vec::new(),
            warnings: Vec::new(),
            attempts: 1,
            backup: None,
        });

        assert!(ctx.layer_applied(LayerId::Patterns));
        assert!(!ctx.layer_applied(LayerId::Components));
        assert!(!ctx.layer_applied(LayerId::Hydration));
    }
}
