//! The layer contract.
//!
//! A layer is one rewrite stage with a fixed [`LayerId`]. Layers implement
//! [`Transform`] and report a [`TransformResult`]; the orchestrator turns
//! each call into a [`LayerOutcome`].

mod context;

use std::fmt;
use std::path::PathBuf;

use layerfix_syntax::{Change, SyntaxError, Warning};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use context::{FeatureFlags, PipelineContext};

/// The seven layers, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum LayerId {
    /// Project configuration files.
    Configuration = 1,
    /// Source-wide pattern cleanup.
    Patterns = 2,
    /// Component structure.
    Components = 3,
    /// Server rendering safety.
    Hydration = 4,
    /// Framework conventions.
    Framework = 5,
    /// Test file hygiene.
    Testing = 6,
    /// Rules learned from earlier runs.
    Adaptive = 7,
}

impl LayerId {
    /// Every layer in ascending order.
    pub const ALL: [Self; 7] = [
        Self::Configuration,
        Self::Patterns,
        Self::Components,
        Self::Hydration,
        Self::Framework,
        Self::Testing,
        Self::Adaptive,
    ];

    /// The layer's number, 1 through 7.
    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Short lowercase name used in logs and backup tags.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Patterns => "patterns",
            Self::Components => "components",
            Self::Hydration => "hydration",
            Self::Framework => "framework",
            Self::Testing => "testing",
            Self::Adaptive => "adaptive",
        }
    }

    /// Direct prerequisites. Every prerequisite has a lower number.
    #[must_use]
    pub const fn prerequisites(self) -> &'static [Self] {
        match self {
            Self::Configuration => &[],
            Self::Patterns => &[Self::Configuration],
            Self::Components => &[Self::Patterns],
            Self::Hydration => &[Self::Components],
            Self::Framework => &[Self::Hydration],
            Self::Testing => &[Self::Framework],
            Self::Adaptive => &[Self::Testing],
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

/// An integer that names no layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown layer id {0}; expected 1 through 7")]
pub struct UnknownLayerId(pub i64);

impl TryFrom<i64> for LayerId {
    type Error = UnknownLayerId;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|id| i64::from(id.number()) == value)
            .ok_or(UnknownLayerId(value))
    }
}

impl From<LayerId> for i64 {
    fn from(id: LayerId) -> Self {
        Self::from(id.number())
    }
}

/// What a layer returns.
///
/// `success` means the layer ran without error. It does not mean anything
/// changed: a successful layer may return the input untouched. Ask
/// [`TransformResult::has_changes`] whether a rewrite happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
    /// Whether the layer ran to completion.
    pub success: bool,
    /// The layer's output buffer. Equal to the input when nothing changed or
    /// the layer failed.
    pub code: String,
    /// One entry per atomic rewrite.
    pub changes: Vec<Change>,
    /// Non-fatal notes.
    pub warnings: Vec<Warning>,
    /// Failure description when `success` is false.
    pub error: Option<String>,
}

impl TransformResult {
    /// A successful run that left `code` as it was.
    #[must_use]
    pub fn unchanged(code: impl Into<String>) -> Self {
        Self {
            success: true,
            code: code.into(),
            changes: Vec::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    /// A successful run that produced `code` through `changes`.
    #[must_use]
    pub fn changed(code: impl Into<String>, changes: Vec<Change>) -> Self {
        Self {
            changes,
            ..Self::unchanged(code)
        }
    }

    /// A run that could not complete. `code` should be the input buffer.
    #[must_use]
    pub fn failed(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::unchanged(code)
        }
    }

    /// Attaches warnings.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<Warning>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Returns true when at least one rewrite was reported.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// An exception raised by a layer call. These are retried.
#[derive(Debug, Error)]
pub enum LayerError {
    /// The layer could not complete this attempt.
    #[error("layer {layer} failed: {message}")]
    Transient {
        /// The failing layer.
        layer: LayerId,
        /// Description of the failure.
        message: String,
    },
    /// The layer panicked. Caught at the contract boundary.
    #[error("layer {layer} panicked: {message}")]
    Panicked {
        /// The failing layer.
        layer: LayerId,
        /// The panic payload, when it was a string.
        message: String,
    },
    /// A syntax-level operation failed unexpectedly.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
}

impl LayerError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(layer: LayerId, message: impl Into<String>) -> Self {
        Self::Transient {
            layer,
            message: message.into(),
        }
    }
}

/// A rewrite stage.
///
/// Implementations must be total over any input string and idempotent:
/// running a layer on its own output reports no further changes.
pub trait Transform: Send + Sync {
    /// The layer this transform implements.
    fn id(&self) -> LayerId;

    /// Rewrites `code`.
    ///
    /// # Errors
    ///
    /// Returns a [`LayerError`] for failures worth retrying. Deterministic
    /// failures should be reported as [`TransformResult::failed`] instead.
    fn transform(&self, code: &str, ctx: &PipelineContext) -> Result<TransformResult, LayerError>;
}

/// How one layer's run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LayerStatus {
    /// Output was validated and committed.
    Applied,
    /// The layer ran and changed nothing.
    Unchanged,
    /// Output failed validation and the buffer was restored.
    Reverted {
        /// The validator's reason.
        reason: String,
    },
    /// The layer failed, after retries where applicable.
    Failed {
        /// The final error.
        error: String,
    },
}

impl LayerStatus {
    /// True for [`LayerStatus::Applied`] and [`LayerStatus::Unchanged`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Applied | Self::Unchanged)
    }

    /// Lowercase label for summaries.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Reverted { .. } => "reverted",
            Self::Failed { .. } => "failed",
        }
    }
}

/// The orchestrator's record of one layer run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerOutcome {
    /// The layer that ran.
    pub id: LayerId,
    /// How the run ended.
    pub status: LayerStatus,
    /// Committed changes. Empty unless `status` is applied.
    pub changes: Vec<Change>,
    /// Warnings raised by the layer.
    pub warnings: Vec<Warning>,
    /// Invocations made, including retries.
    pub attempts: u32,
    /// Snapshot taken before the layer ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, LayerId::Configuration)]
    #[case(4, LayerId::Hydration)]
    #[case(7, LayerId::Adaptive)]
    fn converts_from_numbers(#[case] number: i64, #[case] expected: LayerId) {
        assert_eq!(LayerId::try_from(number), Ok(expected));
    }

    #[rstest]
    #[case(0)]
    #[case(8)]
    #[case(-3)]
    fn rejects_out_of_range_numbers(#[case] number: i64) {
        assert_eq!(LayerId::try_from(number), Err(UnknownLayerId(number)));
    }

    #[test]
    fn dependency_graph_is_monotonic() {
        for id in LayerId::ALL {
            for prerequisite in id.prerequisites() {
                assert!(prerequisite < &id, "{prerequisite} must precede {id}");
            }
        }
    }

    #[test]
    fn serialises_as_a_number() {
        let json = serde_json::to_string(&LayerId::Framework).expect("serialise");
        assert_eq!(json, "5");
        let parsed: LayerId = serde_json::from_str("2").expect("parse");
        assert_eq!(parsed, LayerId::Patterns);
        assert!(serde_json::from_str::<LayerId>("9").is_err());
    }

    #[test]
    fn zero_change_success_is_still_success() {
        let result = TransformResult::unchanged("let a = 1;");
        assert!(result.success);
        assert!(!result.has_changes());

        let failed = TransformResult::failed("let a = 1;", "boom");
        assert!(!failed.success);
        assert_eq!(failed.code, "let a = 1;");
    }

    #[test]
    fn status_serialises_with_a_kind_tag() {
        let json = serde_json::to_string(&LayerStatus::Reverted {
            reason: "unbalanced".to_owned(),
        })
        .expect("serialise");
        assert_eq!(json, r#"{"kind":"reverted","reason":"unbalanced"}"#);
    }
}
