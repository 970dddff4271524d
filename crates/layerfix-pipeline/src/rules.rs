//! Rules mined from earlier runs and the store that persists them.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::atomic::write_atomic;
use crate::journal::ExecutionState;
use crate::layer::LayerId;
use crate::runner::ExecutionMode;

/// Rules below this confidence are kept but never applied.
pub const MIN_APPLY_CONFIDENCE: f64 = 0.5;

/// A literal rewrite learned from repeated layer changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveRule {
    /// The exact text to find.
    pub pattern: String,
    /// The text to put in its place.
    pub replacement: String,
    /// The layer whose changes taught this rule.
    pub source_layer: LayerId,
    /// How many committed changes matched.
    pub occurrences: u32,
    /// `occurrences / (occurrences + 1)`.
    pub confidence: f64,
}

impl AdaptiveRule {
    /// Whether the adaptive layer should apply this rule.
    #[must_use]
    pub fn is_confident(&self) -> bool {
        self.confidence >= MIN_APPLY_CONFIDENCE
    }
}

/// The learned rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Rules ordered by pattern.
    pub rules: Vec<AdaptiveRule>,
}

type RuleKey = (String, String, LayerId);

impl RuleSet {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true when there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules the adaptive layer may apply.
    pub fn confident(&self) -> impl Iterator<Item = &AdaptiveRule> {
        self.rules.iter().filter(|rule| rule.is_confident())
    }

    /// Counts `(before, after, layer)` triples in applied changes of `states`
    /// and merges those seen at least `min_frequency` times.
    ///
    /// Only non-dry-run fix executions count. A rule already present keeps
    /// the larger occurrence count. Returns the number of rules added or
    /// strengthened.
    pub fn learn_from(&mut self, states: &[ExecutionState], min_frequency: u32) -> usize {
        let mut counts: BTreeMap<RuleKey, u32> = BTreeMap::new();
        for state in states {
            if state.mode != ExecutionMode::Fix || state.dry_run {
                continue;
            }
            for layer in &state.layers_run {
                if layer.status != "applied" || layer.id == LayerId::Adaptive {
                    continue;
                }
                for change in &layer.changes {
                    let (Some(before), Some(after)) = (&change.before, &change.after) else {
                        continue;
                    };
                    if !is_learnable(before, after) {
                        continue;
                    }
                    let count = counts
                        .entry((before.clone(), after.clone(), layer.id))
                        .or_default();
                    *count = count.saturating_add(1);
                }
            }
        }

        let mut merged: BTreeMap<RuleKey, AdaptiveRule> = self
            .rules
            .drain(..)
            .map(|rule| {
                (
                    (rule.pattern.clone(), rule.replacement.clone(), rule.source_layer),
                    rule,
                )
            })
            .collect();

        let mut learned = Vec::new();
        for ((pattern, replacement, source_layer), occurrences) in counts {
            if occurrences < min_frequency.max(1) {
                continue;
            }
            let key = (pattern.clone(), replacement.clone(), source_layer);
            let existing = merged.get(&key).map_or(0, |rule| rule.occurrences);
            if occurrences <= existing {
                continue;
            }
            learned.push(key.clone());
            merged.insert(
                key,
                AdaptiveRule {
                    pattern,
                    replacement,
                    source_layer,
                    occurrences,
                    confidence: confidence(occurrences),
                },
            );
        }

        drop_chained(&mut merged);
        let learned = learned.iter().filter(|key| merged.contains_key(*key)).count();
        self.rules = merged.into_values().collect();
        learned
    }
}

/// Removes rules whose replacement contains another rule's pattern.
///
/// Such rules feed each other, so the result would depend on the order the
/// adaptive layer applies them in.
fn drop_chained(rules: &mut BTreeMap<RuleKey, AdaptiveRule>) {
    let patterns: Vec<String> = rules.values().map(|rule| rule.pattern.clone()).collect();
    rules.retain(|_, rule| {
        let chained = patterns
            .iter()
            .any(|pattern| *pattern != rule.pattern && rule.replacement.contains(pattern.as_str()));
        if chained {
            tracing::debug!(
                target: "layerfix::rules",
                event = "rule_dropped",
                pattern = %rule.pattern,
                replacement = %rule.replacement,
                "replacement feeds another rule"
            );
        }
        !chained
    });
}

fn is_learnable(before: &str, after: &str) -> bool {
    !before.trim().is_empty() && !before.contains('\n') && !after.contains(before)
}

fn confidence(occurrences: u32) -> f64 {
    let occurrences = f64::from(occurrences);
    occurrences / (occurrences + 1.0)
}

/// Errors raised by [`RuleStore`].
#[derive(Debug, Error)]
pub enum RuleStoreError {
    /// The rule file could not be read or written.
    #[error("rule store I/O failed for {path}: {source}")]
    Io {
        /// The rule file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
    /// The rule file is not valid JSON.
    #[error("rule file {path} is invalid: {source}")]
    Format {
        /// The rule file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Loads and saves a [`RuleSet`] as a JSON file.
#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    /// Creates a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the rule set. A missing file is an empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<RuleSet, RuleStoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(RuleSet::new()),
            Err(source) => {
                return Err(RuleStoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| RuleStoreError::Format {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the rule file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, rules: &RuleSet) -> Result<(), RuleStoreError> {
        let json = serde_json::to_vec_pretty(rules).map_err(|source| RuleStoreError::Format {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| RuleStoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        write_atomic(&self.path, &json).map_err(|source| RuleStoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(
            target: "layerfix::rules",
            path = %self.path.display(),
            rules = rules.len(),
            "rule set saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::LayerSummary;
    use layerfix_syntax::Change;
    use rstest::rstest;
    use tempfile::TempDir;

    fn state(mode: ExecutionMode, dry_run: bool, layer: LayerId, status: &str, changes: Vec<Change>) -> ExecutionState {
        ExecutionState {
            timestamp: 0,
            file: PathBuf::from("a.ts"),
            mode,
            dry_run,
            layers_run: vec![LayerSummary {
                id: layer,
                name: layer.name().to_owned(),
                status: status.to_owned(),
                success: true,
                changes,
                warnings: Vec::new(),
                attempts: 1,
            }],
            backups: Vec::new(),
            total_changes: 0,
            execution_time_ms: 0,
            cancelled: false,
            fatal_error: None,
        }
    }

    fn change(before: &str, after: &str) -> Change {
        Change::new("entity", "decoded").with_snippets(before, after)
    }

    #[test]
    fn learns_repeated_changes() {
        let states = vec![
            state(ExecutionMode::Fix, false, LayerId::Patterns, "applied", vec![change("&quot;", "\"")]),
            state(ExecutionMode::Fix, false, LayerId::Patterns, "applied", vec![change("&quot;", "\"")]),
            state(ExecutionMode::Fix, false, LayerId::Patterns, "applied", vec![change("&amp;", "&")]),
        ];
        let mut rules = RuleSet::new();
        assert_eq!(rules.learn_from(&states, 2), 1);

        let [rule] = rules.rules.as_slice() else {
            panic!("expected one rule, got {:?}", rules.rules);
        };
        assert_eq!(rule.pattern, "&quot;");
        assert_eq!(rule.occurrences, 2);
        assert!((rule.confidence - 2.0 / 3.0).abs() < f64::EPSILON);
        assert!(rule.is_confident());
    }

    #[rstest]
    #[case(ExecutionMode::Analyze, false, LayerId::Patterns, "applied")]
    #[case(ExecutionMode::Fix, true, LayerId::Patterns, "applied")]
    #[case(ExecutionMode::Fix, false, LayerId::Patterns, "reverted")]
    #[case(ExecutionMode::Fix, false, LayerId::Adaptive, "applied")]
    fn ignores_changes_that_should_not_teach(
        #[case] mode: ExecutionMode,
        #[case] dry_run: bool,
        #[case] layer: LayerId,
        #[case] status: &str,
    ) {
        let states = vec![state(mode, dry_run, layer, status, vec![change("a", "b")]); 3];
        let mut rules = RuleSet::new();
        assert_eq!(rules.learn_from(&states, 1), 0);
        assert!(rules.is_empty());
    }

    #[rstest]
    #[case("", "x")]
    #[case("a\nb", "c")]
    #[case("map(", "map((")]
    fn ignores_unlearnable_snippets(#[case] before: &str, #[case] after: &str) {
        assert!(!is_learnable(before, after));
    }

    #[test]
    fn merge_keeps_larger_count() {
        let mut rules = RuleSet {
            rules: vec![AdaptiveRule {
                pattern: "x".to_owned(),
                replacement: "y".to_owned(),
                source_layer: LayerId::Patterns,
                occurrences: 5,
                confidence: confidence(5),
            }],
        };
        let states = vec![state(ExecutionMode::Fix, false, LayerId::Patterns, "applied", vec![change("x", "y")]); 2];
        assert_eq!(rules.learn_from(&states, 1), 0);
        assert_eq!(rules.rules.first().map(|r| r.occurrences), Some(5));
    }

    #[test]
    fn store_round_trips_and_tolerates_missing_file() {
        let dir = TempDir::new().expect("temp dir");
        let store = RuleStore::new(dir.path().join("state").join("rules.json"));
        assert!(store.load().expect("load").is_empty());

        let mut rules = RuleSet::new();
        let states = vec![state(ExecutionMode::Fix, false, LayerId::Patterns, "applied", vec![change("x", "y")]); 2];
        rules.learn_from(&states, 2);
        store.save(&rules).expect("save");
        assert_eq!(store.load().expect("reload"), rules);
    }

    #[test]
    fn corrupt_store_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("rules.json");
        fs::write(&path, "[").expect("seed");
        assert!(matches!(
            RuleStore::new(path).load(),
            Err(RuleStoreError::Format { .. })
        ));
    }

    #[test]
    fn drops_rules_that_feed_each_other() {
        let states = vec![
            state(ExecutionMode::Fix, false, LayerId::Patterns, "applied", vec![change("foo", "bar"), change("bar", "foo")]),
            state(ExecutionMode::Fix, false, LayerId::Patterns, "applied", vec![change("foo", "bar"), change("bar", "foo")]),
            state(ExecutionMode::Fix, false, LayerId::Patterns, "applied", vec![change("&quot;", "\"")]),
            state(ExecutionMode::Fix, false, LayerId::Patterns, "applied", vec![change("&quot;", "\"")]),
        ];
        let mut rules = RuleSet::new();

        assert_eq!(rules.learn_from(&states, 2), 1);
        let patterns: Vec<&str> = rules.rules.iter().map(|rule| rule.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["&quot;"]);
    }
}
