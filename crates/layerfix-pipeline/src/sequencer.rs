//! Turns a requested set of layer numbers into an execution order.

use std::collections::BTreeSet;

use crate::layer::LayerId;

/// The ordered layers to run and the requested numbers that were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Layers to run, ascending.
    pub order: Vec<LayerId>,
    /// Requested numbers that name no layer, in request order.
    pub rejected: Vec<i64>,
}

/// Resolves `requested` into an ascending layer list.
///
/// Unknown numbers are dropped with a warning. Without `no_deps` the
/// transitive prerequisites of every requested layer are added. An empty
/// request selects every layer.
#[must_use]
pub fn resolve(requested: &[i64], no_deps: bool) -> Resolution {
    if requested.is_empty() {
        return Resolution {
            order: LayerId::ALL.to_vec(),
            rejected: Vec::new(),
        };
    }

    let mut rejected = Vec::new();
    let mut selected = BTreeSet::new();
    for &number in requested {
        match LayerId::try_from(number) {
            Ok(id) if no_deps => {
                selected.insert(id);
            }
            Ok(id) => collect_closure(id, &mut selected),
            Err(error) => {
                tracing::warn!(
                    target: "layerfix::pipeline",
                    event = "layer_rejected",
                    requested = number,
                    %error,
                    "ignoring unknown layer"
                );
                rejected.push(number);
            }
        }
    }

    Resolution {
        order: selected.into_iter().collect(),
        rejected,
    }
}

/// Adds `id` and everything it transitively depends on.
fn collect_closure(id: LayerId, into: &mut BTreeSet<LayerId>) {
    if !into.insert(id) {
        return;
    }
    for &prerequisite in id.prerequisites() {
        collect_closure(prerequisite, into);
    }
}
