//! Level-index codec.
//!
//! Pure functions deriving the specificity index and the fully-qualified
//! name of a value from an ambiance's level chain.

use crate::types::{Ambiance, Level};

/// Group name that scopes a write to the whole plan execution.
pub const GLOBAL_GROUP_SCOPE: &str = "__GLOBAL_GROUP_SCOPE__";

const IDX_SEPARATOR: char = '|';
const IDX_ESCAPE: char = '\\';

fn push_escaped(idx: &mut String, runtime_id: &str) {
    for c in runtime_id.chars() {
        if c == IDX_SEPARATOR || c == IDX_ESCAPE {
            idx.push(IDX_ESCAPE);
        }
        idx.push(c);
    }
}

/// Specificity index of a write performed at `levels`.
///
/// Runtime ids joined with `|`, with `|` and `\` inside an id escaped by a
/// leading `\`, so distinct chains never share an index. The index of a
/// chain is a prefix of the index of any extension of it, so for two
/// prefixes of the same chain the deeper one always compares greater and
/// "most specific" is the max.
pub fn level_runtime_id_idx(levels: &[Level]) -> String {
    let mut idx = String::new();
    for (i, level) in levels.iter().enumerate() {
        if i > 0 {
            idx.push(IDX_SEPARATOR);
        }
        push_escaped(&mut idx, &level.runtime_id);
    }
    idx
}

/// Every index visible from `ambiance`: the empty (plan-wide) index plus
/// the index of each prefix of the level chain, shallowest first.
pub fn level_runtime_id_indices(ambiance: &Ambiance) -> Vec<String> {
    let mut indices = Vec::with_capacity(ambiance.levels.len() + 1);
    indices.push(String::new());
    for depth in 1..=ambiance.levels.len() {
        indices.push(level_runtime_id_idx(&ambiance.levels[..depth]));
    }
    indices
}

/// Dotted structural path of `levels`, skipping wrapper levels.
pub fn fqn_for_levels(levels: &[Level]) -> String {
    levels
        .iter()
        .filter(|l| !l.skip_expression_chain)
        .map(Level::fqn_segment)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Fully-qualified name of `name` as seen from `ambiance`.
///
/// Built from setup-time identifiers only, so retries of a node map to the
/// same name while distinct loop iterations do not.
pub fn fully_qualified_name(ambiance: &Ambiance, name: &str) -> String {
    let prefix = fqn_for_levels(&ambiance.levels);
    if prefix.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        prefix
    } else {
        format!("{prefix}.{name}")
    }
}
