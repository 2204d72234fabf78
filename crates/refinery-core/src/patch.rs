//! Replacement patch builder.
//!
//! Turns a sparse `index → text` map into an ordered list of JSON-patch
//! style `replace` operations. Output is always sorted by ascending index,
//! whatever order the map iterates in.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One structured edit: `{"op": "replace", "path": "/<idx>", "value": "<text>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    pub value: String,
}

impl PatchOp {
    pub fn replace(index: usize, value: impl Into<String>) -> Self {
        Self {
            op: "replace".to_string(),
            path: format!("/{}", index),
            value: value.into(),
        }
    }
}

/// Build the ordered edit list. An empty map yields an empty list.
pub fn build_patch(replacements: &HashMap<usize, String>) -> Vec<PatchOp> {
    let mut indices: Vec<usize> = replacements.keys().copied().collect();
    indices.sort_unstable();
    indices
        .into_iter()
        .map(|i| PatchOp::replace(i, replacements[&i].clone()))
        .collect()
}

/// Apply a patch to a list of items, returning the edited copy.
///
/// Paths that don't address an existing index are skipped.
pub fn apply_patch(items: &[String], patch: &[PatchOp]) -> Vec<String> {
    let mut out = items.to_vec();
    for op in patch.iter().filter(|op| op.op == "replace") {
        let index = op
            .path
            .strip_prefix('/')
            .and_then(|s| s.parse::<usize>().ok());
        if let Some(slot) = index.and_then(|i| out.get_mut(i)) {
            *slot = op.value.clone();
        }
    }
    out
}
