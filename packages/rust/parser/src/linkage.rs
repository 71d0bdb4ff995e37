//! Second pass over a flattened document: resolve each node's parent.
//!
//! A node's parent is the node whose path equals its own path minus the last
//! segment. Nodes are matched by path alone, so the pass works on any
//! ordering and never depends on storage identifiers.

use std::collections::HashMap;

use regindex_shared::StructuralNode;
pub use regindex_shared::parent_path;

/// Parent index of every node, aligned with `nodes`.
///
/// Roots and nodes whose parent path is not present in the list resolve to
/// `None`.
pub fn resolve_parents(nodes: &[StructuralNode]) -> Vec<Option<usize>> {
    let by_path: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(idx, node)| (node.path.as_str(), idx))
        .collect();

    nodes
        .iter()
        .map(|node| {
            parent_path(&node.path).and_then(|parent| by_path.get(parent).copied())
        })
        .collect()
}

/// Set `parent` on every node from [`resolve_parents`].
pub fn link(mut nodes: Vec<StructuralNode>) -> Vec<StructuralNode> {
    let parents = resolve_parents(&nodes);
    for (node, parent) in nodes.iter_mut().zip(parents) {
        node.parent = parent;
    }
    nodes
}
