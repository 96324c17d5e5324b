//! Delta chain management: ordering snapshots of one lineage, merging a
//! chain of snapshots into a subtree, and rerooting a chain.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use strata_types::{ChangeKind, TreePath};

use crate::diff::DiffScope;
use crate::error::{TreeError, TreeResult};
use crate::node::{assemble, stack_data, DataChange, DataNode};
use crate::tree::LayeredTree;

/// Index of the tree closest to the complete end of its chain.
///
/// Duplicates and gaps are fine; with duplicates the first occurrence wins.
/// Returns `None` for an empty slice.
pub fn find_oldest<T>(trees: &[LayeredTree<T>]) -> Option<usize> {
    trees
        .iter()
        .enumerate()
        .min_by_key(|(_, tree)| tree.chain_len())
        .map(|(index, _)| index)
}

/// Sort snapshots of one lineage oldest first. Duplicates stay adjacent.
///
/// Returns `None` if any tree is still mutable or two distinct trees are not
/// ancestor and descendant of each other.
pub fn sort_trees<T>(trees: &[LayeredTree<T>]) -> Option<Vec<LayeredTree<T>>> {
    if let Some(index) = trees.iter().position(|tree| !tree.is_immutable()) {
        warn!(index, "cannot order a chain containing a mutable tree");
        return None;
    }
    let mut sorted = trees.to_vec();
    sorted.sort_by_cached_key(|tree| tree.chain_len());
    for pair in sorted.windows(2) {
        let (older, newer) = (&pair[0], &pair[1]);
        if !older.ptr_eq(newer) && !newer.descends_from(older) {
            warn!(
                older = older.chain_len(),
                newer = newer.chain_len(),
                "chain members are not in an ancestor relation"
            );
            return None;
        }
    }
    Some(sorted)
}

impl<T: Clone> LayeredTree<T> {
    /// Merge historical snapshots of the subtree at `path` into this tree.
    ///
    /// The receiver is frozen and becomes the base of one new frozen layer
    /// per distinct snapshot, oldest first. The first layer holds the oldest
    /// snapshot's subtree whole (or removes it where the snapshot has none);
    /// each later layer holds only what changed since the previous snapshot.
    /// Returns a new mutable tip on top of the merged layers.
    pub fn merge_delta_chain(&mut self, path: &TreePath, chain: &[LayeredTree<T>]) -> TreeResult<LayeredTree<T>> {
        if self.is_immutable() {
            return Err(TreeError::Immutable);
        }
        if !self.includes(path) {
            return Err(TreeError::NotFound(path.clone()));
        }
        if chain.is_empty() {
            return Err(TreeError::EmptyChain);
        }
        let sorted = sort_trees(chain).ok_or(TreeError::UnsortableChain)?;

        self.freeze()?;
        let mut tip = self.clone();
        let mut previous: Option<&LayeredTree<T>> = None;
        let mut layers = 0usize;
        for member in &sorted {
            if previous.is_some_and(|p| p.ptr_eq(member)) {
                continue;
            }
            let overlay = match previous {
                Some(prev) if prev.includes(path) => {
                    let scope = DiffScope::at(path.clone());
                    prev.forward_overlay(member, &same_payload::<T>, &scope)?
                }
                _ => member.node_stack(path).map(|stack| assemble(&stack)),
            };
            previous = Some(member);

            let mut layer = tip.new_empty_delta()?;
            match overlay {
                Some(node) if !node.is_deleted() => {
                    if !node.is_empty_delta() {
                        layer.replace_node(path, node)?;
                    }
                }
                _ => {
                    if let (Some(parent), Some(name)) = (path.parent(), path.last_segment()) {
                        if layer.includes(path) {
                            layer.delete_child(&parent, name)?;
                        }
                    }
                }
            }
            layer.freeze()?;
            tip = layer;
            layers += 1;
        }

        debug!(%path, layers, "merged delta chain");
        tip.new_empty_delta()
    }

    /// Re-express this tree's chain with this tree as the complete end.
    ///
    /// The result is aligned with [`ancestry`](Self::ancestry): element 0 is
    /// a complete tree equivalent to `self`, element `i` is equivalent to the
    /// `i`-th ancestor and is a delta on element `i - 1`. Every returned tree
    /// is frozen. Existing trees are left untouched.
    pub fn reroot(&self) -> TreeResult<Vec<LayeredTree<T>>> {
        if !self.is_immutable() {
            return Err(TreeError::NotFrozen);
        }
        if self.is_complete() {
            return Ok(vec![self.clone()]);
        }

        let old: Vec<&LayeredTree<T>> = self.ancestry().collect();
        let root = TreePath::root();
        let mut rerooted = Vec::with_capacity(old.len());
        rerooted.push(LayeredTree::from_layer(self.complete_node(&root)?, None, true));
        for i in 1..old.len() {
            let overlay = invert_overlay(old[i - 1].overlay(), &root, old[i])
                .unwrap_or_else(DataNode::empty_delta);
            let parent = rerooted[i - 1].clone();
            rerooted.push(LayeredTree::from_layer(overlay, Some(parent), true));
        }

        debug!(layers = rerooted.len(), "rerooted delta chain");
        Ok(rerooted)
    }
}

/// Snapshots of one lineage share the payloads no layer between them
/// touched, so pointer identity finds every change without a comparator.
fn same_payload<T>(old: Option<&T>, new: Option<&T>) -> ChangeKind {
    match (old, new) {
        (None, None) => ChangeKind::NoChange,
        (Some(a), Some(b)) if std::ptr::eq(a, b) => ChangeKind::NoChange,
        _ => ChangeKind::Changed,
    }
}

/// The overlay that undoes `node` (one layer's entry at `path`), expressed
/// against the state after the layer. `below` is the state before it.
///
/// Returns `None` when there is nothing to undo.
fn invert_overlay<T: Clone>(node: &DataNode<T>, path: &TreePath, below: &LayeredTree<T>) -> Option<DataNode<T>> {
    match node {
        DataNode::Complete { .. } => Some(
            below
                .node_stack(path)
                .map_or(DataNode::Deleted, |stack| assemble(&stack)),
        ),
        DataNode::Deleted => below.node_stack(path).map(|stack| assemble(&stack)),
        DataNode::Delta { data, children } => {
            let data = match data {
                DataChange::Keep => DataChange::Keep,
                DataChange::Set(_) => DataChange::Set(
                    below
                        .node_stack(path)
                        .and_then(|stack| stack_data(&stack).cloned()),
                ),
            };
            let children: BTreeMap<String, DataNode<T>> = children
                .iter()
                .filter_map(|(name, child)| {
                    invert_overlay(child, &path.append(name), below)
                        .filter(|inverse| !inverse.is_empty_delta())
                        .map(|inverse| (name.clone(), inverse))
                })
                .collect();
            Some(DataNode::Delta { data, children })
        }
    }
}
