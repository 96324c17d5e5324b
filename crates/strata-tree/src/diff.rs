//! Forward deltas and comparison trees between two snapshots.
//!
//! Both walks visit the union of the two trees' children in name order and
//! skip any subtree whose node stacks are made of the very same nodes, so
//! comparing a snapshot with a descendant only touches what the layers in
//! between actually changed.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use strata_types::{CancellationToken, ChangeKind, Comparator, Depth, NodeComparison, TreePath};

use crate::error::{TreeError, TreeResult};
use crate::node::{assemble, same_stack, stack_child, stack_child_names, stack_data, DataChange, DataNode};
use crate::tree::LayeredTree;

/// Where a delta or comparison applies: the subtree at `path`, at most
/// `depth` levels deep, optionally cancellable.
#[derive(Clone, Debug, Default)]
pub struct DiffScope {
    path: TreePath,
    depth: Depth,
    cancel: Option<CancellationToken>,
}

impl DiffScope {
    /// The whole tree, unbounded.
    pub fn new() -> Self {
        Self::default()
    }

    /// The subtree rooted at `path`.
    pub fn at(path: TreePath) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn path(&self) -> &TreePath {
        &self.path
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }
}

fn check_cancelled(token: Option<&CancellationToken>) -> TreeResult<()> {
    match token {
        Some(token) if token.is_cancelled() => Err(TreeError::Cancelled),
        _ => Ok(()),
    }
}

/// Names present under either stack, sorted.
fn child_union<'a, T>(old: &[&'a DataNode<T>], new: &[&'a DataNode<T>]) -> BTreeSet<&'a str> {
    let mut names = stack_child_names(old);
    names.extend(stack_child_names(new));
    names
}

impl<T: Clone> LayeredTree<T> {
    // ---------------------------------------------------------------
    // Forward deltas
    // ---------------------------------------------------------------

    /// A frozen delta on top of `self` that turns it into `other`.
    pub fn forward_delta_with(&self, other: &LayeredTree<T>, cmp: &dyn Comparator<T>) -> TreeResult<LayeredTree<T>> {
        self.forward_delta_in(other, cmp, &DiffScope::new())
    }

    /// Like [`forward_delta_with`](Self::forward_delta_with), restricted to
    /// `scope`. Outside the scope the result matches `self`.
    ///
    /// `self` must be frozen since it becomes the parent of the result.
    pub fn forward_delta_in(
        &self,
        other: &LayeredTree<T>,
        cmp: &dyn Comparator<T>,
        scope: &DiffScope,
    ) -> TreeResult<LayeredTree<T>> {
        if !self.is_immutable() {
            return Err(TreeError::NotFrozen);
        }
        let mut root = match self.forward_overlay(other, cmp, scope)? {
            Some(node) if !node.is_empty_delta() => node,
            _ => DataNode::empty_delta(),
        };
        if !root.is_empty_delta() {
            for name in scope.path().segments().iter().rev() {
                let mut children = BTreeMap::new();
                children.insert(name.clone(), root);
                root = DataNode::Delta {
                    data: DataChange::Keep,
                    children,
                };
            }
        }
        debug!(scope = %scope.path(), nodes = root.node_count(), "computed forward delta");
        Ok(LayeredTree::from_layer(root, Some(self.clone()), true))
    }

    /// The overlay node for `scope.path()` that turns `self` into `other`,
    /// without building a tree around it.
    ///
    /// Returns `None` when the path exists in neither tree, a complete node
    /// when it was added, [`DataNode::Deleted`] when it was removed, and a
    /// delta node otherwise.
    pub fn forward_overlay(
        &self,
        other: &LayeredTree<T>,
        cmp: &dyn Comparator<T>,
        scope: &DiffScope,
    ) -> TreeResult<Option<DataNode<T>>> {
        let path = scope.path();
        match (self.node_stack(path), other.node_stack(path)) {
            (None, None) => Ok(None),
            (None, Some(new)) => {
                if let Some(parent) = path.parent() {
                    if !self.includes(&parent) {
                        return Err(TreeError::NotFound(parent));
                    }
                }
                Ok(Some(assemble(&new)))
            }
            (Some(_), None) => Ok(Some(DataNode::Deleted)),
            (Some(old), Some(new)) => {
                forward_node(&old, &new, cmp, scope.depth(), scope.cancel.as_ref()).map(Some)
            }
        }
    }

    /// Apply `delta`'s overlay on top of `self`. The result is frozen.
    pub fn assemble_with_forward_delta(&self, delta: &LayeredTree<T>) -> TreeResult<LayeredTree<T>> {
        if !self.is_immutable() {
            return Err(TreeError::NotFrozen);
        }
        Ok(LayeredTree::from_layer(
            delta.overlay().clone(),
            Some(self.clone()),
            true,
        ))
    }

    /// An equivalent frozen delta on the same parent with every no-op entry
    /// dropped. A complete tree is returned as is.
    pub fn simplify(&self, cmp: &dyn Comparator<T>) -> TreeResult<LayeredTree<T>> {
        match self.parent() {
            Some(parent) => parent.forward_delta_with(self, cmp),
            None => Ok(self.clone()),
        }
    }

    /// Returns `true` if both trees hold the same paths with equal data.
    pub fn content_eq(&self, other: &LayeredTree<T>, cmp: &dyn Comparator<T>) -> bool {
        matches!(
            self.forward_overlay(other, cmp, &DiffScope::new()),
            Ok(Some(node)) if node.is_empty_delta()
        )
    }

    // ---------------------------------------------------------------
    // Comparison trees
    // ---------------------------------------------------------------

    /// Compare `self` (old) with `other` (new) over the whole tree.
    pub fn compare_with(
        &self,
        other: &LayeredTree<T>,
        cmp: &dyn Comparator<T>,
    ) -> TreeResult<LayeredTree<NodeComparison<T>>> {
        self.compare_in(other, cmp, &DiffScope::new())
    }

    /// Compare `self` (old) with `other` (new) within `scope`.
    ///
    /// The root of the result is the node at `scope.path()`. Added and
    /// removed subtrees are reported node by node; subtrees that did not
    /// change are left out. The result is a frozen complete tree.
    pub fn compare_in(
        &self,
        other: &LayeredTree<T>,
        cmp: &dyn Comparator<T>,
        scope: &DiffScope,
    ) -> TreeResult<LayeredTree<NodeComparison<T>>> {
        let path = scope.path();
        if self.ptr_eq(other) {
            let data = self.get_data(path)?.cloned();
            let leaf = DataNode::leaf(Some(NodeComparison::new(
                data.clone(),
                data,
                ChangeKind::NoChange,
            )));
            return Ok(LayeredTree::from_layer(leaf, None, true));
        }
        let root = match (self.node_stack(path), other.node_stack(path)) {
            (None, None) => return Err(TreeError::NotFound(path.clone())),
            (Some(old), None) => tagged_subtree(&old, scope.depth(), ChangeKind::Removed),
            (None, Some(new)) => tagged_subtree(&new, scope.depth(), ChangeKind::Added),
            (Some(old), Some(new)) => {
                match compare_node(&old, &new, cmp, scope.depth(), scope.cancel.as_ref())? {
                    Some(node) => node,
                    None => DataNode::leaf(Some(NodeComparison::new(
                        stack_data(&old).cloned(),
                        stack_data(&new).cloned(),
                        ChangeKind::NoChange,
                    ))),
                }
            }
        };
        Ok(LayeredTree::from_layer(root, None, true))
    }
}

impl<T: Clone> LayeredTree<NodeComparison<T>> {
    /// The comparison tree of the swapped pair: old and new trade places,
    /// `Added` and `Removed` swap, and nodes present on both sides are
    /// re-evaluated with `cmp`.
    pub fn as_reverse_comparison_tree(&self, cmp: &dyn Comparator<T>) -> LayeredTree<NodeComparison<T>> {
        let complete = self.make_complete();
        let root = complete
            .overlay()
            .map_data(&mut |node| node.map(|n| n.reversed(cmp)));
        LayeredTree::from_layer(root, None, true)
    }
}

fn forward_node<T: Clone>(
    old: &[&DataNode<T>],
    new: &[&DataNode<T>],
    cmp: &dyn Comparator<T>,
    depth: Depth,
    cancel: Option<&CancellationToken>,
) -> TreeResult<DataNode<T>> {
    if same_stack(old, new) {
        return Ok(DataNode::empty_delta());
    }
    let (old_data, new_data) = (stack_data(old), stack_data(new));
    let data = if cmp.is_equal(old_data, new_data) {
        DataChange::Keep
    } else {
        DataChange::Set(new_data.cloned())
    };

    let mut children = BTreeMap::new();
    if let Some(child_depth) = depth.child() {
        for name in child_union(old, new) {
            check_cancelled(cancel)?;
            let child = match (stack_child(old, name), stack_child(new, name)) {
                (Some(o), Some(n)) => forward_node(&o, &n, cmp, child_depth, None)?,
                (Some(_), None) => DataNode::Deleted,
                (None, Some(n)) => assemble(&n),
                (None, None) => continue,
            };
            if !child.is_empty_delta() {
                children.insert(name.to_string(), child);
            }
        }
    }
    Ok(DataNode::Delta { data, children })
}

/// Compare two stacks. `None` means nothing in the subtree changed.
fn compare_node<T: Clone>(
    old: &[&DataNode<T>],
    new: &[&DataNode<T>],
    cmp: &dyn Comparator<T>,
    depth: Depth,
    cancel: Option<&CancellationToken>,
) -> TreeResult<Option<DataNode<NodeComparison<T>>>> {
    if same_stack(old, new) {
        return Ok(None);
    }
    let (old_data, new_data) = (stack_data(old), stack_data(new));
    let kind = if cmp.is_equal(old_data, new_data) {
        ChangeKind::NoChange
    } else {
        ChangeKind::Changed
    };

    let mut children = BTreeMap::new();
    if let Some(child_depth) = depth.child() {
        for name in child_union(old, new) {
            check_cancelled(cancel)?;
            let child = match (stack_child(old, name), stack_child(new, name)) {
                (Some(o), Some(n)) => compare_node(&o, &n, cmp, child_depth, None)?,
                (Some(o), None) => Some(tagged_subtree(&o, child_depth, ChangeKind::Removed)),
                (None, Some(n)) => Some(tagged_subtree(&n, child_depth, ChangeKind::Added)),
                (None, None) => None,
            };
            if let Some(child) = child {
                children.insert(name.to_string(), child);
            }
        }
    }

    if kind == ChangeKind::NoChange && children.is_empty() {
        return Ok(None);
    }
    Ok(Some(DataNode::Complete {
        data: Some(NodeComparison::new(old_data.cloned(), new_data.cloned(), kind)),
        children,
    }))
}

/// A whole subtree that exists on one side only.
fn tagged_subtree<T: Clone>(stack: &[&DataNode<T>], depth: Depth, kind: ChangeKind) -> DataNode<NodeComparison<T>> {
    let data = stack_data(stack).cloned();
    let comparison = match kind {
        ChangeKind::Removed => NodeComparison::new(data, None, kind),
        _ => NodeComparison::new(None, data, kind),
    };
    let mut children = BTreeMap::new();
    if let Some(child_depth) = depth.child() {
        for name in stack_child_names(stack) {
            if let Some(child) = stack_child(stack, name) {
                children.insert(name.to_string(), tagged_subtree(&child, child_depth, kind));
            }
        }
    }
    DataNode::Complete {
        data: Some(comparison),
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use strata_types::EqualityComparator;

    use crate::testing::{build_chain, flatten, op_strategy, p, sample_tree};

    fn frozen_sample() -> LayeredTree<String> {
        let mut tree = sample_tree();
        tree.freeze().unwrap();
        tree
    }

    fn kind_at(tree: &LayeredTree<NodeComparison<String>>, path: &str) -> ChangeKind {
        tree.get_data(&p(path)).unwrap().unwrap().kind()
    }

    #[test]
    fn forward_delta_reproduces_target() {
        let base = frozen_sample();
        let mut target = base.new_empty_delta().unwrap();
        target.set_data(&p("/leftOfRoot/two"), Some("TWO".into())).unwrap();
        target.delete_child(&p("/leftOfRoot"), "three").unwrap();
        target.create_child(&p("/rightOfRoot"), "extra", Some("x".into())).unwrap();

        let delta = base.forward_delta_with(&target, &EqualityComparator).unwrap();
        assert!(delta.is_immutable());
        assert!(delta.parent().unwrap().ptr_eq(&base));
        let rebuilt = base.assemble_with_forward_delta(&delta).unwrap();
        assert_eq!(flatten(&rebuilt), flatten(&target));
        assert!(rebuilt.content_eq(&target, &EqualityComparator));
    }

    #[test]
    fn forward_delta_is_minimal() {
        let base = frozen_sample();
        let mut target = base.new_empty_delta().unwrap();
        target.set_data(&p("/leftOfRoot/one"), Some("one".into())).unwrap();
        let delta = base.forward_delta_with(&target, &EqualityComparator).unwrap();
        assert!(delta.is_empty_delta());

        target.set_data(&p("/rightOfRoot"), Some("moved".into())).unwrap();
        let delta = base.forward_delta_with(&target, &EqualityComparator).unwrap();
        assert_eq!(delta.overlay().node_count(), 2);
        assert!(delta.overlay().child("leftOfRoot").is_none());
    }

    #[test]
    fn forward_delta_requires_frozen_base() {
        let base = sample_tree();
        let other = sample_tree();
        assert_eq!(
            base.forward_delta_with(&other, &EqualityComparator).unwrap_err(),
            TreeError::NotFrozen
        );

        let mut frozen = sample_tree();
        frozen.freeze().unwrap();
        let delta = frozen.forward_delta_with(&frozen, &EqualityComparator).unwrap();
        assert_eq!(base.assemble_with_forward_delta(&delta).unwrap_err(), TreeError::NotFrozen);
        assert!(frozen.assemble_with_forward_delta(&delta).is_ok());
    }

    #[test]
    fn scoped_forward_delta_ignores_outside_changes() {
        let base = frozen_sample();
        let mut target = base.new_empty_delta().unwrap();
        target.set_data(&p("/leftOfRoot/one"), Some("ONE".into())).unwrap();
        target.set_data(&p("/rightOfRoot"), Some("RIGHT".into())).unwrap();

        let scope = DiffScope::at(p("/leftOfRoot"));
        let delta = base.forward_delta_in(&target, &EqualityComparator, &scope).unwrap();
        let rebuilt = base.assemble_with_forward_delta(&delta).unwrap();
        assert_eq!(
            rebuilt.get_data(&p("/leftOfRoot/one")).unwrap().map(String::as_str),
            Some("ONE")
        );
        assert_eq!(
            rebuilt.get_data(&p("/rightOfRoot")).unwrap().map(String::as_str),
            Some("right")
        );
    }

    #[test]
    fn forward_overlay_for_added_and_removed_paths() {
        let base = frozen_sample();
        let mut target = base.new_empty_delta().unwrap();
        target.delete_child(&TreePath::root(), "leftOfRoot").unwrap();
        target.create_child(&p("/rightOfRoot"), "fresh", None).unwrap();

        let removed = base
            .forward_overlay(&target, &EqualityComparator, &DiffScope::at(p("/leftOfRoot")))
            .unwrap();
        assert_eq!(removed, Some(DataNode::Deleted));

        let added = base
            .forward_overlay(&target, &EqualityComparator, &DiffScope::at(p("/rightOfRoot/fresh")))
            .unwrap();
        assert_eq!(added, Some(DataNode::leaf(None)));

        let neither = base
            .forward_overlay(&target, &EqualityComparator, &DiffScope::at(p("/nowhere")))
            .unwrap();
        assert!(neither.is_none());
    }

    #[test]
    fn compare_reports_added_removed_and_changed() {
        let base = frozen_sample();
        let mut target = base.new_empty_delta().unwrap();
        target.set_data(&p("/leftOfRoot/two"), Some("TWO".into())).unwrap();
        target.delete_child(&TreePath::root(), "rightOfRoot").unwrap();
        target.create_child(&p("/leftOfRoot"), "four", Some("4".into())).unwrap();
        target.create_child(&p("/leftOfRoot/four"), "five", None).unwrap();
        target.freeze().unwrap();

        let cmp = base.compare_with(&target, &EqualityComparator).unwrap();
        assert!(cmp.is_immutable());
        assert!(cmp.is_complete());
        assert_eq!(kind_at(&cmp, "/"), ChangeKind::NoChange);
        assert_eq!(kind_at(&cmp, "/leftOfRoot"), ChangeKind::NoChange);
        assert_eq!(kind_at(&cmp, "/leftOfRoot/two"), ChangeKind::Changed);
        assert_eq!(kind_at(&cmp, "/leftOfRoot/four"), ChangeKind::Added);
        assert_eq!(kind_at(&cmp, "/leftOfRoot/four/five"), ChangeKind::Added);
        assert_eq!(kind_at(&cmp, "/rightOfRoot"), ChangeKind::Removed);
        assert_eq!(kind_at(&cmp, "/rightOfRoot/rightOfRight"), ChangeKind::Removed);
        // Unchanged siblings are pruned.
        assert!(!cmp.includes(&p("/leftOfRoot/one")));

        let two = cmp.get_data(&p("/leftOfRoot/two")).unwrap().unwrap();
        assert_eq!(two.old_data().map(String::as_str), Some("two"));
        assert_eq!(two.new_data().map(String::as_str), Some("TWO"));
    }

    #[test]
    fn compare_with_itself_is_a_single_unchanged_node() {
        let base = frozen_sample();
        let cmp = base
            .compare_in(&base, &EqualityComparator, &DiffScope::at(p("/leftOfRoot")))
            .unwrap();
        assert_eq!(cmp.child_count(&TreePath::root()).unwrap(), 0);
        let root = cmp.root_data().unwrap();
        assert_eq!(root.kind(), ChangeKind::NoChange);
        assert_eq!(root.old_data(), root.new_data());
        assert_eq!(root.old_data().map(String::as_str), Some("left"));
        assert!(cmp.parent().is_none());
        assert!(cmp.is_immutable());
    }

    #[test]
    fn scoped_comparison_roots_at_the_scope() {
        let base = frozen_sample();
        let mut target = base.new_empty_delta().unwrap();
        target.set_data(&p("/leftOfRoot/one"), Some("ONE".into())).unwrap();
        target.set_data(&p("/rightOfRoot"), Some("RIGHT".into())).unwrap();
        let cmp = base
            .compare_in(&target, &EqualityComparator, &DiffScope::at(p("/leftOfRoot")))
            .unwrap();
        assert_eq!(cmp.child_names(&TreePath::root()).unwrap(), vec!["one"]);
        assert_eq!(kind_at(&cmp, "/one"), ChangeKind::Changed);

        let missing = base.compare_in(&target, &EqualityComparator, &DiffScope::at(p("/nowhere")));
        assert_eq!(missing.unwrap_err(), TreeError::NotFound(p("/nowhere")));
    }

    #[test]
    fn depth_bound_limits_comparison() {
        let base = frozen_sample();
        let mut target = base.new_empty_delta().unwrap();
        target.set_data(&p("/leftOfRoot/one"), Some("ONE".into())).unwrap();
        let scope = DiffScope::new().with_depth(Depth::Bounded(1));
        let cmp = base.compare_in(&target, &EqualityComparator, &scope).unwrap();
        assert_eq!(cmp.child_count(&TreePath::root()).unwrap(), 0);
    }

    #[test]
    fn cancelled_traversal_fails() {
        let base = frozen_sample();
        let mut target = base.new_empty_delta().unwrap();
        target.set_data(&p("/leftOfRoot/one"), Some("ONE".into())).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let scope = DiffScope::new().with_cancellation(token);
        assert_eq!(
            base.compare_in(&target, &EqualityComparator, &scope).unwrap_err(),
            TreeError::Cancelled
        );
        assert_eq!(
            base.forward_delta_in(&target, &EqualityComparator, &scope).unwrap_err(),
            TreeError::Cancelled
        );
    }

    #[test]
    fn custom_comparator_decides_equality() {
        let base = frozen_sample();
        let mut target = base.new_empty_delta().unwrap();
        target.set_data(&p("/leftOfRoot/one"), Some("ONE".into())).unwrap();
        let case_insensitive = |a: Option<&String>, b: Option<&String>| match (a, b) {
            (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => ChangeKind::NoChange,
            (None, None) => ChangeKind::NoChange,
            _ => ChangeKind::Changed,
        };
        let delta = base.forward_delta_with(&target, &case_insensitive).unwrap();
        assert!(delta.is_empty_delta());
        let cmp = base.compare_with(&target, &case_insensitive).unwrap();
        assert_eq!(cmp.child_count(&TreePath::root()).unwrap(), 0);
    }

    #[test]
    fn simplify_drops_no_op_entries() {
        let base = frozen_sample();
        let mut delta = base.new_empty_delta().unwrap();
        delta.set_data(&p("/leftOfRoot/one"), Some("one".into())).unwrap();
        delta.set_data(&p("/rightOfRoot"), Some("RIGHT".into())).unwrap();
        delta.freeze().unwrap();
        let simple = delta.simplify(&EqualityComparator).unwrap();
        assert!(simple.parent().unwrap().ptr_eq(&base));
        assert_eq!(flatten(&simple), flatten(&delta));
        assert!(simple.overlay().child("leftOfRoot").is_none());
    }

    proptest! {
        #[test]
        fn delta_inverse_law(
            a in proptest::collection::vec(proptest::collection::vec(op_strategy(), 0..6), 0..3),
            b in proptest::collection::vec(op_strategy(), 0..8),
        ) {
            let chain = build_chain(&a);
            let older = chain.first().unwrap();
            let newer = chain.last().unwrap();
            let mut other = newer.new_empty_delta().unwrap();
            for op in &b {
                crate::testing::apply(&mut other, op);
            }

            let forward = older.forward_delta_with(&other, &EqualityComparator).unwrap();
            let rebuilt = older.assemble_with_forward_delta(&forward).unwrap();
            prop_assert_eq!(flatten(&rebuilt), flatten(&other));

            let backward = newer.forward_delta_with(older, &EqualityComparator).unwrap();
            let rebuilt = newer.assemble_with_forward_delta(&backward).unwrap();
            prop_assert_eq!(flatten(&rebuilt), flatten(older));
        }

        #[test]
        fn reverse_comparison_is_an_involution(
            a in proptest::collection::vec(op_strategy(), 0..8),
            b in proptest::collection::vec(op_strategy(), 0..8),
        ) {
            let left = build_chain(&[a]).pop().unwrap();
            let right = build_chain(&[b]).pop().unwrap();
            let forward = left.compare_with(&right, &EqualityComparator).unwrap();
            let backward = right.compare_with(&left, &EqualityComparator).unwrap();
            let reversed = forward.as_reverse_comparison_tree(&EqualityComparator);
            prop_assert_eq!(flatten(&reversed), flatten(&backward));
            let twice = reversed.as_reverse_comparison_tree(&EqualityComparator);
            prop_assert_eq!(flatten(&twice), flatten(&forward));
        }
    }
}
