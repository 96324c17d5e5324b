//! The layered tree: one copy-on-write layer of a delta chain.
//!
//! A [`LayeredTree`] is a cheap handle to a layer. A complete layer owns a
//! full tree of nodes; a delta layer owns a sparse overlay on top of a frozen
//! parent. Reads resolve a path by walking the layers from the handle down to
//! the complete end of the chain.
//!
//! # Invariants
//!
//! - Every parent of a layer is frozen; only the tip of a chain is mutable.
//! - A frozen layer never changes again, so frozen handles can be shared
//!   across threads without locking.
//! - Cloning a mutable handle forks it: the first mutation through either
//!   handle copies the layer.

use std::fmt;
use std::sync::Arc;

use strata_types::{validate_segment, Depth, TreePath};

use crate::error::{TreeError, TreeResult};
use crate::node::{
    assemble, stack_child, stack_child_names, stack_data, DataChange, DataNode, NodeStack,
};

/// Handle to one layer of a delta chain.
pub struct LayeredTree<T> {
    inner: Arc<Layer<T>>,
}

#[derive(Clone)]
struct Layer<T> {
    root: DataNode<T>,
    parent: Option<LayeredTree<T>>,
    immutable: bool,
}

impl<T> Drop for Layer<T> {
    // Unlink the chain one layer at a time so dropping a long chain does not
    // recurse once per layer.
    fn drop(&mut self) {
        let mut next = self.parent.take();
        while let Some(tree) = next {
            match Arc::try_unwrap(tree.inner) {
                Ok(mut layer) => next = layer.parent.take(),
                Err(_) => break,
            }
        }
    }
}

/// Outcome of resolving a path inside a single layer.
enum Lookup<'a, T> {
    /// The path does not exist, whatever the layers below say.
    Absent,
    /// The layer has a node for the path.
    Found(&'a DataNode<T>),
    /// The layer says nothing about the path; ask the parent.
    Defer,
}

fn lookup<'a, T>(root: &'a DataNode<T>, path: &TreePath) -> Lookup<'a, T> {
    let mut node = root;
    for segment in path.segments() {
        let next = match node {
            DataNode::Complete { children, .. } => match children.get(segment) {
                Some(child) => child,
                None => return Lookup::Absent,
            },
            DataNode::Delta { children, .. } => match children.get(segment) {
                Some(child) => child,
                None => return Lookup::Defer,
            },
            DataNode::Deleted => return Lookup::Absent,
        };
        node = next;
    }
    if node.is_deleted() {
        Lookup::Absent
    } else {
        Lookup::Found(node)
    }
}

/// Walk the overlay along `path`, creating empty delta entries where the
/// layer defers to its parent. The path must resolve in the tree.
fn overlay_node_mut<'a, T>(root: &'a mut DataNode<T>, path: &TreePath) -> Option<&'a mut DataNode<T>> {
    let mut node = root;
    for segment in path.segments() {
        node = match node {
            DataNode::Complete { children, .. } => children.get_mut(segment)?,
            DataNode::Delta { children, .. } => children
                .entry(segment.clone())
                .or_insert_with(DataNode::empty_delta),
            DataNode::Deleted => return None,
        };
    }
    Some(node)
}

impl<T> Clone for LayeredTree<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for LayeredTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LayeredTree<T> {
    /// A new mutable complete tree holding a single root node with no data.
    pub fn new() -> Self {
        Self::from_layer(DataNode::leaf(None), None, false)
    }

    /// A new mutable complete tree rooted at `root`.
    ///
    /// Fails with [`TreeError::IncompleteRoot`] unless `root` is a complete
    /// node whose descendants are all complete.
    pub fn complete_from(root: DataNode<T>) -> TreeResult<Self> {
        if !root.is_complete() || !root.is_well_formed() {
            return Err(TreeError::IncompleteRoot);
        }
        Ok(Self::from_layer(root, None, false))
    }

    /// A new mutable delta layer applying `overlay` on top of `parent`.
    ///
    /// The parent must be frozen.
    pub fn delta_from(parent: &LayeredTree<T>, overlay: DataNode<T>) -> TreeResult<Self> {
        if !parent.is_immutable() {
            return Err(TreeError::NotFrozen);
        }
        if overlay.is_deleted() || !overlay.is_well_formed() {
            return Err(TreeError::IncompleteRoot);
        }
        Ok(Self::from_layer(overlay, Some(parent.clone()), false))
    }

    pub(crate) fn from_layer(root: DataNode<T>, parent: Option<LayeredTree<T>>, immutable: bool) -> Self {
        Self {
            inner: Arc::new(Layer {
                root,
                parent,
                immutable,
            }),
        }
    }

    // ---------------------------------------------------------------
    // Chain structure
    // ---------------------------------------------------------------

    /// The layer this one is a delta on, `None` for a complete tree.
    pub fn parent(&self) -> Option<&LayeredTree<T>> {
        self.inner.parent.as_ref()
    }

    pub fn is_immutable(&self) -> bool {
        self.inner.immutable
    }

    /// Returns `true` if this tree is the complete end of its chain.
    pub fn is_complete(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Returns `true` if both handles point at the same layer.
    pub fn ptr_eq(&self, other: &LayeredTree<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of parent hops to the complete end of the chain.
    pub fn chain_len(&self) -> usize {
        self.ancestry().count() - 1
    }

    /// This tree, its parent, and so on down to the complete tree.
    pub fn ancestry(&self) -> Ancestry<'_, T> {
        Ancestry { next: Some(self) }
    }

    /// Returns `true` if `ancestor` is this tree or one of its parents.
    pub fn descends_from(&self, ancestor: &LayeredTree<T>) -> bool {
        self.ancestry().any(|tree| tree.ptr_eq(ancestor))
    }

    /// Returns `true` for a delta layer that records no change.
    pub fn is_empty_delta(&self) -> bool {
        !self.is_complete() && self.inner.root.is_empty_delta()
    }

    /// The raw overlay this layer holds (the full tree for a complete layer).
    pub fn overlay(&self) -> &DataNode<T> {
        &self.inner.root
    }

    /// A new mutable delta layer on top of this frozen tree.
    pub fn new_empty_delta(&self) -> TreeResult<LayeredTree<T>> {
        if !self.is_immutable() {
            return Err(TreeError::NotFrozen);
        }
        Ok(Self::from_layer(DataNode::empty_delta(), Some(self.clone()), false))
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Every layer's node for `path`, nearest first, ending at a complete
    /// node. `None` if the path does not resolve.
    pub(crate) fn node_stack(&self, path: &TreePath) -> Option<NodeStack<'_, T>> {
        let mut stack = Vec::new();
        for tree in self.ancestry() {
            match lookup(&tree.inner.root, path) {
                Lookup::Absent => return None,
                Lookup::Found(node) => {
                    stack.push(node);
                    if node.is_complete() {
                        return Some(stack);
                    }
                }
                Lookup::Defer => {}
            }
        }
        None
    }

    pub(crate) fn require_stack(&self, path: &TreePath) -> TreeResult<NodeStack<'_, T>> {
        self.node_stack(path)
            .ok_or_else(|| TreeError::NotFound(path.clone()))
    }

    /// Returns `true` if a node exists at `path`.
    pub fn includes(&self, path: &TreePath) -> bool {
        self.node_stack(path).is_some()
    }

    /// The data at `path`. `Ok(None)` means the node exists without data.
    pub fn get_data(&self, path: &TreePath) -> TreeResult<Option<&T>> {
        Ok(stack_data(&self.require_stack(path)?))
    }

    pub fn root_data(&self) -> Option<&T> {
        self.node_stack(&TreePath::root())
            .and_then(|stack| stack_data(&stack))
    }

    /// Names of the children of `path`, sorted.
    pub fn child_names(&self, path: &TreePath) -> TreeResult<Vec<String>> {
        let stack = self.require_stack(path)?;
        Ok(stack_child_names(&stack)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Paths of the children of `path`, sorted by name.
    pub fn get_children(&self, path: &TreePath) -> TreeResult<Vec<TreePath>> {
        let stack = self.require_stack(path)?;
        Ok(stack_child_names(&stack)
            .into_iter()
            .map(|name| path.append(name))
            .collect())
    }

    pub fn child_count(&self, path: &TreePath) -> TreeResult<usize> {
        let stack = self.require_stack(path)?;
        Ok(stack_child_names(&stack).len())
    }

    /// Path of the `index`-th child of `path` in name order.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`child_count`](Self::child_count).
    pub fn get_child(&self, path: &TreePath, index: usize) -> TreeResult<TreePath> {
        let names = self.child_names(path)?;
        Ok(path.append(&names[index]))
    }

    /// Pre-order walk of the subtree at `path` in name order.
    ///
    /// The visitor returns `false` to skip a node's children. Nodes deeper
    /// than `depth` below `path` are not visited.
    pub fn visit(
        &self,
        path: &TreePath,
        depth: Depth,
        visitor: &mut dyn FnMut(&TreePath, Option<&T>) -> bool,
    ) -> TreeResult<()> {
        let stack = self.require_stack(path)?;
        visit_stack(&stack, path, depth, visitor);
        Ok(())
    }
}

fn visit_stack<T>(
    stack: &[&DataNode<T>],
    path: &TreePath,
    depth: Depth,
    visitor: &mut dyn FnMut(&TreePath, Option<&T>) -> bool,
) {
    if !visitor(path, stack_data(stack)) {
        return;
    }
    let Some(child_depth) = depth.child() else {
        return;
    };
    for name in stack_child_names(stack) {
        if let Some(child) = stack_child(stack, name) {
            visit_stack(&child, &path.append(name), child_depth, visitor);
        }
    }
}

impl<T: Clone> LayeredTree<T> {
    /// Freeze this layer. Freezing is permanent; a second call fails with
    /// [`TreeError::Immutable`].
    pub fn freeze(&mut self) -> TreeResult<()> {
        if self.is_immutable() {
            return Err(TreeError::Immutable);
        }
        Arc::make_mut(&mut self.inner).immutable = true;
        Ok(())
    }

    fn layer_mut(&mut self) -> TreeResult<&mut Layer<T>> {
        if self.is_immutable() {
            return Err(TreeError::Immutable);
        }
        Ok(Arc::make_mut(&mut self.inner))
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    /// Add a child named `name` under `parent_path`, replacing any existing
    /// child of that name together with its subtree.
    pub fn create_child(&mut self, parent_path: &TreePath, name: &str, data: Option<T>) -> TreeResult<()> {
        validate_segment(name).map_err(|_| TreeError::InvalidName(name.to_string()))?;
        self.replace_node(&parent_path.append(name), DataNode::leaf(data))
    }

    /// Remove the child `name` of `parent_path` and its whole subtree.
    pub fn delete_child(&mut self, parent_path: &TreePath, name: &str) -> TreeResult<()> {
        if self.is_immutable() {
            return Err(TreeError::Immutable);
        }
        let child = parent_path.append(name);
        if !self.includes(&child) {
            return Err(TreeError::NotFound(child));
        }
        let below = self.parent().is_some_and(|p| p.includes(&child));
        let layer = self.layer_mut()?;
        match overlay_node_mut(&mut layer.root, parent_path) {
            Some(DataNode::Complete { children, .. }) => {
                children.remove(name);
            }
            Some(DataNode::Delta { children, .. }) => {
                if below {
                    children.insert(name.to_string(), DataNode::Deleted);
                } else {
                    children.remove(name);
                }
            }
            Some(DataNode::Deleted) | None => return Err(TreeError::NotFound(child)),
        }
        Ok(())
    }

    /// Replace the data at `path`.
    pub fn set_data(&mut self, path: &TreePath, data: Option<T>) -> TreeResult<()> {
        if self.is_immutable() {
            return Err(TreeError::Immutable);
        }
        if !self.includes(path) {
            return Err(TreeError::NotFound(path.clone()));
        }
        let layer = self.layer_mut()?;
        match overlay_node_mut(&mut layer.root, path) {
            Some(DataNode::Complete { data: slot, .. }) => *slot = data,
            Some(DataNode::Delta { data: slot, .. }) => *slot = DataChange::Set(data),
            Some(DataNode::Deleted) | None => return Err(TreeError::NotFound(path.clone())),
        }
        Ok(())
    }

    /// Replace the node at `path` with a copy of `subtree`'s content.
    ///
    /// The parent of `path` must exist; `path` itself may be new, and may be
    /// the root.
    pub fn create_subtree(&mut self, path: &TreePath, subtree: &LayeredTree<T>) -> TreeResult<()> {
        let node = subtree.complete_node(&TreePath::root())?;
        self.replace_node(path, node)
    }

    /// Install `node` at `path`. Every check runs before the overlay changes.
    pub(crate) fn replace_node(&mut self, path: &TreePath, node: DataNode<T>) -> TreeResult<()> {
        if self.is_immutable() {
            return Err(TreeError::Immutable);
        }
        let Some((parent_path, name)) = path.parent().zip(path.last_segment()) else {
            self.layer_mut()?.root = node;
            return Ok(());
        };
        if !self.includes(&parent_path) {
            return Err(TreeError::NotFound(parent_path));
        }
        let layer = self.layer_mut()?;
        match overlay_node_mut(&mut layer.root, &parent_path) {
            Some(DataNode::Complete { children, .. }) | Some(DataNode::Delta { children, .. }) => {
                children.insert(name.to_string(), node);
                Ok(())
            }
            Some(DataNode::Deleted) | None => Err(TreeError::NotFound(parent_path)),
        }
    }

    /// Materialize the subtree at `path` as a self-contained complete node.
    pub(crate) fn complete_node(&self, path: &TreePath) -> TreeResult<DataNode<T>> {
        Ok(assemble(&self.require_stack(path)?))
    }

    /// A new mutable complete tree whose root is a copy of the node at `path`.
    pub fn copy_complete_subtree(&self, path: &TreePath) -> TreeResult<LayeredTree<T>> {
        Ok(Self::from_layer(self.complete_node(path)?, None, false))
    }

    /// An equivalent tree with no parent. A complete tree is returned as is;
    /// otherwise the result is frozen exactly when `self` is.
    pub fn make_complete(&self) -> LayeredTree<T> {
        if self.is_complete() {
            return self.clone();
        }
        let root = assemble(&self.node_stack(&TreePath::root()).unwrap_or_default());
        Self::from_layer(root, None, self.is_immutable())
    }
}

impl<T> fmt::Debug for LayeredTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayeredTree")
            .field("complete", &self.is_complete())
            .field("immutable", &self.is_immutable())
            .field("chain_len", &self.chain_len())
            .field("overlay_nodes", &self.inner.root.node_count())
            .finish()
    }
}

/// Iterator over a tree and its parents, nearest first.
pub struct Ancestry<'a, T> {
    next: Option<&'a LayeredTree<T>>,
}

impl<'a, T> Iterator for Ancestry<'a, T> {
    type Item = &'a LayeredTree<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{flatten, p, sample_tree};

    #[test]
    fn new_tree_has_empty_root() {
        let tree: LayeredTree<String> = LayeredTree::new();
        assert!(tree.includes(&TreePath::root()));
        assert!(tree.root_data().is_none());
        assert_eq!(tree.child_count(&TreePath::root()).unwrap(), 0);
        assert!(tree.is_complete());
        assert!(!tree.is_immutable());
        assert_eq!(tree.chain_len(), 0);
    }

    #[test]
    fn children_enumerate_in_name_order() {
        let tree = sample_tree();
        assert_eq!(
            tree.child_names(&p("/leftOfRoot")).unwrap(),
            vec!["one", "three", "two"]
        );
        assert_eq!(tree.get_child(&p("/leftOfRoot"), 2).unwrap(), p("/leftOfRoot/two"));
        assert_eq!(
            tree.get_children(&TreePath::root()).unwrap(),
            vec![p("/leftOfRoot"), p("/rightOfRoot")]
        );
    }

    #[test]
    #[should_panic]
    fn get_child_out_of_range_panics() {
        let tree = sample_tree();
        let _ = tree.get_child(&p("/leftOfRoot"), 3);
    }

    #[test]
    fn missing_paths_are_not_found() {
        let mut tree = sample_tree();
        let missing = p("/leftOfRoot/four");
        assert!(!tree.includes(&missing));
        assert_eq!(tree.get_data(&missing), Err(TreeError::NotFound(missing.clone())));
        assert_eq!(
            tree.create_child(&missing, "x", None),
            Err(TreeError::NotFound(missing.clone()))
        );
        assert_eq!(
            tree.delete_child(&p("/leftOfRoot"), "four"),
            Err(TreeError::NotFound(missing))
        );
        assert!(tree.get_child(&p("/nowhere"), 0).is_err());
    }

    #[test]
    fn deleting_a_subtree_twice_fails() {
        let root = TreePath::root();
        let left = p("/leftOfRoot");

        let mut complete = sample_tree();
        complete.delete_child(&root, "leftOfRoot").unwrap();
        assert!(!complete.includes(&left));
        assert!(!complete.includes(&p("/leftOfRoot/one")));
        assert!(complete.includes(&root));
        assert_eq!(
            complete.delete_child(&root, "leftOfRoot"),
            Err(TreeError::NotFound(left.clone()))
        );

        let mut base = sample_tree();
        base.freeze().unwrap();
        let mut delta = base.new_empty_delta().unwrap();
        delta.delete_child(&root, "leftOfRoot").unwrap();
        assert!(!delta.includes(&left));
        assert!(delta.includes(&root));
        assert_eq!(
            delta.delete_child(&root, "leftOfRoot"),
            Err(TreeError::NotFound(left.clone()))
        );
        assert!(base.includes(&left));
    }

    #[test]
    fn invalid_child_names_are_rejected() {
        let mut tree: LayeredTree<String> = LayeredTree::new();
        assert_eq!(
            tree.create_child(&TreePath::root(), "", None),
            Err(TreeError::InvalidName(String::new()))
        );
        assert_eq!(
            tree.create_child(&TreePath::root(), "a/b", None),
            Err(TreeError::InvalidName("a/b".into()))
        );
    }

    #[test]
    fn create_child_replaces_subtree() {
        let mut tree = sample_tree();
        tree.create_child(&TreePath::root(), "leftOfRoot", Some("fresh".into()))
            .unwrap();
        assert_eq!(tree.child_count(&p("/leftOfRoot")).unwrap(), 0);
        assert_eq!(
            tree.get_data(&p("/leftOfRoot")).unwrap().map(String::as_str),
            Some("fresh")
        );
    }

    #[test]
    fn frozen_tree_rejects_mutation() {
        let mut tree = sample_tree();
        tree.freeze().unwrap();
        assert_eq!(tree.freeze(), Err(TreeError::Immutable));
        assert_eq!(
            tree.create_child(&TreePath::root(), "x", None),
            Err(TreeError::Immutable)
        );
        assert_eq!(
            tree.delete_child(&TreePath::root(), "leftOfRoot"),
            Err(TreeError::Immutable)
        );
        assert_eq!(tree.set_data(&TreePath::root(), None), Err(TreeError::Immutable));
        assert!(tree.includes(&p("/leftOfRoot/one")));
    }

    #[test]
    fn new_empty_delta_requires_frozen_parent() {
        let tree = sample_tree();
        assert_eq!(tree.new_empty_delta().unwrap_err(), TreeError::NotFrozen);
    }

    #[test]
    fn delta_layer_reads_through_parent() {
        let mut base = sample_tree();
        base.freeze().unwrap();
        let mut delta = base.new_empty_delta().unwrap();
        assert!(delta.is_empty_delta());
        assert_eq!(delta.chain_len(), 1);
        assert!(delta.parent().unwrap().ptr_eq(&base));
        assert_eq!(flatten(&delta), flatten(&base));

        delta.set_data(&p("/leftOfRoot/one"), Some("changed".into())).unwrap();
        delta.create_child(&p("/rightOfRoot"), "added", None).unwrap();
        delta.delete_child(&p("/leftOfRoot"), "two").unwrap();

        assert!(!delta.is_empty_delta());
        assert_eq!(
            delta.get_data(&p("/leftOfRoot/one")).unwrap().map(String::as_str),
            Some("changed")
        );
        assert!(delta.includes(&p("/rightOfRoot/added")));
        assert!(!delta.includes(&p("/leftOfRoot/two")));
        assert_eq!(delta.child_names(&p("/leftOfRoot")).unwrap(), vec!["one", "three"]);

        // The base is untouched.
        assert!(base.includes(&p("/leftOfRoot/two")));
        assert_eq!(
            base.get_data(&p("/leftOfRoot/one")).unwrap().map(String::as_str),
            Some("one")
        );
    }

    #[test]
    fn add_then_delete_in_one_layer() {
        let mut base = sample_tree();
        base.freeze().unwrap();
        let mut delta = base.new_empty_delta().unwrap();
        delta.create_child(&p("/leftOfRoot"), "four", None).unwrap();
        delta.delete_child(&p("/leftOfRoot"), "four").unwrap();
        assert!(!delta.includes(&p("/leftOfRoot/four")));
        assert_eq!(delta.child_count(&p("/leftOfRoot")).unwrap(), 3);
    }

    #[test]
    fn delete_then_recreate_hides_old_children() {
        let mut base = sample_tree();
        base.freeze().unwrap();
        let mut delta = base.new_empty_delta().unwrap();
        delta.delete_child(&TreePath::root(), "leftOfRoot").unwrap();
        delta.create_child(&TreePath::root(), "leftOfRoot", None).unwrap();
        assert!(delta.includes(&p("/leftOfRoot")));
        assert_eq!(delta.child_count(&p("/leftOfRoot")).unwrap(), 0);
        assert!(!delta.includes(&p("/leftOfRoot/one")));
    }

    #[test]
    fn add_twice_then_delete_hides_every_layer() {
        let mut base = sample_tree();
        base.freeze().unwrap();
        let mut delta = base.new_empty_delta().unwrap();
        delta.create_child(&p("/leftOfRoot"), "one", Some("again".into())).unwrap();
        delta.create_child(&p("/leftOfRoot"), "one", Some("and again".into())).unwrap();
        delta.delete_child(&p("/leftOfRoot"), "one").unwrap();
        assert!(!delta.includes(&p("/leftOfRoot/one")));
        assert_eq!(delta.child_names(&p("/leftOfRoot")).unwrap(), vec!["three", "two"]);

        let mut fresh = base.new_empty_delta().unwrap();
        fresh.create_child(&p("/rightOfRoot"), "new", None).unwrap();
        fresh.create_child(&p("/rightOfRoot"), "new", None).unwrap();
        fresh.delete_child(&p("/rightOfRoot"), "new").unwrap();
        assert_eq!(fresh.child_count(&p("/rightOfRoot")).unwrap(), 1);
    }

    #[test]
    fn cloning_a_mutable_tree_forks_it() {
        let mut original = sample_tree();
        let copy = original.clone();
        original.create_child(&TreePath::root(), "extra", None).unwrap();
        assert!(original.includes(&p("/extra")));
        assert!(!copy.includes(&p("/extra")));
    }

    #[test]
    fn frozen_clones_share_identity() {
        let mut tree = sample_tree();
        tree.freeze().unwrap();
        let other = tree.clone();
        assert!(tree.ptr_eq(&other));
    }

    #[test]
    fn copy_complete_subtree_is_detached() {
        let mut base = sample_tree();
        base.freeze().unwrap();
        let mut delta = base.new_empty_delta().unwrap();
        delta.create_child(&p("/leftOfRoot/one"), "deep", Some("d".into())).unwrap();
        let copy = delta.copy_complete_subtree(&p("/leftOfRoot")).unwrap();
        assert!(copy.is_complete());
        assert!(!copy.is_immutable());
        assert_eq!(copy.root_data().map(String::as_str), Some("left"));
        assert_eq!(copy.child_names(&TreePath::root()).unwrap(), vec!["one", "three", "two"]);
        assert!(copy.includes(&p("/one/deep")));
    }

    #[test]
    fn create_subtree_installs_a_copy() {
        let mut tree = sample_tree();
        let mut branch: LayeredTree<String> = LayeredTree::new();
        branch.set_data(&TreePath::root(), Some("branch".into())).unwrap();
        branch.create_child(&TreePath::root(), "leaf", None).unwrap();

        tree.create_subtree(&p("/rightOfRoot/grafted"), &branch).unwrap();
        assert_eq!(
            tree.get_data(&p("/rightOfRoot/grafted")).unwrap().map(String::as_str),
            Some("branch")
        );
        assert!(tree.includes(&p("/rightOfRoot/grafted/leaf")));
        assert_eq!(
            tree.create_subtree(&p("/missing/grafted"), &branch),
            Err(TreeError::NotFound(p("/missing")))
        );

        tree.create_subtree(&TreePath::root(), &branch).unwrap();
        assert_eq!(tree.child_names(&TreePath::root()).unwrap(), vec!["leaf"]);
    }

    #[test]
    fn make_complete_flattens_the_chain() {
        let mut base = sample_tree();
        base.freeze().unwrap();
        let mut delta = base.new_empty_delta().unwrap();
        delta.delete_child(&TreePath::root(), "rightOfRoot").unwrap();
        delta.freeze().unwrap();
        let complete = delta.make_complete();
        assert!(complete.is_complete());
        assert!(complete.is_immutable());
        assert_eq!(flatten(&complete), flatten(&delta));
    }

    #[test]
    fn visit_prunes_and_bounds_depth() {
        let tree = sample_tree();
        let mut seen = Vec::new();
        tree.visit(&TreePath::root(), Depth::Bounded(1), &mut |path, _| {
            seen.push(path.to_string());
            true
        })
        .unwrap();
        assert_eq!(seen, vec!["/", "/leftOfRoot", "/rightOfRoot"]);

        let mut seen = Vec::new();
        tree.visit(&TreePath::root(), Depth::Unbounded, &mut |path, _| {
            seen.push(path.to_string());
            path.is_root() || path.segments()[0] != "leftOfRoot"
        })
        .unwrap();
        assert_eq!(
            seen,
            vec!["/", "/leftOfRoot", "/rightOfRoot", "/rightOfRoot/rightOfRight"]
        );
    }

    #[test]
    fn ancestry_walks_to_the_complete_tree() {
        let mut base = sample_tree();
        base.freeze().unwrap();
        let mut mid = base.new_empty_delta().unwrap();
        mid.freeze().unwrap();
        let tip = mid.new_empty_delta().unwrap();
        let chain: Vec<_> = tip.ancestry().collect();
        assert_eq!(chain.len(), 3);
        assert!(chain[1].ptr_eq(&mid));
        assert!(chain[2].ptr_eq(&base));
        assert!(tip.descends_from(&base));
        assert!(!base.descends_from(&tip));
    }

    #[test]
    fn long_chains_drop_without_overflow() {
        let mut tree: LayeredTree<u32> = LayeredTree::new();
        tree.freeze().unwrap();
        for i in 0..100_000 {
            let overlay = DataNode::Delta {
                data: DataChange::Set(Some(i)),
                children: Default::default(),
            };
            let mut next = LayeredTree::delta_from(&tree, overlay).unwrap();
            next.freeze().unwrap();
            tree = next;
        }
        assert_eq!(tree.root_data(), Some(&99_999));
        drop(tree);
    }

    #[test]
    fn frozen_trees_are_shared_across_threads() {
        let mut tree = sample_tree();
        tree.freeze().unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reader = tree.clone();
                std::thread::spawn(move || flatten(&reader).len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 7);
        }
    }

    #[test]
    fn delta_from_requires_frozen_parent_and_sane_overlay() {
        let base = sample_tree();
        assert_eq!(
            LayeredTree::delta_from(&base, DataNode::empty_delta()).unwrap_err(),
            TreeError::NotFrozen
        );
        let mut base = base;
        base.freeze().unwrap();
        assert_eq!(
            LayeredTree::delta_from(&base, DataNode::Deleted).unwrap_err(),
            TreeError::IncompleteRoot
        );
        assert_eq!(
            LayeredTree::<String>::complete_from(DataNode::empty_delta()).unwrap_err(),
            TreeError::IncompleteRoot
        );
    }
}
