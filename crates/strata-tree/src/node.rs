//! Node store: the overlay nodes every layer is made of.
//!
//! A complete layer holds a tree of [`DataNode::Complete`] nodes. A delta
//! layer holds a sparse overlay whose entries say "replaced by this complete
//! subtree", "removed", or "still here, data maybe changed, look below for
//! the rest".
//!
//! # Invariants
//!
//! - Children of a `Complete` node are all `Complete`.
//! - A `Delta` node only appears at a path that exists in the layer below.
//! - Children are keyed by name in a `BTreeMap`, so every enumeration is in
//!   name order.

use std::collections::{BTreeMap, BTreeSet};

/// Data carried by a delta node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataChange<T> {
    /// Data comes from the layer below.
    Keep,
    /// Data replaced in this layer (`None` clears it).
    Set(Option<T>),
}

/// One node of a layer's overlay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataNode<T> {
    /// Present; data and children are self-contained and shadow every layer below.
    Complete {
        data: Option<T>,
        children: BTreeMap<String, DataNode<T>>,
    },
    /// Present; children listed here are changes on top of the layer below.
    Delta {
        data: DataChange<T>,
        children: BTreeMap<String, DataNode<T>>,
    },
    /// Removed in this layer, together with everything below it.
    Deleted,
}

impl<T> DataNode<T> {
    /// A complete node with no children.
    pub fn leaf(data: Option<T>) -> Self {
        DataNode::Complete {
            data,
            children: BTreeMap::new(),
        }
    }

    /// A delta node that changes nothing.
    pub fn empty_delta() -> Self {
        DataNode::Delta {
            data: DataChange::Keep,
            children: BTreeMap::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, DataNode::Complete { .. })
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, DataNode::Delta { .. })
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, DataNode::Deleted)
    }

    /// Returns `true` for a delta node that records no change at all.
    pub fn is_empty_delta(&self) -> bool {
        matches!(
            self,
            DataNode::Delta { data: DataChange::Keep, children } if children.is_empty()
        )
    }

    /// Child entries of this node (`None` for a deleted node).
    pub fn children(&self) -> Option<&BTreeMap<String, DataNode<T>>> {
        match self {
            DataNode::Complete { children, .. } | DataNode::Delta { children, .. } => Some(children),
            DataNode::Deleted => None,
        }
    }

    pub fn child(&self, name: &str) -> Option<&DataNode<T>> {
        self.children().and_then(|c| c.get(name))
    }

    /// Number of nodes in this overlay, this node included.
    pub fn node_count(&self) -> usize {
        1 + self
            .children()
            .map(|c| c.values().map(DataNode::node_count).sum())
            .unwrap_or(0)
    }

    /// Check the structural invariant: complete nodes only hold complete
    /// children.
    pub fn is_well_formed(&self) -> bool {
        match self {
            DataNode::Complete { children, .. } => children
                .values()
                .all(|c| c.is_complete() && c.is_well_formed()),
            DataNode::Delta { children, .. } => children.values().all(DataNode::is_well_formed),
            DataNode::Deleted => true,
        }
    }

    /// Transform every payload in this overlay, keeping its shape.
    pub fn map_data<U>(&self, f: &mut dyn FnMut(Option<&T>) -> Option<U>) -> DataNode<U> {
        match self {
            DataNode::Complete { data, children } => DataNode::Complete {
                data: f(data.as_ref()),
                children: map_children(children, f),
            },
            DataNode::Delta { data, children } => DataNode::Delta {
                data: match data {
                    DataChange::Keep => DataChange::Keep,
                    DataChange::Set(d) => DataChange::Set(f(d.as_ref())),
                },
                children: map_children(children, f),
            },
            DataNode::Deleted => DataNode::Deleted,
        }
    }
}

fn map_children<T, U>(
    children: &BTreeMap<String, DataNode<T>>,
    f: &mut dyn FnMut(Option<&T>) -> Option<U>,
) -> BTreeMap<String, DataNode<U>> {
    children
        .iter()
        .map(|(name, child)| (name.clone(), child.map_data(f)))
        .collect()
}

// ---------------------------------------------------------------
// Node stacks
// ---------------------------------------------------------------
//
// A node stack is every layer's view of one path, nearest layer first.
// All entries but the last are delta nodes; the last one is complete.

pub(crate) type NodeStack<'a, T> = Vec<&'a DataNode<T>>;

/// The payload a stack resolves to.
pub(crate) fn stack_data<'a, T>(stack: &[&'a DataNode<T>]) -> Option<&'a T> {
    for node in stack {
        match node {
            DataNode::Complete { data, .. } => return data.as_ref(),
            DataNode::Delta {
                data: DataChange::Set(data),
                ..
            } => return data.as_ref(),
            _ => {}
        }
    }
    None
}

/// The names of the children a stack resolves to, in name order.
pub(crate) fn stack_child_names<'a, T>(stack: &[&'a DataNode<T>]) -> BTreeSet<&'a str> {
    let mut names = BTreeSet::new();
    let Some((base, overlays)) = stack.split_last() else {
        return names;
    };
    if let Some(children) = base.children() {
        names.extend(children.keys().map(String::as_str));
    }
    for overlay in overlays.iter().rev() {
        let Some(children) = overlay.children() else {
            continue;
        };
        for (name, child) in children {
            if child.is_deleted() {
                names.remove(name.as_str());
            } else {
                names.insert(name.as_str());
            }
        }
    }
    names
}

/// The stack for child `name`, or `None` if that child does not resolve.
pub(crate) fn stack_child<'a, T>(stack: &[&'a DataNode<T>], name: &str) -> Option<NodeStack<'a, T>> {
    let mut child_stack = Vec::new();
    for node in stack {
        match node {
            DataNode::Complete { children, .. } => {
                let child = children.get(name)?;
                child_stack.push(child);
                return Some(child_stack);
            }
            DataNode::Delta { children, .. } => match children.get(name) {
                Some(DataNode::Deleted) => return None,
                Some(child) => {
                    child_stack.push(child);
                    if child.is_complete() {
                        return Some(child_stack);
                    }
                }
                None => {}
            },
            DataNode::Deleted => return None,
        }
    }
    None
}

/// Two stacks made of the very same nodes resolve identically.
pub(crate) fn same_stack<T>(a: &[&DataNode<T>], b: &[&DataNode<T>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| std::ptr::eq(*x, *y))
}

/// Materialize a stack into a self-contained complete node.
pub(crate) fn assemble<T: Clone>(stack: &[&DataNode<T>]) -> DataNode<T> {
    if let [node @ DataNode::Complete { .. }] = stack {
        return (*node).clone();
    }
    let children = stack_child_names(stack)
        .into_iter()
        .filter_map(|name| stack_child(stack, name).map(|s| (name.to_string(), assemble(&s))))
        .collect();
    DataNode::Complete {
        data: stack_data(stack).cloned(),
        children,
    }
}
