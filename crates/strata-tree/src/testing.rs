//! Fixtures shared by the unit tests of this crate.

use std::collections::BTreeMap;

use proptest::prelude::*;
use strata_types::{Depth, TreePath};

use crate::tree::LayeredTree;

pub(crate) fn p(path: &str) -> TreePath {
    path.parse().unwrap()
}

/// ```text
/// /                  "root"
/// ├── leftOfRoot     "left"
/// │   ├── one        "one"
/// │   ├── three      "three"
/// │   └── two        "two"
/// └── rightOfRoot    "right"
///     └── rightOfRight "rightOfRight"
/// ```
pub(crate) fn sample_tree() -> LayeredTree<String> {
    let mut tree = LayeredTree::new();
    let root = TreePath::root();
    tree.set_data(&root, Some("root".into())).unwrap();
    tree.create_child(&root, "leftOfRoot", Some("left".into())).unwrap();
    tree.create_child(&root, "rightOfRoot", Some("right".into())).unwrap();
    for name in ["one", "two", "three"] {
        tree.create_child(&p("/leftOfRoot"), name, Some(name.into())).unwrap();
    }
    tree.create_child(&p("/rightOfRoot"), "rightOfRight", Some("rightOfRight".into()))
        .unwrap();
    tree
}

/// Every path of the tree mapped to its data.
pub(crate) fn flatten<T: Clone>(tree: &LayeredTree<T>) -> BTreeMap<TreePath, Option<T>> {
    let mut nodes = BTreeMap::new();
    tree.visit(&TreePath::root(), Depth::Unbounded, &mut |path, data| {
        nodes.insert(path.clone(), data.cloned());
        true
    })
    .unwrap();
    nodes
}

/// A random edit, addressed by indexes into the tree's current path list.
#[derive(Clone, Debug)]
pub(crate) enum Op {
    Create { parent: usize, name: u8, data: Option<u8> },
    Delete { victim: usize },
    SetData { target: usize, data: Option<u8> },
}

pub(crate) fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), 0u8..5, proptest::option::of(0u8..4))
            .prop_map(|(parent, name, data)| Op::Create { parent, name, data }),
        1 => any::<usize>().prop_map(|victim| Op::Delete { victim }),
        2 => (any::<usize>(), proptest::option::of(0u8..4))
            .prop_map(|(target, data)| Op::SetData { target, data }),
    ]
}

pub(crate) fn apply(tree: &mut LayeredTree<String>, op: &Op) {
    let paths: Vec<TreePath> = flatten(tree).into_keys().collect();
    let pick = |i: usize| paths[i % paths.len()].clone();
    match op {
        Op::Create { parent, name, data } => {
            let name = format!("n{name}");
            tree.create_child(&pick(*parent), &name, data.map(|d| format!("v{d}")))
                .unwrap();
        }
        Op::Delete { victim } => {
            let victim = pick(*victim);
            if let (Some(parent), Some(name)) = (victim.parent(), victim.last_segment()) {
                tree.delete_child(&parent, name).unwrap();
            }
        }
        Op::SetData { target, data } => {
            tree.set_data(&pick(*target), data.map(|d| format!("v{d}")))
                .unwrap();
        }
    }
}

/// A frozen chain starting at the sample tree: one layer per batch of edits,
/// oldest first.
pub(crate) fn build_chain(batches: &[Vec<Op>]) -> Vec<LayeredTree<String>> {
    let mut base = sample_tree();
    base.freeze().unwrap();
    let mut chain = vec![base];
    for batch in batches {
        let mut next = chain.last().unwrap().new_empty_delta().unwrap();
        for op in batch {
            apply(&mut next, op);
        }
        next.freeze().unwrap();
        chain.push(next);
    }
    chain
}
