use std::fmt;

use serde::{Deserialize, Serialize};

/// How far below a starting node a traversal or a flattening descends.
///
/// `Bounded(0)` covers only the starting node itself, `Bounded(1)` the node
/// and its children, and so on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Depth {
    #[default]
    Unbounded,
    Bounded(u32),
}

impl Depth {
    /// The depth remaining for the children of a node visited at `self`.
    ///
    /// Returns `None` when the bound is exhausted and children must not be
    /// visited.
    pub fn child(self) -> Option<Depth> {
        match self {
            Depth::Unbounded => Some(Depth::Unbounded),
            Depth::Bounded(0) => None,
            Depth::Bounded(n) => Some(Depth::Bounded(n - 1)),
        }
    }

    /// Returns `true` if children of a node visited at this depth are visited.
    pub fn allows_children(self) -> bool {
        self.child().is_some()
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Depth::Unbounded => write!(f, "unbounded"),
            Depth::Bounded(n) => write!(f, "{n}"),
        }
    }
}

impl From<Option<u32>> for Depth {
    fn from(value: Option<u32>) -> Self {
        value.map_or(Depth::Unbounded, Depth::Bounded)
    }
}
