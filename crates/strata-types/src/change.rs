//! Change classification and the comparator strategy.

use serde::{Deserialize, Serialize};

/// How a node differs between an old and a new tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Present in both trees and equal under the comparator.
    #[default]
    NoChange,
    /// Present only in the new tree.
    Added,
    /// Present only in the old tree.
    Removed,
    /// Present in both trees, different under the comparator.
    Changed,
}

impl ChangeKind {
    /// Returns `true` for anything other than `NoChange`.
    pub fn is_change(self) -> bool {
        self != ChangeKind::NoChange
    }

    /// The kind seen when old and new are swapped.
    pub fn reversed(self) -> Self {
        match self {
            ChangeKind::Added => ChangeKind::Removed,
            ChangeKind::Removed => ChangeKind::Added,
            other => other,
        }
    }
}

/// Caller-supplied payload comparison.
///
/// Implementations must be pure and consistent for the duration of a
/// comparison: the engines call `compare` any number of times per pair.
/// `None` stands for a node that exists but carries no data.
pub trait Comparator<T: ?Sized>: Send + Sync {
    fn compare(&self, old: Option<&T>, new: Option<&T>) -> ChangeKind;

    /// Convenience: `true` when `compare` reports no change.
    fn is_equal(&self, old: Option<&T>, new: Option<&T>) -> bool {
        !self.compare(old, new).is_change()
    }
}

impl<T: ?Sized, F> Comparator<T> for F
where
    F: Fn(Option<&T>, Option<&T>) -> ChangeKind + Send + Sync,
{
    fn compare(&self, old: Option<&T>, new: Option<&T>) -> ChangeKind {
        self(old, new)
    }
}

/// Compares payloads with `PartialEq`.
///
/// Data appearing (`None` → `Some`) is `Added`, data disappearing is
/// `Removed`, differing values are `Changed`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EqualityComparator;

impl<T: PartialEq + ?Sized> Comparator<T> for EqualityComparator {
    fn compare(&self, old: Option<&T>, new: Option<&T>) -> ChangeKind {
        match (old, new) {
            (None, None) => ChangeKind::NoChange,
            (None, Some(_)) => ChangeKind::Added,
            (Some(_), None) => ChangeKind::Removed,
            (Some(a), Some(b)) if a == b => ChangeKind::NoChange,
            (Some(_), Some(_)) => ChangeKind::Changed,
        }
    }
}

/// One node of a comparison tree: the old and new payloads at a path and
/// how the node changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeComparison<T> {
    old: Option<T>,
    new: Option<T>,
    kind: ChangeKind,
}

impl<T> NodeComparison<T> {
    pub fn new(old: Option<T>, new: Option<T>, kind: ChangeKind) -> Self {
        Self { old, new, kind }
    }

    pub fn old_data(&self) -> Option<&T> {
        self.old.as_ref()
    }

    pub fn new_data(&self) -> Option<&T> {
        self.new.as_ref()
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Swap old and new. Added and Removed trade places; for nodes present
    /// on both sides the kind is recomputed with `comparator`.
    pub fn reversed(&self, comparator: &dyn Comparator<T>) -> Self
    where
        T: Clone,
    {
        let kind = match self.kind {
            ChangeKind::Added | ChangeKind::Removed => self.kind.reversed(),
            ChangeKind::Changed | ChangeKind::NoChange => {
                if comparator.is_equal(self.new.as_ref(), self.old.as_ref()) {
                    ChangeKind::NoChange
                } else {
                    ChangeKind::Changed
                }
            }
        };
        Self {
            old: self.new.clone(),
            new: self.old.clone(),
            kind,
        }
    }
}
