//! Error types for the tree engine.

use strata_types::TreePath;

/// Errors that can occur during tree operations.
///
/// Every variant is a broken precondition: the call did not touch the tree
/// and retrying it unchanged will fail the same way.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// A path that must resolve does not exist in the tree.
    #[error("no node at {0}")]
    NotFound(TreePath),

    /// A child name is empty or contains the path separator.
    #[error("invalid child name {0:?}")]
    InvalidName(String),

    /// The tree has been frozen and can no longer be mutated or re-frozen.
    #[error("tree is immutable")]
    Immutable,

    /// The operation needs a frozen tree (it becomes a parent or a chain member).
    #[error("tree must be frozen first")]
    NotFrozen,

    /// A delta chain argument was empty.
    #[error("delta chain is empty")]
    EmptyChain,

    /// A delta chain contains mutable trees or trees from different lineages.
    #[error("delta chain is not in an unambiguous order")]
    UnsortableChain,

    /// A tree was built from a malformed root: a complete tree whose root is
    /// not complete, a complete node holding non-complete children, or a
    /// delta overlay rooted at a tombstone.
    #[error("malformed root node")]
    IncompleteRoot,

    /// A traversal observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias for tree results.
pub type TreeResult<T> = Result<T, TreeError>;
