//! Foundation types for Strata.
//!
//! Every other Strata crate depends on `strata-types`. Nothing in here knows
//! about layering or versioning; these are the value types the tree engine,
//! the diff engine and the codec agree on.
//!
//! # Key Types
//!
//! - **[`TreePath`]**: hierarchical address of a node (empty = root)
//! - **[`Depth`]**: traversal bound, `Unbounded` or `Bounded(n)`
//! - **[`ChangeKind`] / [`Comparator`]**: caller-supplied payload comparison
//! - **[`NodeComparison`]**: one node of a comparison tree
//! - **[`CancellationToken`]**: cooperative cancellation for long traversals

pub mod cancel;
pub mod change;
pub mod depth;
pub mod error;
pub mod path;

pub use cancel::CancellationToken;
pub use change::{ChangeKind, Comparator, EqualityComparator, NodeComparison};
pub use depth::Depth;
pub use error::TypeError;
pub use path::{validate_segment, TreePath};
