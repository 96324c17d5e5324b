//! Layered tree engine for Strata.
//!
//! A [`LayeredTree`] is one layer of a delta chain: either a complete tree
//! or a sparse overlay on a frozen parent. Snapshots are cheap to take and
//! cheap to hold, since each layer only stores what changed.
//!
//! # Key Types
//!
//! - **[`LayeredTree`]**: handle to one layer; reads resolve through the chain
//! - **[`DataNode`]**: the overlay nodes a layer is made of
//! - **[`DiffScope`]**: path, depth and cancellation for deltas and comparisons
//! - **[`Lineage`]**: single-writer helper that commits snapshots and reroots
//!   long chains
//!
//! Chain ordering lives in the free functions [`find_oldest`] and
//! [`sort_trees`].

pub mod chain;
pub mod diff;
pub mod error;
pub mod lineage;
pub mod node;
pub mod tree;

#[cfg(test)]
mod testing;

pub use chain::{find_oldest, sort_trees};
pub use diff::DiffScope;
pub use error::{TreeError, TreeResult};
pub use lineage::{Lineage, LineageConfig};
pub use node::{DataChange, DataNode};
pub use tree::{Ancestry, LayeredTree};
