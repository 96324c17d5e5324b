//! Single-writer lineage: a mutable tip plus the snapshots committed so far.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TreeResult;
use crate::tree::LayeredTree;

/// Tuning for a [`Lineage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    /// Reroot a committed snapshot once its chain grows longer than this.
    /// Zero disables rerooting.
    pub reroot_threshold: usize,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            reroot_threshold: 64,
        }
    }
}

/// The writer side of one lineage.
///
/// Mutations go through [`tip_mut`](Lineage::tip_mut); [`commit`](Lineage::commit)
/// turns the tip into an immutable snapshot and opens a fresh delta on top.
/// Snapshots handed out earlier stay valid whatever happens afterwards.
pub struct Lineage<T> {
    tip: LayeredTree<T>,
    config: LineageConfig,
    commits: u64,
}

impl<T: Clone> Lineage<T> {
    /// A lineage starting from an empty tree.
    pub fn new(config: LineageConfig) -> Self {
        Self {
            tip: LayeredTree::new(),
            config,
            commits: 0,
        }
    }

    /// A lineage continuing from a frozen snapshot.
    pub fn from_snapshot(snapshot: &LayeredTree<T>, config: LineageConfig) -> TreeResult<Self> {
        Ok(Self {
            tip: snapshot.new_empty_delta()?,
            config,
            commits: 0,
        })
    }

    pub fn tip(&self) -> &LayeredTree<T> {
        &self.tip
    }

    pub fn tip_mut(&mut self) -> &mut LayeredTree<T> {
        &mut self.tip
    }

    pub fn config(&self) -> &LineageConfig {
        &self.config
    }

    /// Number of commits that produced a new snapshot.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Freeze the tip and return it as a snapshot, then open a new delta.
    ///
    /// A tip with no changes is not committed; its parent is returned. A
    /// snapshot whose chain exceeds the reroot threshold is rerooted first,
    /// so the returned snapshot may be a complete tree.
    pub fn commit(&mut self) -> TreeResult<LayeredTree<T>> {
        if self.tip.is_empty_delta() {
            if let Some(parent) = self.tip.parent() {
                return Ok(parent.clone());
            }
        }
        if !self.tip.is_immutable() {
            self.tip.freeze()?;
        }
        let mut snapshot = self.tip.clone();
        let threshold = self.config.reroot_threshold;
        if threshold > 0 && snapshot.chain_len() > threshold {
            debug!(chain_len = snapshot.chain_len(), threshold, "rerooting committed snapshot");
            if let Some(complete) = snapshot.reroot()?.into_iter().next() {
                snapshot = complete;
            }
        }
        self.tip = snapshot.new_empty_delta()?;
        self.commits += 1;
        Ok(snapshot)
    }
}
