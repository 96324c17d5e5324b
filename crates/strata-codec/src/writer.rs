use std::io::Write;
use std::marker::PhantomData;

use tracing::debug;

use strata_tree::{sort_trees, DataChange, DataNode, DiffScope, LayeredTree, TreeError};
use strata_types::{Comparator, Depth, TreePath};

use crate::error::{CodecError, CodecResult};
use crate::flattener::DataFlattener;
use crate::format::{
    write_varint, ChecksumWriter, NodeTag, StreamKind, CHILDREN_ELIDED, CHILDREN_LISTED, MAGIC,
    VERSION,
};

/// Flattens trees, deltas and delta chains to a byte stream.
pub struct TreeWriter<T, F> {
    flattener: F,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Clone, F: DataFlattener<T>> TreeWriter<T, F> {
    pub fn new(flattener: F) -> Self {
        Self {
            flattener,
            _marker: PhantomData,
        }
    }

    /// Write the subtree of `tree` at `path`, at most `depth` levels deep.
    pub fn write_tree(&self, tree: &LayeredTree<T>, path: &TreePath, depth: Depth, out: &mut dyn Write) -> CodecResult<()> {
        let subtree = tree.copy_complete_subtree(path)?;
        let mut enc = Encoder::start(out, &self.flattener, StreamKind::Tree, path, depth)?;
        enc.complete_node(subtree.overlay(), path, Some(depth))?;
        enc.finish(StreamKind::Tree, path)
    }

    /// Write the changes that turn `base` into `other` at `path`, at most
    /// `depth` levels deep. Subtrees added by `other` are written whole.
    pub fn write_delta(
        &self,
        base: &LayeredTree<T>,
        other: &LayeredTree<T>,
        path: &TreePath,
        depth: Depth,
        out: &mut dyn Write,
        cmp: &dyn Comparator<T>,
    ) -> CodecResult<()> {
        let overlay = delta_overlay(base, other, path, cmp)?;
        let mut enc = Encoder::start(out, &self.flattener, StreamKind::Delta, path, depth)?;
        enc.overlay_node(overlay.as_ref(), path, depth)?;
        enc.finish(StreamKind::Delta, path)
    }

    /// Write a chain of snapshots of one lineage: the oldest as a tree, then
    /// each newer one as a delta on its predecessor. Duplicates are written
    /// once.
    pub fn write_delta_chain(
        &self,
        chain: &[LayeredTree<T>],
        path: &TreePath,
        depth: Depth,
        out: &mut dyn Write,
        cmp: &dyn Comparator<T>,
    ) -> CodecResult<()> {
        let mut sorted = sort_trees(chain).ok_or(TreeError::UnsortableChain)?;
        sorted.dedup_by(|a, b| a.ptr_eq(b));
        let Some((oldest, newer)) = sorted.split_first() else {
            return Err(TreeError::EmptyChain.into());
        };
        let first = oldest.copy_complete_subtree(path)?;

        let mut enc = Encoder::start(out, &self.flattener, StreamKind::Chain, path, depth)?;
        enc.varint(sorted.len() as u64)?;
        enc.complete_node(first.overlay(), path, Some(depth))?;
        let mut previous = oldest;
        for tree in newer {
            let overlay = delta_overlay(previous, tree, path, cmp)?;
            enc.overlay_node(overlay.as_ref(), path, depth)?;
            previous = tree;
        }
        enc.finish(StreamKind::Chain, path)
    }
}

/// The overlay node at `path` turning `base` into `other`; `None` when
/// nothing changed. The overlay is computed whole so the encoder can tell
/// which nodes have changes below a depth cutoff.
fn delta_overlay<T: Clone>(
    base: &LayeredTree<T>,
    other: &LayeredTree<T>,
    path: &TreePath,
    cmp: &dyn Comparator<T>,
) -> CodecResult<Option<DataNode<T>>> {
    // A scope that reappears under a vanished ancestor is written as a
    // plain addition.
    if !base.includes(path) {
        if !other.includes(path) {
            return Ok(None);
        }
        let added = other.copy_complete_subtree(path)?;
        return Ok(Some(added.overlay().clone()));
    }
    let scope = DiffScope::at(path.clone());
    let overlay = base.forward_overlay(other, cmp, &scope)?;
    Ok(overlay.filter(|node| !node.is_empty_delta()))
}

struct Encoder<'o, 'f, T, F> {
    out: ChecksumWriter<'o>,
    flattener: &'f F,
    _marker: PhantomData<fn(&T)>,
}

impl<'o, 'f, T, F: DataFlattener<T>> Encoder<'o, 'f, T, F> {
    fn start(
        out: &'o mut dyn Write,
        flattener: &'f F,
        kind: StreamKind,
        path: &TreePath,
        depth: Depth,
    ) -> CodecResult<Self> {
        let mut enc = Self {
            out: ChecksumWriter::new(out),
            flattener,
            _marker: PhantomData,
        };
        enc.out.write_all(MAGIC)?;
        enc.out.write_all(&VERSION.to_be_bytes())?;
        enc.byte(kind.type_byte())?;
        enc.varint(path.segment_count() as u64)?;
        for segment in path.segments() {
            enc.name(segment)?;
        }
        let depth = match depth {
            Depth::Unbounded => 0,
            Depth::Bounded(n) => u64::from(n) + 1,
        };
        enc.varint(depth)?;
        Ok(enc)
    }

    fn finish(self, kind: StreamKind, path: &TreePath) -> CodecResult<()> {
        let bytes = self.out.finish()?;
        debug!(%kind, scope = %path, bytes, "wrote stream");
        Ok(())
    }

    fn byte(&mut self, byte: u8) -> CodecResult<()> {
        self.out.write_all(&[byte])?;
        Ok(())
    }

    fn varint(&mut self, value: u64) -> CodecResult<()> {
        write_varint(&mut self.out, value)?;
        Ok(())
    }

    fn name(&mut self, name: &str) -> CodecResult<()> {
        self.varint(name.len() as u64)?;
        self.out.write_all(name.as_bytes())?;
        Ok(())
    }

    fn data(&mut self, path: &TreePath, data: &T) -> CodecResult<()> {
        self.flattener.write_data(path, data, &mut self.out)
    }

    /// Write a complete node. `depth` of `None` writes the whole subtree.
    fn complete_node(&mut self, node: &DataNode<T>, path: &TreePath, depth: Option<Depth>) -> CodecResult<()> {
        let DataNode::Complete { data, children } = node else {
            return Err(CodecError::corrupt(format!("expected a complete node at {path}")));
        };
        match data {
            Some(data) => {
                self.byte(NodeTag::CompleteWithData.type_byte())?;
                self.data(path, data)?;
            }
            None => self.byte(NodeTag::CompleteNoData.type_byte())?,
        }

        let child_depth = match depth {
            None => None,
            Some(depth) => match depth.child() {
                Some(child_depth) => Some(child_depth),
                None if !children.is_empty() => return self.byte(CHILDREN_ELIDED),
                None => Some(depth),
            },
        };
        self.byte(CHILDREN_LISTED)?;
        self.varint(children.len() as u64)?;
        for (name, child) in children {
            self.name(name)?;
            self.complete_node(child, &path.append(name), child_depth)?;
        }
        Ok(())
    }

    /// Write one entry of a delta overlay; `None` is an unchanged node.
    fn overlay_node(&mut self, node: Option<&DataNode<T>>, path: &TreePath, depth: Depth) -> CodecResult<()> {
        let (data, children) = match node {
            None => return self.byte(NodeTag::Unchanged.type_byte()),
            Some(DataNode::Deleted) => return self.byte(NodeTag::Deleted.type_byte()),
            Some(complete @ DataNode::Complete { .. }) => return self.complete_node(complete, path, None),
            Some(DataNode::Delta { data, children }) => (data, children),
        };
        match data {
            DataChange::Keep => self.byte(NodeTag::DeltaKeepData.type_byte())?,
            DataChange::Set(Some(data)) => {
                self.byte(NodeTag::DeltaWithData.type_byte())?;
                self.data(path, data)?;
            }
            DataChange::Set(None) => self.byte(NodeTag::DeltaNoData.type_byte())?,
        }

        let child_depth = match depth.child() {
            Some(child_depth) => child_depth,
            None if !children.is_empty() => return self.byte(CHILDREN_ELIDED),
            None => depth,
        };
        self.byte(CHILDREN_LISTED)?;
        self.varint(children.len() as u64)?;
        for (name, child) in children {
            self.name(name)?;
            self.overlay_node(Some(child), &path.append(name), child_depth)?;
        }
        Ok(())
    }
}
