use std::collections::BTreeMap;
use std::io::Read;
use std::marker::PhantomData;

use tracing::debug;

use strata_tree::{DataChange, DataNode, LayeredTree, TreeError};
use strata_types::{validate_segment, Depth, TreePath};

use crate::config::CodecConfig;
use crate::error::{CodecError, CodecResult};
use crate::flattener::DataFlattener;
use crate::format::{
    read_exact, read_varint, ChecksumReader, NodeTag, StreamKind, CHILDREN_ELIDED, CHILDREN_LISTED,
    MAGIC, VERSION,
};

/// What a depth-bounded stream left out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frontier {
    /// Path of the subtree the stream holds.
    pub scope: TreePath,
    /// Depth bound the stream was written with.
    pub depth: Depth,
    /// Paths whose children were cut off by the depth bound.
    pub elided: Vec<TreePath>,
}

impl Frontier {
    /// Returns `true` if nothing was cut off.
    pub fn is_whole(&self) -> bool {
        self.elided.is_empty()
    }
}

/// Rebuilds trees, deltas and delta chains from a byte stream.
///
/// Every returned tree is frozen. Trees read from a scoped stream hold the
/// scope's ancestors without data.
pub struct TreeReader<T, F> {
    flattener: F,
    config: CodecConfig,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Clone, F: DataFlattener<T>> TreeReader<T, F> {
    pub fn new(flattener: F) -> Self {
        Self::with_config(flattener, CodecConfig::default())
    }

    pub fn with_config(flattener: F, config: CodecConfig) -> Self {
        Self {
            flattener,
            config,
            _marker: PhantomData,
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn read_tree(&self, input: &mut dyn Read) -> CodecResult<LayeredTree<T>> {
        self.read_tree_frontier(input).map(|(tree, _)| tree)
    }

    /// Read a tree stream and report which paths the depth bound cut off.
    pub fn read_tree_frontier(&self, input: &mut dyn Read) -> CodecResult<(LayeredTree<T>, Frontier)> {
        let mut dec = Decoder::start(input, self, StreamKind::Tree)?;
        let scope = dec.frontier.scope.clone();
        let node = dec.complete_node(&scope, 0)?;
        let tree = complete_tree(&scope, node)?;
        let frontier = dec.finish()?;
        Ok((tree, frontier))
    }

    /// Read a delta stream and apply it on top of `base`, which must be
    /// frozen.
    pub fn read_delta(&self, base: &LayeredTree<T>, input: &mut dyn Read) -> CodecResult<LayeredTree<T>> {
        self.read_delta_frontier(base, input).map(|(tree, _)| tree)
    }

    /// Like [`read_delta`](Self::read_delta), also reporting the paths whose
    /// changes the depth bound cut off. Below those paths the result shows
    /// `base` unchanged.
    pub fn read_delta_frontier(&self, base: &LayeredTree<T>, input: &mut dyn Read) -> CodecResult<(LayeredTree<T>, Frontier)> {
        if !base.is_immutable() {
            return Err(TreeError::NotFrozen.into());
        }
        let mut dec = Decoder::start(input, self, StreamKind::Delta)?;
        let scope = dec.frontier.scope.clone();
        let node = dec.overlay_node(base, &scope, true, 0)?;
        let tree = delta_tree(base, &scope, node)?;
        let frontier = dec.finish()?;
        Ok((tree, frontier))
    }

    /// Read a delta chain stream. The result is oldest first; each tree after
    /// the first is a delta on its predecessor.
    pub fn read_delta_chain(&self, input: &mut dyn Read) -> CodecResult<Vec<LayeredTree<T>>> {
        let members = self.read_delta_chain_frontier(input)?;
        Ok(members.into_iter().map(|(tree, _)| tree).collect())
    }

    /// Like [`read_delta_chain`](Self::read_delta_chain), pairing every
    /// member with the frontier of its own entry in the stream.
    pub fn read_delta_chain_frontier(&self, input: &mut dyn Read) -> CodecResult<Vec<(LayeredTree<T>, Frontier)>> {
        let mut dec = Decoder::start(input, self, StreamKind::Chain)?;
        let scope = dec.frontier.scope.clone();
        let count = dec.varint()?;
        if count == 0 {
            return Err(CodecError::corrupt("empty delta chain"));
        }
        if count > self.config.max_chain_len as u64 {
            return Err(CodecError::corrupt(format!(
                "chain of {count} trees exceeds limit of {}",
                self.config.max_chain_len
            )));
        }

        let first = dec.complete_node(&scope, 0)?;
        let mut chain = vec![(complete_tree(&scope, first)?, dec.take_frontier())];
        for _ in 1..count {
            let previous = &chain[chain.len() - 1].0;
            let node = dec.overlay_node(previous, &scope, true, 0)?;
            let tree = delta_tree(previous, &scope, node)?;
            chain.push((tree, dec.take_frontier()));
        }
        dec.finish()?;
        Ok(chain)
    }
}

/// Wrap `node` in data-less ancestors up to the root and freeze the result.
fn complete_tree<T: Clone>(scope: &TreePath, node: DataNode<T>) -> CodecResult<LayeredTree<T>> {
    let mut root = node;
    for name in scope.segments().iter().rev() {
        let mut children = BTreeMap::new();
        children.insert(name.clone(), root);
        root = DataNode::Complete {
            data: None,
            children,
        };
    }
    let mut tree = LayeredTree::complete_from(root)?;
    tree.freeze()?;
    Ok(tree)
}

/// Wrap an overlay entry in unchanged delta ancestors and freeze it on
/// top of `base`. `None` yields an empty delta.
fn delta_tree<T: Clone>(base: &LayeredTree<T>, scope: &TreePath, node: Option<DataNode<T>>) -> CodecResult<LayeredTree<T>> {
    let mut root = match node {
        None => DataNode::empty_delta(),
        Some(DataNode::Deleted) if scope.is_root() => {
            return Err(CodecError::corrupt("delta deletes the root"));
        }
        Some(node) => node,
    };
    if !scope.is_root() && !root.is_empty_delta() {
        for name in scope.segments().iter().rev() {
            let mut children = BTreeMap::new();
            children.insert(name.clone(), root);
            root = DataNode::Delta {
                data: DataChange::Keep,
                children,
            };
        }
    }
    let mut tree = LayeredTree::delta_from(base, root)?;
    tree.freeze()?;
    Ok(tree)
}

struct Decoder<'i, 'r, T, F> {
    input: ChecksumReader<'i>,
    flattener: &'r F,
    config: &'r CodecConfig,
    frontier: Frontier,
    _marker: PhantomData<fn() -> T>,
}

impl<'i, 'r, T, F: DataFlattener<T>> Decoder<'i, 'r, T, F> {
    fn start(input: &'i mut dyn Read, reader: &'r TreeReader<T, F>, expected: StreamKind) -> CodecResult<Self> {
        let mut dec = Self {
            input: ChecksumReader::new(input),
            flattener: &reader.flattener,
            config: &reader.config,
            frontier: Frontier::default(),
            _marker: PhantomData,
        };

        let mut magic = [0u8; 4];
        read_exact(&mut dec.input, &mut magic)?;
        if &magic != MAGIC {
            return Err(CodecError::InvalidMagic {
                expected: String::from_utf8_lossy(MAGIC).into(),
                actual: String::from_utf8_lossy(&magic).into(),
            });
        }
        let mut version = [0u8; 4];
        read_exact(&mut dec.input, &mut version)?;
        let version = u32::from_be_bytes(version);
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let kind = dec.byte()?;
        if StreamKind::from_type_byte(kind) != Some(expected) {
            return Err(CodecError::UnexpectedKind {
                expected,
                actual: kind,
            });
        }

        let segments = dec.varint()?;
        let mut scope = TreePath::root();
        for _ in 0..segments {
            let name = dec.name()?;
            scope = scope.append(&name);
        }
        let depth = match dec.varint()? {
            0 => Depth::Unbounded,
            n => Depth::Bounded(
                u32::try_from(n - 1).map_err(|_| CodecError::corrupt("depth out of range"))?,
            ),
        };
        dec.frontier.scope = scope;
        dec.frontier.depth = depth;
        Ok(dec)
    }

    fn finish(self) -> CodecResult<Frontier> {
        self.input.finish(self.config.verify_checksum)?;
        debug!(
            scope = %self.frontier.scope,
            depth = %self.frontier.depth,
            elided = self.frontier.elided.len(),
            "read stream"
        );
        Ok(self.frontier)
    }

    /// The frontier recorded so far, leaving an empty one for what follows.
    fn take_frontier(&mut self) -> Frontier {
        Frontier {
            scope: self.frontier.scope.clone(),
            depth: self.frontier.depth,
            elided: std::mem::take(&mut self.frontier.elided),
        }
    }

    fn byte(&mut self) -> CodecResult<u8> {
        let mut byte = [0u8; 1];
        read_exact(&mut self.input, &mut byte)?;
        Ok(byte[0])
    }

    fn varint(&mut self) -> CodecResult<u64> {
        read_varint(&mut self.input)
    }

    fn name(&mut self) -> CodecResult<String> {
        let len = self.varint()?;
        if len > self.config.max_name_len as u64 {
            return Err(CodecError::corrupt(format!("name of {len} bytes exceeds limit")));
        }
        let mut bytes = vec![0u8; len as usize];
        read_exact(&mut self.input, &mut bytes)?;
        let name = String::from_utf8(bytes).map_err(|_| CodecError::corrupt("name is not valid UTF-8"))?;
        validate_segment(&name).map_err(|e| CodecError::corrupt(e.to_string()))?;
        Ok(name)
    }

    fn tag(&mut self) -> CodecResult<NodeTag> {
        let byte = self.byte()?;
        NodeTag::from_type_byte(byte).ok_or_else(|| CodecError::corrupt(format!("unknown node tag {byte}")))
    }

    fn data(&mut self, tag: NodeTag, path: &TreePath) -> CodecResult<Option<T>> {
        if tag.has_data() {
            self.flattener.read_data(path, &mut self.input).map(Some)
        } else {
            Ok(None)
        }
    }

    fn check_nesting(&self, nesting: usize) -> CodecResult<()> {
        if nesting > self.config.max_nesting {
            return Err(CodecError::corrupt("nodes nested deeper than the configured limit"));
        }
        Ok(())
    }

    /// Read a children section. Returns `None` when the children were elided,
    /// otherwise the names in order, each followed by its node.
    fn children<N>(
        &mut self,
        path: &TreePath,
        mut read_child: impl FnMut(&mut Self, &TreePath) -> CodecResult<Option<N>>,
    ) -> CodecResult<BTreeMap<String, N>> {
        let mut children = BTreeMap::new();
        match self.byte()? {
            CHILDREN_LISTED => {}
            CHILDREN_ELIDED => {
                self.frontier.elided.push(path.clone());
                return Ok(children);
            }
            other => return Err(CodecError::corrupt(format!("unknown children marker {other}"))),
        }
        let count = self.varint()?;
        let mut last: Option<String> = None;
        for _ in 0..count {
            let name = self.name()?;
            if last.as_deref().is_some_and(|last| last >= name.as_str()) {
                return Err(CodecError::corrupt(format!("children of {path} out of order")));
            }
            let child_path = path.append(&name);
            if let Some(child) = read_child(self, &child_path)? {
                children.insert(name.clone(), child);
            }
            last = Some(name);
        }
        Ok(children)
    }

    fn complete_node(&mut self, path: &TreePath, nesting: usize) -> CodecResult<DataNode<T>> {
        self.check_nesting(nesting)?;
        let tag = self.tag()?;
        if !tag.is_complete() {
            return Err(CodecError::corrupt(format!("expected a complete node at {path}")));
        }
        let data = self.data(tag, path)?;
        let children = self.children(path, |dec, child| dec.complete_node(child, nesting + 1).map(Some))?;
        Ok(DataNode::Complete { data, children })
    }

    /// Read one entry of a delta overlay against `base`. `None` means the
    /// node is unchanged.
    fn overlay_node(
        &mut self,
        base: &LayeredTree<T>,
        path: &TreePath,
        is_scope: bool,
        nesting: usize,
    ) -> CodecResult<Option<DataNode<T>>> {
        self.check_nesting(nesting)?;
        let tag = self.tag()?;
        match tag {
            NodeTag::Unchanged if is_scope => return Ok(None),
            NodeTag::Unchanged => {
                return Err(CodecError::corrupt(format!("unchanged marker below the scope at {path}")));
            }
            NodeTag::CompleteWithData | NodeTag::CompleteNoData => {
                if is_scope {
                    if let Some(parent) = path.parent() {
                        if !base.includes(&parent) {
                            return Err(TreeError::NotFound(parent).into());
                        }
                    }
                }
                let data = self.data(tag, path)?;
                let children =
                    self.children(path, |dec, child| dec.complete_node(child, nesting + 1).map(Some))?;
                return Ok(Some(DataNode::Complete { data, children }));
            }
            _ => {}
        }

        if !base.includes(path) {
            return Err(CodecError::corrupt(format!("delta entry for {path}, which the base lacks")));
        }
        if tag == NodeTag::Deleted {
            return Ok(Some(DataNode::Deleted));
        }
        let data = match tag {
            NodeTag::DeltaWithData => DataChange::Set(self.data(tag, path)?),
            NodeTag::DeltaNoData => DataChange::Set(None),
            _ => DataChange::Keep,
        };
        let children = self.children(path, |dec, child| dec.overlay_node(base, child, false, nesting + 1))?;
        Ok(Some(DataNode::Delta { data, children }))
    }
}
