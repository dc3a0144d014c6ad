//! Tree nodes and the node allocator interface.

use smallvec::SmallVec;

use crate::block::PackedSequenceBlock;
use crate::branch::{AggregateRow, BranchAggregateNode};
use crate::config::{StreamKind, TreeConfig};
use crate::error::{Error, Result};
use crate::keys::KeyBlock;

// =============================================================================
// Node identity
// =============================================================================

/// Generation-checked handle into a [`NodeStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

// =============================================================================
// Leaf
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafStream {
    Symbols(PackedSequenceBlock),
    Keys(KeyBlock),
}

impl LeafStream {
    pub fn new(kind: StreamKind, config: &TreeConfig) -> Self {
        match kind {
            StreamKind::Symbols => LeafStream::Symbols(PackedSequenceBlock::new(config.leaf_block_bytes)),
            StreamKind::Keys(ordering) => {
                LeafStream::Keys(KeyBlock::new(ordering, config.leaf_key_capacity))
            }
        }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        match self {
            LeafStream::Symbols(block) => block.size(),
            LeafStream::Keys(keys) => keys.len() as u64,
        }
    }

    pub fn kind(&self) -> StreamKind {
        match self {
            LeafStream::Symbols(_) => StreamKind::Symbols,
            LeafStream::Keys(keys) => StreamKind::Keys(keys.ordering()),
        }
    }

    /// This stream's row in the parent's aggregate node.
    pub fn aggregate(&self) -> AggregateRow {
        match self {
            LeafStream::Symbols(block) => {
                let mut counts = [0u64; crate::run::SYMBOLS];
                block.ranks(&mut counts);
                let mut row = AggregateRow::new();
                row.push(block.size());
                row.extend_from_slice(&counts);
                row
            }
            LeafStream::Keys(keys) => AggregateRow::from_slice(&keys.aggregate()),
        }
    }

    /// Move `[at, size)` into a new stream of the same kind.
    pub fn split_off(&mut self, at: u64) -> LeafStream {
        match self {
            LeafStream::Symbols(block) => LeafStream::Symbols(block.split_off(at)),
            LeafStream::Keys(keys) => LeafStream::Keys(keys.split_off(at as usize)),
        }
    }

    pub fn check(&self) -> Result<()> {
        match self {
            LeafStream::Symbols(block) => block.check(),
            LeafStream::Keys(keys) => keys.check(),
        }
    }
}

/// Leaf node: one stream per [`StreamKind`] of the tree layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    streams: Vec<LeafStream>,
}

impl LeafNode {
    pub fn new(schema: &[StreamKind], config: &TreeConfig) -> Self {
        Self {
            streams: schema.iter().map(|&kind| LeafStream::new(kind, config)).collect(),
        }
    }

    pub fn from_streams(streams: Vec<LeafStream>) -> Self {
        Self { streams }
    }

    #[inline]
    pub fn streams(&self) -> &[LeafStream] {
        &self.streams
    }

    pub fn stream(&self, stream: usize) -> Result<&LeafStream> {
        self.streams.get(stream).ok_or(Error::NoSuchStream(stream))
    }

    pub fn stream_mut(&mut self, stream: usize) -> Result<&mut LeafStream> {
        self.streams.get_mut(stream).ok_or(Error::NoSuchStream(stream))
    }

    pub fn symbols(&self, stream: usize) -> Result<&PackedSequenceBlock> {
        match self.stream(stream)? {
            LeafStream::Symbols(block) => Ok(block),
            LeafStream::Keys(_) => Err(Error::StreamKind {
                stream,
                expected: "symbol",
            }),
        }
    }

    pub fn keys(&self, stream: usize) -> Result<&KeyBlock> {
        match self.stream(stream)? {
            LeafStream::Keys(keys) => Ok(keys),
            LeafStream::Symbols(_) => Err(Error::StreamKind {
                stream,
                expected: "key",
            }),
        }
    }

    #[inline]
    pub fn size(&self, stream: usize) -> Result<u64> {
        Ok(self.stream(stream)?.size())
    }

    pub fn is_empty(&self) -> bool {
        self.streams.iter().all(|s| s.size() == 0)
    }

    /// A leaf can be split when some stream holds at least two elements.
    pub fn can_split(&self) -> bool {
        self.streams.iter().any(|s| s.size() >= 2)
    }

    /// Split every stream at its own midpoint; the upper halves move to the
    /// returned leaf.
    pub fn split_half(&mut self) -> LeafNode {
        let streams = self
            .streams
            .iter_mut()
            .map(|s| {
                let mid = s.size() / 2;
                s.split_off(mid)
            })
            .collect();
        LeafNode { streams }
    }
}

// =============================================================================
// Branch
// =============================================================================

/// Branch node: children plus one aggregate table per stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNode {
    children: Vec<NodeId>,
    aggregates: Vec<BranchAggregateNode>,
}

impl BranchNode {
    pub fn new(schema: &[StreamKind]) -> Self {
        Self {
            children: Vec::new(),
            aggregates: schema.iter().map(|&k| BranchAggregateNode::new(k)).collect(),
        }
    }

    #[inline]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[inline]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    #[inline]
    pub fn child(&self, idx: usize) -> Option<NodeId> {
        self.children.get(idx).copied()
    }

    /// Position of `child` among this node's children.
    pub fn child_index(&self, child: NodeId) -> Result<usize> {
        self.children
            .iter()
            .position(|&c| c == child)
            .ok_or_else(|| Error::structure(format!("node {child:?} is not a child of its parent")))
    }

    pub fn aggregates(&self, stream: usize) -> Result<&BranchAggregateNode> {
        self.aggregates.get(stream).ok_or(Error::NoSuchStream(stream))
    }

    pub fn aggregates_mut(&mut self, stream: usize) -> Result<&mut BranchAggregateNode> {
        self.aggregates.get_mut(stream).ok_or(Error::NoSuchStream(stream))
    }

    #[inline]
    pub fn stream_count(&self) -> usize {
        self.aggregates.len()
    }

    /// Element count of `stream` under child `idx`.
    #[inline]
    pub fn child_size(&self, stream: usize, idx: usize) -> Result<u64> {
        self.aggregates(stream)?
            .aggregate_of(idx)
            .map(|row| row[0])
            .ok_or_else(|| Error::structure(format!("no child {idx} in branch of {}", self.child_count())))
    }

    /// Insert a child with one aggregate row per stream.
    pub fn insert_child(&mut self, idx: usize, child: NodeId, rows: &[AggregateRow]) {
        debug_assert_eq!(rows.len(), self.aggregates.len());
        self.children.insert(idx, child);
        for (agg, row) in self.aggregates.iter_mut().zip(rows) {
            agg.insert_row(idx, row);
        }
    }

    pub fn remove_child(&mut self, idx: usize) -> NodeId {
        for agg in &mut self.aggregates {
            agg.remove_row(idx);
        }
        self.children.remove(idx)
    }

    /// Replace every stream row of child `idx`.
    pub fn set_rows(&mut self, idx: usize, rows: &[AggregateRow]) {
        for (agg, row) in self.aggregates.iter_mut().zip(rows) {
            agg.set_aggregate(idx, row);
        }
    }

    /// Move children `[at, len)` into a new branch.
    pub fn split_off(&mut self, at: usize) -> BranchNode {
        BranchNode {
            children: self.children.split_off(at),
            aggregates: self.aggregates.iter_mut().map(|a| a.split_off(at)).collect(),
        }
    }

    pub fn append(&mut self, other: &mut BranchNode) {
        self.children.append(&mut other.children);
        for (mine, theirs) in self.aggregates.iter_mut().zip(other.aggregates.iter_mut()) {
            mine.append(theirs);
        }
    }

    /// Folded rows of all children, one per stream.
    pub fn totals(&self) -> SmallVec<[AggregateRow; 2]> {
        self.aggregates.iter().map(BranchAggregateNode::total).collect()
    }
}

// =============================================================================
// Node
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Branch(BranchNode),
    Leaf(LeafNode),
}

impl Node {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn as_branch(&self) -> Result<&BranchNode> {
        match self {
            Node::Branch(b) => Ok(b),
            Node::Leaf(_) => Err(Error::structure("expected a branch node, found a leaf")),
        }
    }

    pub fn as_branch_mut(&mut self) -> Result<&mut BranchNode> {
        match self {
            Node::Branch(b) => Ok(b),
            Node::Leaf(_) => Err(Error::structure("expected a branch node, found a leaf")),
        }
    }

    pub fn as_leaf(&self) -> Result<&LeafNode> {
        match self {
            Node::Leaf(l) => Ok(l),
            Node::Branch(_) => Err(Error::structure("expected a leaf node, found a branch")),
        }
    }

    pub fn as_leaf_mut(&mut self) -> Result<&mut LeafNode> {
        match self {
            Node::Leaf(l) => Ok(l),
            Node::Branch(_) => Err(Error::structure("expected a leaf node, found a branch")),
        }
    }

    /// Folded rows of this whole subtree, one per stream.
    pub fn totals(&self) -> SmallVec<[AggregateRow; 2]> {
        match self {
            Node::Branch(b) => b.totals(),
            Node::Leaf(l) => l.streams().iter().map(LeafStream::aggregate).collect(),
        }
    }

    /// Element count of `stream` in this subtree.
    pub fn size(&self, stream: usize) -> Result<u64> {
        match self {
            Node::Branch(b) => Ok(b.aggregates(stream)?.total()[0]),
            Node::Leaf(l) => l.size(stream),
        }
    }
}

// =============================================================================
// Node allocator
// =============================================================================

/// Allocator of tree nodes.
///
/// Handles are checked on every access; a released handle resolves to
/// [`Error::StalePath`].
pub trait NodeStore {
    fn get(&self, id: NodeId) -> Result<&Node>;
    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node>;
    fn allocate(&mut self, node: Node) -> NodeId;
    fn release(&mut self, id: NodeId) -> Result<Node>;
    fn live_nodes(&self) -> usize;
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// In-memory node store: a slot vector with a free list of released slots.
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    slots: Vec<Slot>,
    /// Indices of released slots, reused LIFO.
    free: Vec<u32>,
    live: usize,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocated slot count, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn shrink_to_fit(&mut self) {
        self.slots.shrink_to_fit();
        self.free.shrink_to_fit();
    }

    #[inline]
    fn slot(&self, id: NodeId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
    }
}

impl NodeStore for NodeArena {
    fn get(&self, id: NodeId) -> Result<&Node> {
        self.slot(id).and_then(|s| s.node.as_ref()).ok_or(Error::StalePath)
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
            .ok_or(Error::StalePath)
    }

    fn allocate(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    fn release(&mut self, id: NodeId) -> Result<Node> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .ok_or(Error::StalePath)?;
        let node = slot.node.take().ok_or(Error::StalePath)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(node)
    }

    fn live_nodes(&self) -> usize {
        self.live
    }
}
