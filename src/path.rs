//! Tree paths, cursors and sibling navigation.

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::node::{Node, NodeId, NodeStore};

/// Direction of a walk or a sibling hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

/// Whether a path may be used to mutate the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathMode {
    ReadOnly,
    Update,
}

/// Chain of node handles from a leaf up to the root.
///
/// `nodes[0]` is the leaf, the last entry is the root. The path remembers the
/// tree epoch it was built in; any edit or structural change bumps the epoch
/// and makes the path stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePath {
    nodes: SmallVec<[NodeId; 8]>,
    epoch: u64,
    mode: PathMode,
}

impl TreePath {
    pub(crate) fn from_leaf_first(nodes: SmallVec<[NodeId; 8]>, epoch: u64, mode: PathMode) -> Self {
        debug_assert!(!nodes.is_empty());
        Self { nodes, epoch, mode }
    }

    /// Build from a root-first list of handles.
    pub(crate) fn from_root_first(mut nodes: SmallVec<[NodeId; 8]>, epoch: u64, mode: PathMode) -> Self {
        nodes.reverse();
        Self::from_leaf_first(nodes, epoch, mode)
    }

    #[inline]
    pub fn leaf(&self) -> NodeId {
        self.nodes[0]
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    /// Number of levels, `1` when the root is a leaf.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Handle at `level` (`0` = leaf).
    pub fn node(&self, level: usize) -> Result<NodeId> {
        self.nodes
            .get(level)
            .copied()
            .ok_or_else(|| Error::structure(format!("path level {level} beyond root")))
    }

    /// Parent of the node at `level`.
    pub fn parent(&self, level: usize) -> Result<NodeId> {
        self.node(level + 1)
    }

    #[inline]
    pub fn is_root(&self, level: usize) -> bool {
        level + 1 == self.nodes.len()
    }

    /// Leaf-first handles.
    #[inline]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn mode(&self) -> PathMode {
        self.mode
    }

    /// Same leaf reached through the same ancestors.
    pub fn same_leaf(&self, other: &TreePath) -> bool {
        self.nodes == other.nodes
    }

    /// Index of the node at `level` among its parent's children.
    pub fn child_index<S: NodeStore>(&self, store: &S, level: usize) -> Result<usize> {
        let parent = store.get(self.parent(level)?)?.as_branch()?;
        parent.child_index(self.node(level)?)
    }

    /// Check every parent/child link of the path.
    pub fn validate<S: NodeStore>(&self, store: &S) -> Result<()> {
        store.get(self.leaf())?.as_leaf()?;
        for level in 0..self.nodes.len() - 1 {
            self.child_index(store, level)?;
        }
        Ok(())
    }
}

/// Position inside one stream of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    path: TreePath,
    stream: usize,
    /// Index inside the leaf stream.
    idx: u64,
    /// Absolute position in the stream.
    pos: u64,
}

impl Cursor {
    pub(crate) fn new(path: TreePath, stream: usize, idx: u64, pos: u64) -> Self {
        Self {
            path,
            stream,
            idx,
            pos,
        }
    }

    /// Same position, valid under `epoch`.
    pub(crate) fn restamp(mut self, epoch: u64) -> Self {
        self.path.epoch = epoch;
        self
    }

    #[inline]
    pub fn path(&self) -> &TreePath {
        &self.path
    }

    #[inline]
    pub fn stream(&self) -> usize {
        self.stream
    }

    #[inline]
    pub fn leaf_index(&self) -> u64 {
        self.idx
    }

    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    #[inline]
    pub fn leaf(&self) -> NodeId {
        self.path.leaf()
    }

    #[inline]
    pub fn mode(&self) -> PathMode {
        self.path.mode()
    }
}

// =============================================================================
// Sibling navigation
// =============================================================================

/// Path to the leaf after `path`'s leaf, or `None` at the last leaf.
pub fn next_sibling_leaf<S: NodeStore>(store: &S, path: &TreePath) -> Result<Option<TreePath>> {
    sibling_at(store, path, 0, Direction::Forward)
}

/// Path to the leaf before `path`'s leaf, or `None` at the first leaf.
pub fn previous_sibling_leaf<S: NodeStore>(store: &S, path: &TreePath) -> Result<Option<TreePath>> {
    sibling_at(store, path, 0, Direction::Backward)
}

/// Replace the node at `level` by its neighbour in `dir` and descend along
/// the near edge. Climbs one level when the node is the last child on that
/// side.
fn sibling_at<S: NodeStore>(
    store: &S,
    path: &TreePath,
    level: usize,
    dir: Direction,
) -> Result<Option<TreePath>> {
    if path.is_root(level) {
        return Ok(None);
    }
    let parent = store.get(path.parent(level)?)?.as_branch()?;
    let idx = parent.child_index(path.node(level)?)?;
    let sibling = match dir {
        Direction::Forward => (idx + 1 < parent.child_count()).then_some(idx + 1),
        Direction::Backward => idx.checked_sub(1),
    };

    let Some(sibling) = sibling else {
        return sibling_at(store, path, level + 1, dir);
    };
    let sibling = parent
        .child(sibling)
        .ok_or_else(|| Error::structure("sibling index out of bounds"))?;

    let mut descent = descend_edge(store, sibling, dir)?;
    if descent.len() != level + 1 {
        return Err(Error::structure(format!(
            "unbalanced tree: sibling subtree has depth {}, expected {}",
            descent.len(),
            level + 1
        )));
    }
    descent.reverse();
    descent.extend_from_slice(&path.nodes()[level + 1..]);
    Ok(Some(TreePath::from_leaf_first(descent, path.epoch(), path.mode())))
}

/// Handles from `from` down to a leaf, root-first, following the first
/// (forward) or last (backward) child.
pub(crate) fn descend_edge<S: NodeStore>(
    store: &S,
    from: NodeId,
    dir: Direction,
) -> Result<SmallVec<[NodeId; 8]>> {
    let mut out: SmallVec<[NodeId; 8]> = SmallVec::new();
    let mut id = from;
    loop {
        out.push(id);
        match store.get(id)? {
            Node::Leaf(_) => return Ok(out),
            Node::Branch(b) => {
                let next = match dir {
                    Direction::Forward => b.children().first(),
                    Direction::Backward => b.children().last(),
                };
                id = *next.ok_or_else(|| Error::structure("branch node without children"))?;
            }
        }
    }
}
