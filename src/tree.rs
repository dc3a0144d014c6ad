//! The indexed tree: entry points for walks and mutations.

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::branch::{AggregateOrdering, AggregateRow};
use crate::config::{StreamKind, TreeConfig};
use crate::error::{CapacityExceeded, Error, Result};
use crate::node::{BranchNode, LeafNode, LeafStream, Node, NodeArena, NodeId, NodeStore};
use crate::path::{self, Cursor, Direction, PathMode, TreePath};
use crate::shuttle::{
    self, FindShuttle, RankShuttle, SelectShuttle, Shuttle, SkipShuttle, WalkOutcome,
};

type Rows = SmallVec<[AggregateRow; 2]>;

/// A key located by [`IndexedTree::find`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMatch {
    pub cursor: Cursor,
    pub key: u64,
    /// Sum of all keys before the match on a Sum stream, `0` on a Max stream.
    pub prefix: u64,
}

/// One in-leaf edit, applied with split-and-retry.
#[derive(Debug, Clone, Copy)]
enum Edit<'a> {
    InsertSymbols { len: u64, symbol: u8 },
    RemoveSymbols { len: u64 },
    InsertKeys(&'a [u64]),
    RemoveKeys { len: u64 },
}

impl Edit<'_> {
    fn apply(
        &self,
        target: &mut LeafStream,
        stream: usize,
        at: u64,
    ) -> Result<std::result::Result<u64, CapacityExceeded>> {
        match (self, target) {
            (Edit::InsertSymbols { len, symbol }, LeafStream::Symbols(block)) => {
                Ok(block.insert_symbols(at, *len, *symbol).map(|()| *len))
            }
            // Removals are clamped to the leaf, which may have been split
            // since the edit was sized.
            (Edit::RemoveSymbols { len }, LeafStream::Symbols(block)) => {
                let n = (*len).min(block.size().saturating_sub(at));
                Ok(block.remove_symbols(at, n).map(|()| n))
            }
            (Edit::InsertKeys(keys), LeafStream::Keys(block)) => {
                Ok(block.insert(at as usize, keys).map(|()| keys.len() as u64))
            }
            (Edit::RemoveKeys { len }, LeafStream::Keys(block)) => {
                let n = (*len).min((block.len() as u64).saturating_sub(at));
                block.remove(at as usize, n as usize);
                Ok(Ok(n))
            }
            (Edit::InsertSymbols { .. } | Edit::RemoveSymbols { .. }, _) => Err(Error::StreamKind {
                stream,
                expected: "symbol",
            }),
            (Edit::InsertKeys(_) | Edit::RemoveKeys { .. }, _) => Err(Error::StreamKind {
                stream,
                expected: "key",
            }),
        }
    }
}

/// Balanced tree of multi-stream leaves with per-stream branch aggregates.
///
/// Leaves sit at equal depth. Every branch row holds the folded aggregate of
/// its child's subtree, so walks never touch leaves outside their path.
pub struct IndexedTree<S: NodeStore = NodeArena> {
    store: S,
    root: NodeId,
    schema: Vec<StreamKind>,
    config: TreeConfig,
    /// Bumped on every edit, split, merge and root change.
    epoch: u64,
    /// Number of levels, `1` when the root is a leaf.
    height: usize,
}

impl IndexedTree<NodeArena> {
    /// Empty tree over an in-memory arena.
    pub fn new(schema: Vec<StreamKind>, config: TreeConfig) -> Result<Self> {
        Self::with_store(NodeArena::new(), schema, config)
    }

    /// Balanced tree over `leaves`, in order.
    pub fn from_leaves(schema: Vec<StreamKind>, config: TreeConfig, leaves: Vec<LeafNode>) -> Result<Self> {
        Self::with_store_from_leaves(NodeArena::new(), schema, config, leaves)
    }
}

impl<S: NodeStore> IndexedTree<S> {
    pub fn with_store(store: S, schema: Vec<StreamKind>, config: TreeConfig) -> Result<Self> {
        Self::with_store_from_leaves(store, schema, config, Vec::new())
    }

    /// Bulk build: leaves are grouped bottom-up into branches of at most
    /// `branch_fanout` children, spread evenly across each level.
    pub fn with_store_from_leaves(
        mut store: S,
        schema: Vec<StreamKind>,
        config: TreeConfig,
        leaves: Vec<LeafNode>,
    ) -> Result<Self> {
        config.validate()?;
        if schema.is_empty() {
            return Err(Error::InvalidConfig("leaf layout needs at least one stream".to_string()));
        }
        for (i, leaf) in leaves.iter().enumerate() {
            let kinds = leaf.streams().iter().map(LeafStream::kind);
            if leaf.streams().len() != schema.len() || !kinds.eq(schema.iter().copied()) {
                return Err(Error::InvalidConfig(format!("leaf {i} does not match the leaf layout")));
            }
        }

        let mut level: Vec<NodeId> = if leaves.is_empty() {
            vec![store.allocate(Node::Leaf(LeafNode::new(&schema, &config)))]
        } else {
            leaves.into_iter().map(|l| store.allocate(Node::Leaf(l))).collect()
        };

        let mut height = 1;
        while level.len() > 1 {
            let groups = level.len().div_ceil(config.branch_fanout);
            let base = level.len() / groups;
            let extra = level.len() % groups;
            let mut ids = level.into_iter();
            let mut next = Vec::with_capacity(groups);
            for g in 0..groups {
                let mut branch = BranchNode::new(&schema);
                for (i, id) in ids.by_ref().take(base + usize::from(g < extra)).enumerate() {
                    let rows = store.get(id)?.totals();
                    branch.insert_child(i, id, &rows);
                }
                next.push(store.allocate(Node::Branch(branch)));
            }
            level = next;
            height += 1;
        }
        debug!(height, nodes = store.live_nodes(), "tree built");

        Ok(Self {
            store,
            root: level[0],
            schema,
            config,
            epoch: 0,
            height,
        })
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    #[inline]
    pub fn schema(&self) -> &[StreamKind] {
        &self.schema
    }

    #[inline]
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Element count of `stream`.
    pub fn size(&self, stream: usize) -> Result<u64> {
        self.stream_kind(stream)?;
        self.store.get(self.root)?.size(stream)
    }

    fn stream_kind(&self, stream: usize) -> Result<StreamKind> {
        self.schema.get(stream).copied().ok_or(Error::NoSuchStream(stream))
    }

    fn require_symbols(&self, stream: usize) -> Result<()> {
        match self.stream_kind(stream)? {
            StreamKind::Symbols => Ok(()),
            StreamKind::Keys(_) => Err(Error::StreamKind {
                stream,
                expected: "symbol",
            }),
        }
    }

    fn require_keys(&self, stream: usize) -> Result<AggregateOrdering> {
        match self.stream_kind(stream)? {
            StreamKind::Keys(ordering) => Ok(ordering),
            StreamKind::Symbols => Err(Error::StreamKind {
                stream,
                expected: "key",
            }),
        }
    }

    /// Reject paths built before the last edit or structural change.
    pub fn check_path(&self, path: &TreePath) -> Result<()> {
        if path.epoch() != self.epoch || path.root() != self.root {
            warn!(path_epoch = path.epoch(), epoch = self.epoch, "stale path rejected");
            return Err(Error::StalePath);
        }
        Ok(())
    }

    // =========================================================================
    // Seeking
    // =========================================================================

    /// Read-only cursor at `pos`. `pos == size` yields the end cursor.
    pub fn seek(&self, stream: usize, pos: u64) -> Result<Cursor> {
        self.seek_with_mode(stream, pos, PathMode::ReadOnly)
    }

    /// Like [`seek`](Self::seek), but the cursor may be used for mutations.
    pub fn seek_mut(&self, stream: usize, pos: u64) -> Result<Cursor> {
        self.seek_with_mode(stream, pos, PathMode::Update)
    }

    fn seek_with_mode(&self, stream: usize, pos: u64, mode: PathMode) -> Result<Cursor> {
        let size = self.size(stream)?;
        if pos > size {
            return Err(Error::OutOfRange { pos, size });
        }
        if pos == size {
            return self.seek_end_with_mode(stream, mode);
        }
        let mut shuttle = SkipShuttle::forward(stream, pos);
        let outcome = shuttle::descend(&self.store, self.root, self.epoch, mode, &mut shuttle)?;
        self.cursor_from(outcome, stream, pos)
    }

    /// Cursor past the last element of `stream`, in the rightmost leaf.
    pub fn seek_end(&self, stream: usize) -> Result<Cursor> {
        self.seek_end_with_mode(stream, PathMode::ReadOnly)
    }

    fn seek_end_with_mode(&self, stream: usize, mode: PathMode) -> Result<Cursor> {
        let size = self.size(stream)?;
        let nodes = path::descend_edge(&self.store, self.root, Direction::Backward)?;
        let path = TreePath::from_root_first(nodes, self.epoch, mode);
        let idx = self.store.get(path.leaf())?.as_leaf()?.size(stream)?;
        Ok(Cursor::new(path, stream, idx, size))
    }

    fn cursor_from(&self, outcome: WalkOutcome, stream: usize, pos: u64) -> Result<Cursor> {
        match outcome {
            WalkOutcome::Found { path, idx } => Ok(Cursor::new(path, stream, idx, pos)),
            WalkOutcome::NotFound | WalkOutcome::Empty => Err(Error::structure(format!(
                "position {pos} not reachable although within the stream"
            ))),
        }
    }

    /// Re-seek a cursor from its last known position. A cursor past the
    /// current end is clamped to the end.
    pub fn refresh(&self, cursor: &Cursor) -> Result<Cursor> {
        let pos = cursor.pos().min(self.size(cursor.stream())?);
        self.seek_with_mode(cursor.stream(), pos, cursor.mode())
    }

    /// Skip `n` positions forward. Landing exactly on the end yields the end
    /// cursor.
    pub fn skip_forward(&self, cursor: &Cursor, n: u64) -> Result<Cursor> {
        self.check_path(cursor.path())?;
        let stream = cursor.stream();
        let size = self.size(stream)?;
        let target = cursor.pos().saturating_add(n);
        if target > size {
            return Err(Error::OutOfRange { pos: target, size });
        }
        if target == size {
            return self.seek_end_with_mode(stream, cursor.mode());
        }
        let mut shuttle = SkipShuttle::forward(stream, n);
        let outcome = shuttle::walk_from(&self.store, cursor, &mut shuttle)?;
        self.cursor_from(outcome, stream, shuttle.target().unwrap_or(target))
    }

    /// Skip `n` positions backward. Fails with [`Error::OutOfRange`] when
    /// `n` exceeds the cursor position.
    pub fn skip_backward(&self, cursor: &Cursor, n: u64) -> Result<Cursor> {
        self.check_path(cursor.path())?;
        let stream = cursor.stream();
        if n == 0 {
            return Ok(cursor.clone());
        }
        let Some(target) = cursor.pos().checked_sub(n) else {
            return Err(Error::OutOfRange {
                pos: n,
                size: cursor.pos(),
            });
        };
        let mut shuttle = SkipShuttle::backward(stream, n);
        let outcome = shuttle::walk_from(&self.store, cursor, &mut shuttle)?;
        self.cursor_from(outcome, stream, shuttle.target().unwrap_or(target))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Locate `target` in a key stream. `None` when it exceeds the stream's
    /// total (Sum) or maximum (Max).
    pub fn find(&self, stream: usize, target: u64) -> Result<Option<KeyMatch>> {
        let ordering = self.require_keys(stream)?;
        let mut shuttle = FindShuttle::new(stream, ordering, target);
        match shuttle::descend(&self.store, self.root, self.epoch, PathMode::ReadOnly, &mut shuttle)? {
            WalkOutcome::Found { path, idx } => {
                let key = self
                    .store
                    .get(path.leaf())?
                    .as_leaf()?
                    .keys(stream)?
                    .get(idx as usize)
                    .ok_or_else(|| Error::structure("find landed outside its leaf"))?;
                Ok(Some(KeyMatch {
                    cursor: Cursor::new(path, stream, idx, shuttle.position()),
                    key,
                    prefix: shuttle.prefix(),
                }))
            }
            WalkOutcome::NotFound | WalkOutcome::Empty => Ok(None),
        }
    }

    /// Occurrences of `symbol` in `[0, pos)` of a symbol stream.
    pub fn rank(&self, stream: usize, pos: u64, symbol: u8) -> Result<u64> {
        self.require_symbols(stream)?;
        let size = self.size(stream)?;
        if pos > size {
            return Err(Error::OutOfRange { pos, size });
        }
        if pos == size {
            return Ok(self.store.get(self.root)?.totals()[stream][1 + usize::from(symbol & 1)]);
        }
        let mut shuttle = RankShuttle::new(stream, pos, symbol);
        match shuttle::descend(&self.store, self.root, self.epoch, PathMode::ReadOnly, &mut shuttle)? {
            WalkOutcome::Found { .. } => Ok(shuttle.rank()),
            _ => Err(Error::structure(format!("rank walk to {pos} found no leaf"))),
        }
    }

    /// Rank of `symbol` before the cursor, rebuilt from the cursor's path.
    pub fn rank_at(&self, cursor: &Cursor, symbol: u8) -> Result<u64> {
        self.check_path(cursor.path())?;
        self.require_symbols(cursor.stream())?;
        let mut shuttle = RankShuttle::new(cursor.stream(), cursor.leaf_index(), symbol);
        let leaf = self.store.get(cursor.leaf())?.as_leaf()?;
        shuttle.leaf_visit(leaf, 0)?;
        shuttle::accumulate_prefix(&self.store, cursor.path(), &mut shuttle)?;
        Ok(shuttle.rank())
    }

    /// Absolute position of leaf index `idx` on `path`.
    pub fn position_of(&self, path: &TreePath, stream: usize, idx: u64) -> Result<u64> {
        self.check_path(path)?;
        self.stream_kind(stream)?;
        let mut pos = idx;
        for level in 1..path.len() {
            let branch = self.store.get(path.node(level)?)?.as_branch()?;
            let child = branch.child_index(path.node(level - 1)?)?;
            pos += branch.aggregates(stream)?.fold_range(0, child)[0];
        }
        Ok(pos)
    }

    /// Cursor at the `rank`-th (zero-based) `symbol`, or `None`.
    pub fn select_forward(&self, stream: usize, rank: u64, symbol: u8) -> Result<Option<Cursor>> {
        self.require_symbols(stream)?;
        let mut shuttle = SelectShuttle::new(stream, rank, symbol);
        match shuttle::descend(&self.store, self.root, self.epoch, PathMode::ReadOnly, &mut shuttle)? {
            WalkOutcome::Found { path, idx } => Ok(Some(Cursor::new(path, stream, idx, shuttle.position()))),
            WalkOutcome::NotFound | WalkOutcome::Empty => Ok(None),
        }
    }

    /// Symbol under the cursor, `None` at the end of its leaf.
    pub fn symbol_at(&self, cursor: &Cursor) -> Result<Option<u8>> {
        self.check_path(cursor.path())?;
        let leaf = self.store.get(cursor.leaf())?.as_leaf()?;
        Ok(leaf.symbols(cursor.stream())?.symbol(cursor.leaf_index()))
    }

    /// Key under the cursor, `None` at the end of its leaf.
    pub fn key_at(&self, cursor: &Cursor) -> Result<Option<u64>> {
        self.check_path(cursor.path())?;
        let leaf = self.store.get(cursor.leaf())?.as_leaf()?;
        Ok(leaf.keys(cursor.stream())?.get(cursor.leaf_index() as usize))
    }

    // =========================================================================
    // Sibling navigation
    // =========================================================================

    pub fn next_sibling_leaf(&self, path: &TreePath) -> Result<Option<TreePath>> {
        self.check_path(path)?;
        path::next_sibling_leaf(&self.store, path)
    }

    pub fn previous_sibling_leaf(&self, path: &TreePath) -> Result<Option<TreePath>> {
        self.check_path(path)?;
        path::previous_sibling_leaf(&self.store, path)
    }

    /// Path to the leftmost leaf.
    pub fn first_leaf(&self) -> Result<TreePath> {
        let nodes = path::descend_edge(&self.store, self.root, Direction::Forward)?;
        Ok(TreePath::from_root_first(nodes, self.epoch, PathMode::ReadOnly))
    }

    /// Leaf node behind a path.
    pub fn leaf(&self, path: &TreePath) -> Result<&LeafNode> {
        self.check_path(path)?;
        self.store.get(path.leaf())?.as_leaf()
    }

    /// All symbols of `stream`, leaf by leaf.
    pub fn symbols(&self, stream: usize) -> Result<Symbols<'_, S>> {
        self.require_symbols(stream)?;
        let first = self.first_leaf()?;
        let buf = self.leaf_symbols(first.leaf(), stream)?;
        Ok(Symbols {
            tree: self,
            stream,
            path: Some(first),
            buf: buf.into_iter(),
        })
    }

    fn leaf_symbols(&self, leaf: NodeId, stream: usize) -> Result<Vec<u8>> {
        Ok(self.store.get(leaf)?.as_leaf()?.symbols(stream)?.iter().collect())
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Insert `len` copies of `symbol` before `pos`.
    pub fn insert_symbols(&mut self, stream: usize, pos: u64, len: u64, symbol: u8) -> Result<()> {
        self.require_symbols(stream)?;
        let cursor = self.seek_mut(stream, pos)?;
        self.insert_symbols_at(&cursor, len, symbol)?;
        Ok(())
    }

    /// Insert before the cursor. Returns a cursor on the first inserted
    /// symbol.
    pub fn insert_symbols_at(&mut self, cursor: &Cursor, len: u64, symbol: u8) -> Result<Cursor> {
        self.require_symbols(cursor.stream())?;
        if len == 0 {
            return Ok(cursor.clone());
        }
        let (cursor, _) = self.mutate_at(cursor, Edit::InsertSymbols { len, symbol })?;
        Ok(cursor)
    }

    /// Remove `[pos, pos + len)`, possibly spanning several leaves.
    pub fn remove_symbols(&mut self, stream: usize, pos: u64, len: u64) -> Result<()> {
        self.require_symbols(stream)?;
        self.remove_range(stream, pos, len, |n| Edit::RemoveSymbols { len: n })
    }

    /// Insert keys before `pos`. On a Max stream the keys must keep the
    /// stream non-decreasing.
    pub fn insert_keys(&mut self, stream: usize, pos: u64, keys: &[u64]) -> Result<()> {
        let ordering = self.require_keys(stream)?;
        let size = self.size(stream)?;
        if pos > size {
            return Err(Error::OutOfRange { pos, size });
        }
        if ordering == AggregateOrdering::Max {
            self.check_key_order(stream, pos, keys)?;
        }
        for (i, key) in keys.iter().enumerate() {
            let cursor = self.seek_mut(stream, pos + i as u64)?;
            self.mutate_at(&cursor, Edit::InsertKeys(std::slice::from_ref(key)))?;
        }
        Ok(())
    }

    /// Insert into a Max stream at the lower bound of `key`. Returns the
    /// position used.
    pub fn insert_sorted(&mut self, stream: usize, key: u64) -> Result<u64> {
        if self.require_keys(stream)? != AggregateOrdering::Max {
            return Err(Error::StreamKind {
                stream,
                expected: "max-ordered key",
            });
        }
        let pos = match self.find(stream, key)? {
            Some(found) => found.cursor.pos(),
            None => self.size(stream)?,
        };
        let cursor = self.seek_mut(stream, pos)?;
        self.mutate_at(&cursor, Edit::InsertKeys(&[key]))?;
        Ok(pos)
    }

    /// Remove `[pos, pos + len)` from a key stream.
    pub fn remove_keys(&mut self, stream: usize, pos: u64, len: u64) -> Result<()> {
        self.require_keys(stream)?;
        self.remove_range(stream, pos, len, |n| Edit::RemoveKeys { len: n })
    }

    fn check_key_order(&self, stream: usize, pos: u64, keys: &[u64]) -> Result<()> {
        let (Some(&first), Some(&last)) = (keys.first(), keys.last()) else {
            return Ok(());
        };
        let sorted = keys.windows(2).all(|w| w[0] <= w[1]);
        let before = match pos.checked_sub(1) {
            Some(p) => self.key_at(&self.seek(stream, p)?)?,
            None => None,
        };
        let after = if pos < self.size(stream)? {
            self.key_at(&self.seek(stream, pos)?)?
        } else {
            None
        };
        if !sorted || before.is_some_and(|b| b > first) || after.is_some_and(|a| last > a) {
            return Err(Error::Unordered { pos });
        }
        Ok(())
    }

    fn remove_range<F>(&mut self, stream: usize, pos: u64, len: u64, edit: F) -> Result<()>
    where
        F: Fn(u64) -> Edit<'static>,
    {
        let size = self.size(stream)?;
        let end = pos.saturating_add(len);
        if end > size {
            return Err(Error::OutOfRange { pos: end, size });
        }
        let mut remaining = len;
        while remaining > 0 {
            let cursor = self.seek_mut(stream, pos)?;
            let in_leaf = self.store.get(cursor.leaf())?.as_leaf()?.size(stream)? - cursor.leaf_index();
            let n = remaining.min(in_leaf);
            if n == 0 {
                return Err(Error::structure(format!("seek to {pos} landed at a leaf end")));
            }
            let (_, removed) = self.mutate_at(&cursor, edit(n))?;
            if removed == 0 {
                return Err(Error::structure(format!("removal at {pos} made no progress")));
            }
            remaining -= removed;
        }
        Ok(())
    }

    /// Apply `edit` at the cursor. A capacity failure splits the leaf,
    /// re-seeks and retries, up to `max_split_retries` times.
    ///
    /// Returns a cursor valid after the edit and the number of elements the
    /// edit touched in its leaf.
    fn mutate_at(&mut self, cursor: &Cursor, edit: Edit<'_>) -> Result<(Cursor, u64)> {
        if cursor.mode() != PathMode::Update {
            return Err(Error::ReadOnlyPath);
        }
        self.check_path(cursor.path())?;
        let stream = cursor.stream();
        let pos = cursor.pos();
        let mut cursor = cursor.clone();
        let mut splits = 0;
        loop {
            let leaf_id = cursor.leaf();
            let before = self.store.get(leaf_id)?.totals();
            let leaf = self.store.get_mut(leaf_id)?.as_leaf_mut()?;
            match edit.apply(leaf.stream_mut(stream)?, stream, cursor.leaf_index())? {
                Ok(applied) => {
                    self.propagate(cursor.path(), &before)?;
                    self.epoch += 1;
                    return Ok((cursor.restamp(self.epoch), applied));
                }
                Err(exceeded) => {
                    if splits >= self.config.max_split_retries {
                        warn!(%exceeded, splits, "mutation does not fit after splitting");
                        return Err(Error::Capacity(exceeded));
                    }
                    debug!(%exceeded, pos, "leaf full, splitting and retrying");
                    if !self.split_leaf(cursor.path())? {
                        return Err(Error::Capacity(exceeded));
                    }
                    splits += 1;
                    cursor = self.seek_mut(stream, pos)?;
                }
            }
        }
    }

    /// Push the leaf's aggregate change up the path: deltas for Sum columns,
    /// fresh maxima for Max streams.
    fn propagate(&mut self, path: &TreePath, before: &Rows) -> Result<()> {
        let after = self.store.get(path.leaf())?.totals();
        let deltas: SmallVec<[SmallVec<[i64; 3]>; 2]> = before
            .iter()
            .zip(after.iter())
            .map(|(b, a)| a.iter().zip(b.iter()).map(|(&a, &b)| a as i64 - b as i64).collect())
            .collect();
        let has_max = self
            .schema
            .iter()
            .any(|k| *k == StreamKind::Keys(AggregateOrdering::Max));
        trace!(levels = path.len(), "propagating aggregates");

        for level in 1..path.len() {
            let child = path.node(level - 1)?;
            let child_rows = if has_max {
                Some(self.store.get(child)?.totals())
            } else {
                None
            };
            let branch = self.store.get_mut(path.node(level)?)?.as_branch_mut()?;
            let idx = branch.child_index(child)?;
            for (stream, kind) in self.schema.iter().enumerate() {
                let agg = branch.aggregates_mut(stream)?;
                match (kind, &child_rows) {
                    (StreamKind::Keys(AggregateOrdering::Max), Some(rows)) => {
                        agg.set_aggregate(idx, &rows[stream]);
                    }
                    _ => agg.update_aggregate(idx, &deltas[stream])?,
                }
            }
        }
        Ok(())
    }

    /// Split the path's leaf in two. Returns `false` when the leaf is too
    /// small to split.
    fn split_leaf(&mut self, path: &TreePath) -> Result<bool> {
        let leaf_id = path.leaf();
        let leaf = self.store.get_mut(leaf_id)?.as_leaf_mut()?;
        if !leaf.can_split() {
            return Ok(false);
        }
        let right = leaf.split_half();
        let right_id = self.store.allocate(Node::Leaf(right));
        self.epoch += 1;
        debug!(leaf = ?leaf_id, new = ?right_id, "leaf split");
        self.insert_sibling(path, 0, right_id)?;
        Ok(true)
    }

    /// Hook `new_id` in as the right sibling of the node at `level`, splitting
    /// full branches and growing the root as needed.
    fn insert_sibling(&mut self, path: &TreePath, level: usize, new_id: NodeId) -> Result<()> {
        let node_id = path.node(level)?;
        let left_rows = self.store.get(node_id)?.totals();
        let right_rows = self.store.get(new_id)?.totals();

        if path.is_root(level) {
            let mut root = BranchNode::new(&self.schema);
            root.insert_child(0, node_id, &left_rows);
            root.insert_child(1, new_id, &right_rows);
            self.root = self.store.allocate(Node::Branch(root));
            self.height += 1;
            debug!(height = self.height, "root grows");
            return Ok(());
        }

        let parent = self.store.get_mut(path.parent(level)?)?.as_branch_mut()?;
        let idx = parent.child_index(node_id)?;
        parent.set_rows(idx, &left_rows);
        parent.insert_child(idx + 1, new_id, &right_rows);
        if parent.child_count() <= self.config.branch_fanout {
            return Ok(());
        }
        let mid = parent.child_count() / 2;
        let right = parent.split_off(mid);
        let right_id = self.store.allocate(Node::Branch(right));
        debug!(level = level + 1, "branch split");
        self.insert_sibling(path, level + 1, right_id)
    }

    /// Merge the path's leaf with its right sibling under the same parent.
    /// Returns `false` when there is no such sibling or the union does not
    /// fit one leaf.
    pub fn merge_with_next(&mut self, path: &TreePath) -> Result<bool> {
        self.check_path(path)?;
        if path.len() < 2 {
            return Ok(false);
        }
        let leaf_id = path.leaf();
        let parent_id = path.parent(0)?;
        let parent = self.store.get(parent_id)?.as_branch()?;
        let idx = parent.child_index(leaf_id)?;
        let Some(next_id) = parent.child(idx + 1) else {
            return Ok(false);
        };

        let mut merged = self.store.get(leaf_id)?.as_leaf()?.clone();
        let right = self.store.get(next_id)?.as_leaf()?;
        for (stream, theirs) in right.streams().iter().enumerate() {
            let fits = match (merged.stream_mut(stream)?, theirs) {
                (LeafStream::Symbols(a), LeafStream::Symbols(b)) => a.append(b).is_ok(),
                (LeafStream::Keys(a), LeafStream::Keys(b)) => a.append(b).is_ok(),
                _ => return Err(Error::structure(format!("leaf stream {stream} kinds differ"))),
            };
            if !fits {
                return Ok(false);
            }
        }

        let merged_rows: Rows = merged.streams().iter().map(LeafStream::aggregate).collect();
        *self.store.get_mut(leaf_id)? = Node::Leaf(merged);
        self.store.release(next_id)?;
        let parent = self.store.get_mut(parent_id)?.as_branch_mut()?;
        parent.set_rows(idx, &merged_rows);
        parent.remove_child(idx + 1);
        self.epoch += 1;
        debug!(leaf = ?leaf_id, absorbed = ?next_id, "leaves merged");
        self.collapse_root()?;
        Ok(true)
    }

    /// Replace a root with a single child by that child.
    fn collapse_root(&mut self) -> Result<()> {
        loop {
            let only = match self.store.get(self.root)? {
                Node::Branch(b) if b.child_count() == 1 => b.child(0),
                _ => None,
            };
            let Some(child) = only else {
                return Ok(());
            };
            self.store.release(self.root)?;
            self.root = child;
            self.height -= 1;
            self.epoch += 1;
            debug!(height = self.height, "root collapsed");
        }
    }

    // =========================================================================
    // Invariants
    // =========================================================================

    /// Verify aggregate consistency, balanced depth, fanout bounds and every
    /// leaf block.
    pub fn check(&self) -> Result<()> {
        let mut reached = 0usize;
        let result = self.check_node(self.root, 1, &mut reached).and_then(|_| {
            if reached != self.store.live_nodes() {
                Err(Error::structure(format!(
                    "{reached} nodes reachable, {} live",
                    self.store.live_nodes()
                )))
            } else {
                Ok(())
            }
        });
        if let Err(err) = &result {
            warn!(%err, "tree check failed");
        }
        result
    }

    fn check_node(&self, id: NodeId, depth: usize, reached: &mut usize) -> Result<Rows> {
        *reached += 1;
        match self.store.get(id)? {
            Node::Leaf(leaf) => {
                if depth != self.height {
                    return Err(Error::structure(format!(
                        "leaf at depth {depth}, tree height {}",
                        self.height
                    )));
                }
                let kinds = leaf.streams().iter().map(LeafStream::kind);
                if leaf.streams().len() != self.schema.len() || !kinds.eq(self.schema.iter().copied()) {
                    return Err(Error::structure("leaf streams do not match the layout"));
                }
                for stream in leaf.streams() {
                    stream.check()?;
                }
                Ok(leaf.streams().iter().map(LeafStream::aggregate).collect())
            }
            Node::Branch(branch) => {
                let count = branch.child_count();
                if count == 0 || count > self.config.branch_fanout {
                    return Err(Error::structure(format!("branch with {count} children")));
                }
                if branch.stream_count() != self.schema.len() {
                    return Err(Error::structure("branch aggregates do not match the layout"));
                }
                for (i, &child) in branch.children().iter().enumerate() {
                    let rows = self.check_node(child, depth + 1, reached)?;
                    for (stream, row) in rows.iter().enumerate() {
                        let agg = branch.aggregates(stream)?;
                        if agg.len() != count {
                            return Err(Error::structure("aggregate rows do not match children"));
                        }
                        let stored = agg
                            .aggregate_of(i)
                            .ok_or_else(|| Error::structure(format!("child {i} has no aggregate row")))?;
                        if stored != row.as_slice() {
                            return Err(Error::structure(format!(
                                "child {i} stream {stream}: aggregate {stored:?}, subtree {:?}",
                                row.as_slice()
                            )));
                        }
                    }
                }
                Ok(branch.totals())
            }
        }
    }
}

/// Iterator over one symbol stream, hopping leaves with sibling navigation.
pub struct Symbols<'a, S: NodeStore> {
    tree: &'a IndexedTree<S>,
    stream: usize,
    path: Option<TreePath>,
    buf: std::vec::IntoIter<u8>,
}

impl<S: NodeStore> Iterator for Symbols<'_, S> {
    type Item = Result<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(symbol) = self.buf.next() {
                return Some(Ok(symbol));
            }
            let current = self.path.take()?;
            let next = match path::next_sibling_leaf(&self.tree.store, &current) {
                Ok(next) => next?,
                Err(err) => return Some(Err(err)),
            };
            match self.tree.leaf_symbols(next.leaf(), self.stream) {
                Ok(symbols) => self.buf = symbols.into_iter(),
                Err(err) => return Some(Err(err)),
            }
            self.path = Some(next);
        }
    }
}
