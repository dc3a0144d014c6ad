//! Shuttle protocol: one walk skeleton shared by find, skip, rank and select.
//!
//! A shuttle answers "which child" at branch nodes and "which position" at
//! the leaf. The skeleton drives it down from the root ([`descend`]) or from
//! an existing cursor ([`walk_from`]), climbing to ancestors when the leaf
//! runs out. Children the walk passes over are reported through
//! [`Shuttle::branch_visit_range`] so shuttles can keep running totals.

mod find;
mod rank;
mod select;
mod skip;

pub use find::FindShuttle;
pub use rank::RankShuttle;
pub use select::SelectShuttle;
pub use skip::SkipShuttle;

use smallvec::SmallVec;
use tracing::trace;

use crate::error::{Error, Result};
use crate::node::{BranchNode, LeafNode, Node, NodeId, NodeStore};
use crate::path::{Cursor, Direction, PathMode, TreePath};

/// Answer of one node visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuttleOpResult {
    /// Descend into this child of a branch.
    Child(usize),
    /// Final index inside the leaf stream.
    Position(u64),
    /// The target lies beyond this node.
    NotFound,
    /// Nothing to search.
    Empty,
}

/// Why a child range is reported to a shuttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkCmd {
    /// Children the walk stepped over while choosing a child or climbing.
    Skipped,
    /// Children left of a finished path, replayed to rebuild prefixes.
    Prefix,
}

/// Result of a whole walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkOutcome {
    Found { path: TreePath, idx: u64 },
    NotFound,
    Empty,
}

impl WalkOutcome {
    #[inline]
    pub fn is_found(&self) -> bool {
        matches!(self, WalkOutcome::Found { .. })
    }
}

pub trait Shuttle {
    /// Leaf stream the shuttle works on.
    fn stream(&self) -> usize;

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    /// Called before the walk. `from` is the cursor of a relative walk.
    fn start(&mut self, _from: Option<&Cursor>) {}

    /// Choose a child of `node`, searching from child `start` in the
    /// shuttle's direction.
    fn branch_visit(&mut self, node: &BranchNode, start: usize) -> Result<ShuttleOpResult>;

    /// Side-effect-only pass over children `[start, end)`.
    fn branch_visit_range(
        &mut self,
        _node: &BranchNode,
        _cmd: WalkCmd,
        _start: usize,
        _end: usize,
    ) -> Result<()> {
        Ok(())
    }

    /// Compute the in-leaf result, starting at leaf index `start`.
    fn leaf_visit(&mut self, node: &LeafNode, start: u64) -> Result<ShuttleOpResult>;

    /// Called once the outcome is known.
    fn finish(&mut self, _outcome: &WalkOutcome) {}
}

// =============================================================================
// Walk skeleton
// =============================================================================

/// Walk from the root. An empty stream yields [`WalkOutcome::Empty`]
/// without visiting any node.
pub fn descend<S, W>(store: &S, root: NodeId, epoch: u64, mode: PathMode, shuttle: &mut W) -> Result<WalkOutcome>
where
    S: NodeStore,
    W: Shuttle + ?Sized,
{
    shuttle.start(None);
    let outcome = if store.get(root)?.size(shuttle.stream())? == 0 {
        WalkOutcome::Empty
    } else {
        descend_from(store, root, SmallVec::new(), epoch, mode, shuttle)?
    };
    shuttle.finish(&outcome);
    Ok(outcome)
}

/// Walk relative to `cursor`: visit its leaf first, then climb to the
/// nearest ancestor with a matching child and descend from there.
pub fn walk_from<S, W>(store: &S, cursor: &Cursor, shuttle: &mut W) -> Result<WalkOutcome>
where
    S: NodeStore,
    W: Shuttle + ?Sized,
{
    shuttle.start(Some(cursor));
    let path = cursor.path();
    let leaf = store.get(path.leaf())?.as_leaf()?;
    let outcome = match shuttle.leaf_visit(leaf, cursor.leaf_index())? {
        ShuttleOpResult::Position(idx) => WalkOutcome::Found {
            path: path.clone(),
            idx,
        },
        ShuttleOpResult::Child(_) => return Err(Error::structure("leaf visit chose a child")),
        ShuttleOpResult::NotFound | ShuttleOpResult::Empty => climb(store, path, shuttle)?,
    };
    shuttle.finish(&outcome);
    Ok(outcome)
}

/// Replay the children left of every path node through
/// [`WalkCmd::Prefix`].
pub fn accumulate_prefix<S, W>(store: &S, path: &TreePath, shuttle: &mut W) -> Result<()>
where
    S: NodeStore,
    W: Shuttle + ?Sized,
{
    for level in 1..path.len() {
        let branch = store.get(path.node(level)?)?.as_branch()?;
        let idx = branch.child_index(path.node(level - 1)?)?;
        shuttle.branch_visit_range(branch, WalkCmd::Prefix, 0, idx)?;
    }
    Ok(())
}

fn climb<S, W>(store: &S, path: &TreePath, shuttle: &mut W) -> Result<WalkOutcome>
where
    S: NodeStore,
    W: Shuttle + ?Sized,
{
    let dir = shuttle.direction();
    for level in 1..path.len() {
        let branch = store.get(path.node(level)?)?.as_branch()?;
        let idx = branch.child_index(path.node(level - 1)?)?;
        let start = match dir {
            Direction::Forward if idx + 1 < branch.child_count() => idx + 1,
            Direction::Backward if idx > 0 => idx - 1,
            _ => continue,
        };
        trace!(level, start, "shuttle climbs");
        if let Some(child) = visit_branch(branch, start, dir, shuttle)? {
            let above: SmallVec<[NodeId; 8]> = path.nodes()[level..].iter().rev().copied().collect();
            let child = branch
                .child(child)
                .ok_or_else(|| Error::structure("shuttle chose a missing child"))?;
            return descend_from(store, child, above, path.epoch(), path.mode(), shuttle);
        }
    }
    Ok(WalkOutcome::NotFound)
}

/// Descend from `from` to a leaf. `above` holds the ancestors, root-first.
fn descend_from<S, W>(
    store: &S,
    from: NodeId,
    mut above: SmallVec<[NodeId; 8]>,
    epoch: u64,
    mode: PathMode,
    shuttle: &mut W,
) -> Result<WalkOutcome>
where
    S: NodeStore,
    W: Shuttle + ?Sized,
{
    let dir = shuttle.direction();
    let mut id = from;
    loop {
        above.push(id);
        match store.get(id)? {
            Node::Branch(branch) => {
                let start = match dir {
                    Direction::Forward => 0,
                    Direction::Backward => branch.child_count().saturating_sub(1),
                };
                let Some(child) = visit_branch(branch, start, dir, shuttle)? else {
                    return Ok(WalkOutcome::NotFound);
                };
                trace!(depth = above.len(), child, "shuttle descends");
                id = branch
                    .child(child)
                    .ok_or_else(|| Error::structure("shuttle chose a missing child"))?;
            }
            Node::Leaf(leaf) => {
                let start = match dir {
                    Direction::Forward => 0,
                    Direction::Backward => leaf.size(shuttle.stream())?,
                };
                return match shuttle.leaf_visit(leaf, start)? {
                    ShuttleOpResult::Position(idx) => Ok(WalkOutcome::Found {
                        path: TreePath::from_root_first(above, epoch, mode),
                        idx,
                    }),
                    ShuttleOpResult::NotFound => Ok(WalkOutcome::NotFound),
                    ShuttleOpResult::Empty => Ok(WalkOutcome::Empty),
                    ShuttleOpResult::Child(_) => Err(Error::structure("leaf visit chose a child")),
                };
            }
        }
    }
}

/// One branch visit plus the range report for the children passed over.
fn visit_branch<W>(branch: &BranchNode, start: usize, dir: Direction, shuttle: &mut W) -> Result<Option<usize>>
where
    W: Shuttle + ?Sized,
{
    let len = branch.child_count();
    match shuttle.branch_visit(branch, start)? {
        ShuttleOpResult::Child(child) => {
            if child >= len {
                return Err(Error::structure(format!("child {child} of {len} chosen")));
            }
            let (lo, hi) = match dir {
                Direction::Forward => (start, child),
                Direction::Backward => (child + 1, start + 1),
            };
            shuttle.branch_visit_range(branch, WalkCmd::Skipped, lo, hi)?;
            Ok(Some(child))
        }
        ShuttleOpResult::NotFound | ShuttleOpResult::Empty => {
            let (lo, hi) = match dir {
                Direction::Forward => (start, len),
                Direction::Backward => (0, (start + 1).min(len)),
            };
            shuttle.branch_visit_range(branch, WalkCmd::Skipped, lo, hi)?;
            Ok(None)
        }
        ShuttleOpResult::Position(_) => Err(Error::structure("branch visit returned a leaf position")),
    }
}
