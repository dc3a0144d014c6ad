use crate::error::Result;
use crate::node::{BranchNode, LeafNode};

use super::{Shuttle, ShuttleOpResult, WalkCmd};

/// Counts occurrences of a symbol before a position.
#[derive(Debug, Clone)]
pub struct RankShuttle {
    stream: usize,
    symbol: u8,
    remaining: u64,
    rank: u64,
}

impl RankShuttle {
    /// Rank of `symbol` in `[0, pos)`.
    pub fn new(stream: usize, pos: u64, symbol: u8) -> Self {
        Self {
            stream,
            symbol: symbol & 1,
            remaining: pos,
            rank: 0,
        }
    }

    #[inline]
    pub fn rank(&self) -> u64 {
        self.rank
    }
}

impl Shuttle for RankShuttle {
    fn stream(&self) -> usize {
        self.stream
    }

    fn branch_visit(&mut self, node: &BranchNode, start: usize) -> Result<ShuttleOpResult> {
        let agg = node.aggregates(self.stream)?;
        for child in start..agg.len() {
            let size = agg.value(child, 0);
            if self.remaining < size {
                return Ok(ShuttleOpResult::Child(child));
            }
            self.remaining -= size;
        }
        Ok(ShuttleOpResult::NotFound)
    }

    fn branch_visit_range(&mut self, node: &BranchNode, _cmd: WalkCmd, start: usize, end: usize) -> Result<()> {
        let folded = node.aggregates(self.stream)?.fold_range(start, end);
        self.rank += folded[1 + usize::from(self.symbol)];
        Ok(())
    }

    fn leaf_visit(&mut self, node: &LeafNode, start: u64) -> Result<ShuttleOpResult> {
        let block = node.symbols(self.stream)?;
        let idx = start + self.remaining;
        if idx > block.size() {
            self.remaining -= block.size().saturating_sub(start);
            return Ok(ShuttleOpResult::NotFound);
        }
        self.rank += block.rank(idx, self.symbol) - block.rank(start, self.symbol);
        Ok(ShuttleOpResult::Position(idx))
    }
}
