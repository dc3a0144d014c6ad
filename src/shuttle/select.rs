use crate::error::Result;
use crate::node::{BranchNode, LeafNode};

use super::{Shuttle, ShuttleOpResult, WalkCmd};

/// Finds the position of the `rank`-th (zero-based) occurrence of a symbol.
#[derive(Debug, Clone)]
pub struct SelectShuttle {
    stream: usize,
    symbol: u8,
    rank: u64,
    position: u64,
}

impl SelectShuttle {
    pub fn new(stream: usize, rank: u64, symbol: u8) -> Self {
        Self {
            stream,
            symbol: symbol & 1,
            rank,
            position: 0,
        }
    }

    /// Absolute position of the selected symbol once found.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[inline]
    fn column(&self) -> usize {
        1 + usize::from(self.symbol)
    }
}

impl Shuttle for SelectShuttle {
    fn stream(&self) -> usize {
        self.stream
    }

    fn branch_visit(&mut self, node: &BranchNode, start: usize) -> Result<ShuttleOpResult> {
        let agg = node.aggregates(self.stream)?;
        match agg.find_child_from(start, self.column(), self.rank) {
            Some((child, residual)) => {
                self.rank = residual;
                Ok(ShuttleOpResult::Child(child))
            }
            None => {
                self.rank -= agg.fold_range(start, agg.len())[self.column()].min(self.rank);
                Ok(ShuttleOpResult::NotFound)
            }
        }
    }

    fn branch_visit_range(&mut self, node: &BranchNode, _cmd: WalkCmd, start: usize, end: usize) -> Result<()> {
        self.position += node.aggregates(self.stream)?.fold_range(start, end)[0];
        Ok(())
    }

    fn leaf_visit(&mut self, node: &LeafNode, start: u64) -> Result<ShuttleOpResult> {
        let block = node.symbols(self.stream)?;
        let before = block.rank(start, self.symbol);
        match block.select_fw(self.rank + before, self.symbol) {
            Some(local) => {
                self.position += local - start;
                Ok(ShuttleOpResult::Position(local))
            }
            None => {
                self.rank -= (block.count(self.symbol) - before).min(self.rank);
                Ok(ShuttleOpResult::NotFound)
            }
        }
    }
}
