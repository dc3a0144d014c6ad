use crate::branch::AggregateOrdering;
use crate::config::StreamKind;
use crate::error::{Error, Result};
use crate::node::{BranchNode, LeafNode};
use crate::path::Cursor;

use super::{Shuttle, ShuttleOpResult, WalkCmd};

/// Key search over a key stream.
///
/// On a Sum stream it finds the first key whose inclusive prefix sum exceeds
/// the target. On a Max stream it finds the first key `>= target`. Always
/// descends from the root.
#[derive(Debug, Clone)]
pub struct FindShuttle {
    stream: usize,
    ordering: AggregateOrdering,
    target: u64,
    residual: u64,
    position: u64,
    prefix: u64,
}

impl FindShuttle {
    pub fn new(stream: usize, ordering: AggregateOrdering, target: u64) -> Self {
        Self {
            stream,
            ordering,
            target,
            residual: target,
            position: 0,
            prefix: 0,
        }
    }

    /// Absolute position of the matching key.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Sum of the keys before the match (Sum streams only, else `0`).
    #[inline]
    pub fn prefix(&self) -> u64 {
        self.prefix
    }

    fn check_kind(&self, kind: StreamKind) -> Result<()> {
        if kind == StreamKind::Keys(self.ordering) {
            Ok(())
        } else {
            Err(Error::StreamKind {
                stream: self.stream,
                expected: "key",
            })
        }
    }
}

impl Shuttle for FindShuttle {
    fn stream(&self) -> usize {
        self.stream
    }

    fn start(&mut self, _from: Option<&Cursor>) {
        self.residual = self.target;
        self.position = 0;
        self.prefix = 0;
    }

    fn branch_visit(&mut self, node: &BranchNode, start: usize) -> Result<ShuttleOpResult> {
        let agg = node.aggregates(self.stream)?;
        self.check_kind(agg.kind())?;
        match agg.find_child_from(start, 1, self.residual) {
            Some((child, residual)) => {
                self.residual = residual;
                Ok(ShuttleOpResult::Child(child))
            }
            None => Ok(ShuttleOpResult::NotFound),
        }
    }

    fn branch_visit_range(&mut self, node: &BranchNode, _cmd: WalkCmd, start: usize, end: usize) -> Result<()> {
        let folded = node.aggregates(self.stream)?.fold_range(start, end);
        self.position += folded[0];
        if self.ordering == AggregateOrdering::Sum {
            self.prefix += folded[1];
        }
        Ok(())
    }

    fn leaf_visit(&mut self, node: &LeafNode, _start: u64) -> Result<ShuttleOpResult> {
        let keys = node.keys(self.stream)?;
        self.check_kind(StreamKind::Keys(keys.ordering()))?;
        match keys.find(self.residual) {
            Some((idx, residual)) => {
                self.position += idx as u64;
                if self.ordering == AggregateOrdering::Sum {
                    self.prefix += self.residual - residual;
                }
                self.residual = residual;
                Ok(ShuttleOpResult::Position(idx as u64))
            }
            None => Ok(ShuttleOpResult::NotFound),
        }
    }
}
