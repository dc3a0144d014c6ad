use crate::error::Result;
use crate::node::{BranchNode, LeafNode};
use crate::path::{Cursor, Direction};

use super::{Shuttle, ShuttleOpResult, WalkOutcome};

/// Moves a cursor by a fixed number of positions.
///
/// Forward skips land on the first position of the next non-empty leaf when
/// the distance ends exactly on a leaf boundary. Backward skips land on
/// position `0` of the leaf they end in.
#[derive(Debug, Clone)]
pub struct SkipShuttle {
    stream: usize,
    direction: Direction,
    distance: u64,
    remaining: u64,
    origin: u64,
    target: Option<u64>,
}

impl SkipShuttle {
    pub fn forward(stream: usize, distance: u64) -> Self {
        Self::new(stream, Direction::Forward, distance)
    }

    pub fn backward(stream: usize, distance: u64) -> Self {
        Self::new(stream, Direction::Backward, distance)
    }

    fn new(stream: usize, direction: Direction, distance: u64) -> Self {
        Self {
            stream,
            direction,
            distance,
            remaining: distance,
            origin: 0,
            target: None,
        }
    }

    /// Absolute position reached, once the walk found it.
    #[inline]
    pub fn target(&self) -> Option<u64> {
        self.target
    }
}

impl Shuttle for SkipShuttle {
    fn stream(&self) -> usize {
        self.stream
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn start(&mut self, from: Option<&Cursor>) {
        self.origin = from.map_or(0, Cursor::pos);
        self.remaining = self.distance;
        self.target = None;
    }

    fn branch_visit(&mut self, node: &BranchNode, start: usize) -> Result<ShuttleOpResult> {
        let agg = node.aggregates(self.stream)?;
        match self.direction {
            Direction::Forward => {
                for child in start..agg.len() {
                    let size = agg.value(child, 0);
                    if self.remaining < size {
                        return Ok(ShuttleOpResult::Child(child));
                    }
                    self.remaining -= size;
                }
            }
            Direction::Backward => {
                if agg.is_empty() {
                    return Ok(ShuttleOpResult::NotFound);
                }
                for child in (0..=start.min(agg.len() - 1)).rev() {
                    let size = agg.value(child, 0);
                    if size > 0 && self.remaining <= size {
                        return Ok(ShuttleOpResult::Child(child));
                    }
                    self.remaining -= size;
                }
            }
        }
        Ok(ShuttleOpResult::NotFound)
    }

    fn leaf_visit(&mut self, node: &LeafNode, start: u64) -> Result<ShuttleOpResult> {
        let size = node.size(self.stream)?;
        match self.direction {
            Direction::Forward => {
                if start + self.remaining < size {
                    return Ok(ShuttleOpResult::Position(start + self.remaining));
                }
                self.remaining -= size.saturating_sub(start);
            }
            Direction::Backward => {
                if self.remaining <= start {
                    return Ok(ShuttleOpResult::Position(start - self.remaining));
                }
                self.remaining -= start;
            }
        }
        Ok(ShuttleOpResult::NotFound)
    }

    fn finish(&mut self, outcome: &WalkOutcome) {
        if outcome.is_found() {
            self.target = match self.direction {
                Direction::Forward => self.origin.checked_add(self.distance),
                Direction::Backward => self.origin.checked_sub(self.distance),
            };
        }
    }
}
