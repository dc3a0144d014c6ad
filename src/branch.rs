//! Branch aggregate node: per-child folded summaries of one leaf stream.

use smallvec::SmallVec;

use crate::config::StreamKind;
use crate::error::{Error, Result};

/// How a column folds across children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateOrdering {
    /// Column values add up; searched by prefix sum.
    Sum,
    /// Column values are non-decreasing maxima; searched by lower bound.
    Max,
}

/// One aggregate row, column 0 is the child's element count.
pub type AggregateRow = SmallVec<[u64; 3]>;

/// Row-major table of per-child aggregates for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchAggregateNode {
    kind: StreamKind,
    rows: Vec<u64>,
}

impl BranchAggregateNode {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
        }
    }

    #[inline]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.kind.aggregate_width()
    }

    /// Number of children.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len() / self.width()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row of `child`, `None` past the last child.
    #[inline]
    pub fn aggregate_of(&self, child: usize) -> Option<&[u64]> {
        let w = self.width();
        self.rows.get(child * w..(child + 1) * w)
    }

    /// Cell `column` of `child`. Callers keep `child < len()`.
    #[inline]
    pub(crate) fn value(&self, child: usize, column: usize) -> u64 {
        self.rows[child * self.width() + column]
    }

    pub fn set_aggregate(&mut self, child: usize, row: &[u64]) {
        let w = self.width();
        debug_assert_eq!(row.len(), w);
        self.rows[child * w..(child + 1) * w].copy_from_slice(row);
    }

    /// Add signed per-column deltas to one child's row.
    pub fn update_aggregate(&mut self, child: usize, delta: &[i64]) -> Result<()> {
        let w = self.width();
        debug_assert_eq!(delta.len(), w);
        if child >= self.len() {
            return Err(Error::structure(format!(
                "aggregate update for child {child} of {}",
                self.len()
            )));
        }
        for (column, &d) in delta.iter().enumerate() {
            let cell = &mut self.rows[child * w + column];
            *cell = cell.checked_add_signed(d).ok_or_else(|| {
                Error::structure(format!(
                    "aggregate of child {child} column {column} out of range: {} {d:+}",
                    *cell
                ))
            })?;
        }
        Ok(())
    }

    pub fn insert_row(&mut self, child: usize, row: &[u64]) {
        let w = self.width();
        debug_assert_eq!(row.len(), w);
        let at = child * w;
        self.rows.splice(at..at, row.iter().copied());
    }

    pub fn remove_row(&mut self, child: usize) -> AggregateRow {
        let w = self.width();
        self.rows.drain(child * w..(child + 1) * w).collect()
    }

    /// Move rows `[at, len)` into a new node.
    pub fn split_off(&mut self, at: usize) -> BranchAggregateNode {
        Self {
            kind: self.kind,
            rows: self.rows.split_off(at * self.width()),
        }
    }

    pub fn append(&mut self, other: &mut BranchAggregateNode) {
        debug_assert_eq!(self.kind, other.kind);
        self.rows.append(&mut other.rows);
    }

    /// Fold rows `[start, end)`: sum for Sum columns, max for Max columns.
    pub fn fold_range(&self, start: usize, end: usize) -> AggregateRow {
        let w = self.width();
        let mut out: AggregateRow = SmallVec::from_elem(0, w);
        for child in start..end.min(self.len()) {
            for (column, acc) in out.iter_mut().enumerate() {
                let v = self.value(child, column);
                *acc = match self.kind.column_ordering(column) {
                    AggregateOrdering::Sum => acc.saturating_add(v),
                    AggregateOrdering::Max => (*acc).max(v),
                };
            }
        }
        out
    }

    #[inline]
    pub fn total(&self) -> AggregateRow {
        self.fold_range(0, self.len())
    }

    #[inline]
    pub fn find_child(&self, column: usize, target: u64) -> Option<(usize, u64)> {
        self.find_child_from(0, column, target)
    }

    /// Search `column` from child `start`.
    ///
    /// Sum: first child whose prefix boundary exceeds `target`, with the
    /// residual after subtracting the preceding children. Max: leftmost
    /// non-empty child whose maximum is `>= target`, residual unchanged.
    pub fn find_child_from(&self, start: usize, column: usize, target: u64) -> Option<(usize, u64)> {
        match self.kind.column_ordering(column) {
            AggregateOrdering::Sum => {
                let mut rest = target;
                for child in start..self.len() {
                    let v = self.value(child, column);
                    if rest < v {
                        return Some((child, rest));
                    }
                    rest -= v;
                }
                None
            }
            AggregateOrdering::Max => (start..self.len())
                .find(|&child| self.value(child, 0) > 0 && self.value(child, column) >= target)
                .map(|child| (child, target)),
        }
    }
}
