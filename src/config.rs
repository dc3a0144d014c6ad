//! Tree configuration and leaf stream layout.

use crate::branch::AggregateOrdering;
use crate::error::{Error, Result};

/// Kind of one leaf stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Binary symbol sequence in a packed SSRLE block. Rank/select capable.
    Symbols,
    /// Array of `u64` keys searched by prefix sum or by maximum.
    Keys(AggregateOrdering),
}

impl StreamKind {
    /// Width of one aggregate row in a branch node for this stream.
    ///
    /// Column 0 is always the element count. Symbol streams add one occurrence
    /// count per symbol; key streams add the sum or maximum of the keys.
    #[inline]
    pub fn aggregate_width(self) -> usize {
        match self {
            StreamKind::Symbols => 1 + crate::run::SYMBOLS,
            StreamKind::Keys(_) => 2,
        }
    }

    /// Ordering used when searching column `column` of this stream's aggregate.
    #[inline]
    pub fn column_ordering(self, column: usize) -> AggregateOrdering {
        match self {
            StreamKind::Keys(ordering) if column == 1 => ordering,
            _ => AggregateOrdering::Sum,
        }
    }
}

/// Configuration for an [`IndexedTree`](crate::IndexedTree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Maximum number of children of a branch node.
    pub branch_fanout: usize,
    /// Byte budget of each packed symbol block.
    pub leaf_block_bytes: usize,
    /// Maximum number of keys of each key stream in a leaf.
    pub leaf_key_capacity: usize,
    /// How many times a leaf may be split while retrying one mutation.
    pub max_split_retries: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            branch_fanout: 32,
            leaf_block_bytes: 512,
            leaf_key_capacity: 64,
            max_split_retries: 4,
        }
    }
}

impl TreeConfig {
    /// Smallest block budget that can always absorb one insertion into a
    /// single-run block.
    pub const MIN_LEAF_BLOCK_BYTES: usize = 64;

    /// Set the branch fanout.
    pub fn with_branch_fanout(mut self, fanout: usize) -> Self {
        self.branch_fanout = fanout;
        self
    }

    /// Set the per-block byte budget.
    pub fn with_leaf_block_bytes(mut self, bytes: usize) -> Self {
        self.leaf_block_bytes = bytes;
        self
    }

    /// Set the per-stream key capacity.
    pub fn with_leaf_key_capacity(mut self, keys: usize) -> Self {
        self.leaf_key_capacity = keys;
        self
    }

    /// Set the split retry bound.
    pub fn with_max_split_retries(mut self, retries: usize) -> Self {
        self.max_split_retries = retries;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.branch_fanout < 2 {
            return Err(Error::InvalidConfig(format!(
                "branch_fanout must be at least 2, got {}",
                self.branch_fanout
            )));
        }
        if self.leaf_block_bytes < Self::MIN_LEAF_BLOCK_BYTES {
            return Err(Error::InvalidConfig(format!(
                "leaf_block_bytes must be at least {}, got {}",
                Self::MIN_LEAF_BLOCK_BYTES,
                self.leaf_block_bytes
            )));
        }
        if self.leaf_key_capacity < 2 {
            return Err(Error::InvalidConfig(format!(
                "leaf_key_capacity must be at least 2, got {}",
                self.leaf_key_capacity
            )));
        }
        if self.max_split_retries == 0 {
            return Err(Error::InvalidConfig(
                "max_split_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
