//! Key stream of a leaf: plain `u64` keys searched by prefix sum or by
//! lower bound.

use crate::branch::AggregateOrdering;
use crate::error::{CapacityExceeded, Error, Result};

const KEY_BYTES: usize = std::mem::size_of::<u64>();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlock {
    ordering: AggregateOrdering,
    keys: Vec<u64>,
    capacity: usize,
}

impl KeyBlock {
    pub fn new(ordering: AggregateOrdering, capacity: usize) -> Self {
        Self {
            ordering,
            keys: Vec::new(),
            capacity,
        }
    }

    pub fn from_keys(
        ordering: AggregateOrdering,
        capacity: usize,
        keys: &[u64],
    ) -> std::result::Result<Self, CapacityExceeded> {
        let mut block = Self::new(ordering, capacity);
        block.insert(0, keys)?;
        Ok(block)
    }

    #[inline]
    pub fn ordering(&self) -> AggregateOrdering {
        self.ordering
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<u64> {
        self.keys.get(idx).copied()
    }

    fn exceeded(&self, len: usize) -> CapacityExceeded {
        CapacityExceeded {
            required: len * KEY_BYTES,
            capacity: self.capacity * KEY_BYTES,
        }
    }

    /// Insert `keys` before `idx`. Ordering is the caller's concern.
    pub fn insert(&mut self, idx: usize, keys: &[u64]) -> std::result::Result<(), CapacityExceeded> {
        debug_assert!(idx <= self.keys.len());
        let len = self.keys.len() + keys.len();
        if len > self.capacity {
            return Err(self.exceeded(len));
        }
        let idx = idx.min(self.keys.len());
        self.keys.splice(idx..idx, keys.iter().copied());
        Ok(())
    }

    /// Remove `[idx, idx + len)`.
    pub fn remove(&mut self, idx: usize, len: usize) {
        let end = (idx + len).min(self.keys.len());
        self.keys.drain(idx.min(end)..end);
    }

    pub fn split_off(&mut self, at: usize) -> KeyBlock {
        Self {
            ordering: self.ordering,
            keys: self.keys.split_off(at.min(self.keys.len())),
            capacity: self.capacity,
        }
    }

    pub fn append(&mut self, other: &KeyBlock) -> std::result::Result<(), CapacityExceeded> {
        let at = self.keys.len();
        self.insert(at, &other.keys)
    }

    #[inline]
    pub fn sum(&self) -> u64 {
        self.keys.iter().fold(0u64, |acc, &k| acc.saturating_add(k))
    }

    /// Largest key, `0` when empty.
    #[inline]
    pub fn max(&self) -> u64 {
        self.keys.iter().copied().max().unwrap_or(0)
    }

    /// `[len, sum]` or `[len, max]` depending on the ordering.
    pub fn aggregate(&self) -> [u64; 2] {
        let value = match self.ordering {
            AggregateOrdering::Sum => self.sum(),
            AggregateOrdering::Max => self.max(),
        };
        [self.keys.len() as u64, value]
    }

    /// Sum of `[0, idx)`.
    pub fn prefix_sum(&self, idx: usize) -> u64 {
        self.keys[..idx.min(self.keys.len())]
            .iter()
            .fold(0u64, |acc, &k| acc.saturating_add(k))
    }

    /// Locate `target` and return `(idx, residual)`.
    ///
    /// Sum ordering: first index whose inclusive prefix sum exceeds `target`;
    /// the residual is `target` minus the sum of the preceding keys.
    /// Max ordering: first key `>= target`; the residual is `target`.
    pub fn find(&self, target: u64) -> Option<(usize, u64)> {
        match self.ordering {
            AggregateOrdering::Sum => {
                let mut rest = target;
                for (idx, &k) in self.keys.iter().enumerate() {
                    if rest < k {
                        return Some((idx, rest));
                    }
                    rest -= k;
                }
                None
            }
            AggregateOrdering::Max => {
                let idx = self.keys.partition_point(|&k| k < target);
                (idx < self.keys.len()).then_some((idx, target))
            }
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.keys.len() > self.capacity {
            return Err(Error::structure(format!(
                "key block holds {} keys, capacity {}",
                self.keys.len(),
                self.capacity
            )));
        }
        if self.ordering == AggregateOrdering::Max && self.keys.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::structure("max-ordered key block is not sorted"));
        }
        Ok(())
    }
}
