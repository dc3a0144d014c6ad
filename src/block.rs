//! Packed sequence block: an ordered list of SSRLE code units with block-level
//! size metadata.

use smallvec::SmallVec;
use tracing::trace;

use crate::bits::{BitSelect, Hardware};
use crate::error::{CapacityExceeded, Error, Result};
use crate::run::{self, SymbolRun, SYMBOLS};

type RunScratch = SmallVec<[SymbolRun; 8]>;

/// Binary symbol sequence stored as packed runs.
///
/// `size` is the number of logical symbols, `byte_size` the sum of the
/// runs' encoded sizes. Mutations that would push `byte_size` over
/// `capacity` fail with [`CapacityExceeded`] and leave the block unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedSequenceBlock {
    units: Vec<u64>,
    size: u64,
    byte_size: usize,
    capacity: usize,
}

impl PackedSequenceBlock {
    /// Empty block with a byte budget.
    pub fn new(capacity: usize) -> Self {
        Self {
            units: Vec::new(),
            size: 0,
            byte_size: 0,
            capacity,
        }
    }

    /// Build a block from runs. Adjacent runs are merged where they fit.
    pub fn from_runs<I>(capacity: usize, runs: I) -> std::result::Result<Self, CapacityExceeded>
    where
        I: IntoIterator<Item = SymbolRun>,
    {
        let runs = normalize(runs);
        let byte_size = runs.iter().map(run::estimate_size).sum();
        if byte_size > capacity {
            return Err(CapacityExceeded {
                required: byte_size,
                capacity,
            });
        }
        Ok(Self {
            size: runs.iter().map(SymbolRun::len).sum(),
            units: runs.iter().map(run::encode).collect(),
            byte_size,
            capacity,
        })
    }

    /// Build a block from one symbol per byte (`0` or `1`).
    pub fn from_symbols(
        capacity: usize,
        symbols: &[u8],
    ) -> std::result::Result<Self, CapacityExceeded> {
        let mut runs: RunScratch = SmallVec::new();
        let mut i = 0;
        while i < symbols.len() {
            let symbol = symbols[i] & 1;
            let mut j = i + 1;
            while j < symbols.len() && symbols[j] & 1 == symbol {
                j += 1;
            }
            runs.extend(repeats(symbol, (j - i) as u64));
            i = j;
        }
        Self::from_runs(capacity, runs)
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn run_count(&self) -> usize {
        self.units.len()
    }

    /// Raw code units, in order.
    #[inline]
    pub fn units(&self) -> &[u64] {
        &self.units
    }

    pub fn runs(&self) -> impl Iterator<Item = SymbolRun> + '_ {
        self.units.iter().map(|&unit| run::decode(unit))
    }

    /// Index of the run holding `pos` and the position where it starts.
    /// `pos == size` yields `(run_count, size)`.
    pub fn locate(&self, pos: u64) -> (usize, u64) {
        let mut start = 0u64;
        for (idx, r) in self.runs().enumerate() {
            let end = start + r.len();
            if pos < end {
                return (idx, start);
            }
            start = end;
        }
        (self.units.len(), start)
    }

    pub fn symbol(&self, pos: u64) -> Option<u8> {
        if pos >= self.size {
            return None;
        }
        let (idx, start) = self.locate(pos);
        Some(run::decode(self.units[idx]).symbol(pos - start))
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.runs().flat_map(|r| (0..r.len()).map(move |i| r.symbol(i)))
    }

    // -------------------------------------------------------------------------
    // Rank / select
    // -------------------------------------------------------------------------

    /// Occurrences of `symbol` in `[0, pos)`. `pos` is clamped to `size`.
    pub fn rank(&self, pos: u64, symbol: u8) -> u64 {
        let mut start = 0u64;
        let mut rank = 0u64;
        for r in self.runs() {
            if start >= pos {
                break;
            }
            rank += r.rank(pos - start, symbol);
            start += r.len();
        }
        rank
    }

    #[inline]
    pub fn count(&self, symbol: u8) -> u64 {
        self.rank(self.size, symbol)
    }

    /// Adds per-symbol counts of the whole block into `sink`.
    pub fn ranks(&self, sink: &mut [u64; SYMBOLS]) {
        for r in self.runs() {
            r.ranks(sink);
        }
    }

    /// Adds per-symbol counts of `[0, pos)` into `sink`.
    pub fn ranks_to(&self, pos: u64, sink: &mut [u64; SYMBOLS]) {
        let mut start = 0u64;
        for r in self.runs() {
            if start >= pos {
                break;
            }
            r.ranks_to(pos - start, sink);
            start += r.len();
        }
    }

    /// Position of the `rank`-th (zero-based) occurrence of `symbol`.
    #[inline]
    pub fn select_fw(&self, rank: u64, symbol: u8) -> Option<u64> {
        self.select_fw_with::<Hardware>(rank, symbol)
    }

    pub fn select_fw_with<S: BitSelect>(&self, mut rank: u64, symbol: u8) -> Option<u64> {
        let mut start = 0u64;
        for r in self.runs() {
            let count = r.count(symbol);
            if rank < count {
                return r.select_fw_with::<S>(rank, symbol).map(|local| start + local);
            }
            rank -= count;
            start += r.len();
        }
        None
    }

    /// Length of the block of `symbol` starting at `start`, across runs.
    pub fn count_fw(&self, start: u64, symbol: u8) -> u64 {
        if start >= self.size {
            return 0;
        }
        let (idx, run_start) = self.locate(start);
        let mut local = start - run_start;
        let mut total = 0u64;
        for r in self.runs().skip(idx) {
            let n = r.count_fw(local, symbol);
            total += n;
            if local + n < r.len() {
                break;
            }
            local = 0;
        }
        total
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Insert `len` copies of `symbol` before position `at`.
    pub fn insert_symbols(
        &mut self,
        at: u64,
        len: u64,
        symbol: u8,
    ) -> std::result::Result<(), CapacityExceeded> {
        debug_assert!(at <= self.size);
        if len == 0 {
            return Ok(());
        }
        self.splice(at.min(self.size), 0, &repeats(symbol, len))
    }

    /// Remove `len` symbols starting at `at`.
    ///
    /// Removal can still fail: cutting a run in two may cost more header bits
    /// than the removed symbols saved.
    pub fn remove_symbols(&mut self, at: u64, len: u64) -> std::result::Result<(), CapacityExceeded> {
        debug_assert!(at + len <= self.size);
        let at = at.min(self.size);
        let len = len.min(self.size - at);
        if len == 0 {
            return Ok(());
        }
        self.splice(at, len, &[])
    }

    /// Replace `[at, at + remove)` by `insert`, re-encoding only the runs that
    /// touch the edit. Nothing changes unless the result fits the budget.
    fn splice(
        &mut self,
        at: u64,
        remove: u64,
        insert: &[SymbolRun],
    ) -> std::result::Result<(), CapacityExceeded> {
        let cut_end = at + remove;
        let (at_idx, at_start) = self.locate(at);
        let (end_idx, _) = self.locate(cut_end);

        // Include the left neighbour so inserted runs can merge into it.
        let (lo, mut pos) = if at_idx > 0 {
            let prev = run::decode(self.units[at_idx - 1]);
            (at_idx - 1, at_start - prev.len())
        } else {
            (0, 0)
        };
        let hi = (end_idx + 1).min(self.units.len());

        let mut before: RunScratch = SmallVec::new();
        let mut after: RunScratch = SmallVec::new();
        let mut old_bytes = 0usize;
        for &unit in &self.units[lo..hi] {
            let r = run::decode(unit);
            old_bytes += run::estimate_size(&r);
            let end = pos + r.len();
            if pos < at {
                before.push(r.split(at.min(end) - pos).0);
            }
            if end > cut_end {
                after.push(r.split(cut_end.max(pos) - pos).1);
            }
            pos = end;
        }

        let merged = normalize(
            before
                .into_iter()
                .chain(insert.iter().copied())
                .chain(after),
        );
        let new_bytes: usize = merged.iter().map(run::estimate_size).sum();
        let required = self.byte_size - old_bytes + new_bytes;
        if required > self.capacity {
            trace!(
                required,
                capacity = self.capacity,
                "block mutation refused"
            );
            return Err(CapacityExceeded {
                required,
                capacity: self.capacity,
            });
        }

        let inserted: u64 = insert.iter().map(SymbolRun::len).sum();
        self.units
            .splice(lo..hi, merged.iter().map(run::encode));
        self.byte_size = required;
        self.size = self.size - remove + inserted;
        Ok(())
    }

    /// Move `[at, size)` into a new block with the same budget.
    pub fn split_off(&mut self, at: u64) -> PackedSequenceBlock {
        debug_assert!(at <= self.size);
        let at = at.min(self.size);
        let (idx, start) = self.locate(at);
        let mut right_units: Vec<u64> = Vec::new();
        if idx < self.units.len() {
            if at == start {
                right_units = self.units.split_off(idx);
            } else {
                let (left, right) = run::decode(self.units[idx]).split(at - start);
                right_units.push(run::encode(&right.compacted()));
                right_units.extend_from_slice(&self.units[idx + 1..]);
                self.units.truncate(idx);
                self.units.push(run::encode(&left.compacted()));
            }
        }
        let right = Self::from_units(self.capacity, right_units);
        self.size -= right.size;
        self.byte_size = self.units.iter().map(|&u| run::estimate_size(&run::decode(u))).sum();
        right
    }

    /// Append `other`, merging the runs at the seam.
    pub fn append(&mut self, other: &PackedSequenceBlock) -> std::result::Result<(), CapacityExceeded> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() {
            let required = other.byte_size;
            if required > self.capacity {
                return Err(CapacityExceeded {
                    required,
                    capacity: self.capacity,
                });
            }
            self.units = other.units.clone();
            self.size = other.size;
            self.byte_size = other.byte_size;
            return Ok(());
        }
        let at = self.size;
        let runs: RunScratch = other.runs().collect();
        self.splice(at, 0, &runs)
    }

    fn from_units(capacity: usize, units: Vec<u64>) -> Self {
        let mut size = 0u64;
        let mut byte_size = 0usize;
        for &unit in &units {
            let r = run::decode(unit);
            size += r.len();
            byte_size += run::estimate_size(&r);
        }
        Self {
            units,
            size,
            byte_size,
            capacity,
        }
    }

    /// Verify every unit decodes to a fitting, non-empty run and that the
    /// block metadata matches the runs.
    pub fn check(&self) -> Result<()> {
        let mut size = 0u64;
        let mut bytes = 0usize;
        for (idx, &unit) in self.units.iter().enumerate() {
            let r = run::try_decode(unit)
                .ok_or_else(|| Error::structure(format!("run {idx} is malformed: {unit:#018x}")))?;
            if r.is_empty() {
                return Err(Error::structure(format!("run {idx} is empty")));
            }
            size += r.len();
            bytes += run::estimate_size(&r);
        }
        if size != self.size {
            return Err(Error::structure(format!(
                "block size {} does not match runs ({size})",
                self.size
            )));
        }
        if bytes != self.byte_size {
            return Err(Error::structure(format!(
                "block byte size {} does not match runs ({bytes})",
                self.byte_size
            )));
        }
        if bytes > self.capacity {
            return Err(Error::structure(format!(
                "block byte size {bytes} exceeds capacity {}",
                self.capacity
            )));
        }
        Ok(())
    }
}

/// Runs for `len` copies of `symbol`, chunked to the longest fitting repeat.
pub(crate) fn repeats(symbol: u8, mut len: u64) -> RunScratch {
    let chunk = run::max_run_length(1) + 1;
    let mut out = SmallVec::new();
    while len > 0 {
        let n = len.min(chunk);
        out.push(SymbolRun::repeat(symbol, n));
        len -= n;
    }
    out
}

/// Drop empty runs and greedily merge neighbours.
fn normalize<I>(runs: I) -> RunScratch
where
    I: IntoIterator<Item = SymbolRun>,
{
    let mut out: RunScratch = SmallVec::new();
    for r in runs {
        if r.is_empty() {
            continue;
        }
        let r = r.normalized().compacted();
        if let Some(last) = out.last_mut() {
            if let Some(joined) = last.concat(&r) {
                *last = joined;
                continue;
            }
        }
        out.push(r);
    }
    out
}
