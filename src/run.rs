//! Run codec for the succinct run-length (SSRLE) symbol encoding.
//!
//! A run is a literal pattern of binary symbols followed by `run_length`
//! additional repetitions of the pattern's last symbol. Every run packs into
//! one 64-bit code unit:
//!
//! ```text
//! bit 0                                                          bit 63
//! [L:6][run_length:L][pattern:pattern_length][terminator:1][zero padding]
//! ```
//!
//! `L` is the bit width of `run_length` (zero when `run_length == 0`). The
//! terminator bit is the code-size field of the 1-bit alphabet: its position
//! gives the pattern length. Symbol `i` of the pattern is bit `i`.

use crate::bits::{bit_width, low_mask, BitSelect, Hardware};

/// Number of distinct symbols (1 bit per symbol).
pub const SYMBOLS: usize = 2;

pub const CODE_UNIT_BITS: u32 = 64;
/// Width of the run-length bit-width field.
pub const LEN_BITS: u32 = 6;
/// Width of the code-size (pattern terminator) field.
pub const CODE_SIZE_BITS: u32 = 1;
pub const HEADER_BITS: u32 = LEN_BITS + CODE_SIZE_BITS;
/// Bits left for pattern and run length together.
pub const DATA_BITS: u32 = CODE_UNIT_BITS - HEADER_BITS;

// =============================================================================
// Capacity functions
// =============================================================================

#[inline]
pub fn run_length_bitsize(run_length: u64) -> u32 {
    bit_width(run_length)
}

/// True iff a run with these lengths fits one code unit.
#[inline]
pub fn is_fit(pattern_length: u32, run_length: u64) -> bool {
    pattern_length <= DATA_BITS
        && HEADER_BITS + pattern_length + run_length_bitsize(run_length) <= CODE_UNIT_BITS
}

#[inline]
pub const fn max_pattern_length() -> u32 {
    DATA_BITS
}

/// Largest run length that still fits next to a pattern of this length.
#[inline]
pub fn max_run_length(pattern_length: u32) -> u64 {
    if pattern_length > DATA_BITS {
        return 0;
    }
    low_mask(DATA_BITS - pattern_length)
}

#[inline]
pub fn encoded_bits(run: &SymbolRun) -> u32 {
    HEADER_BITS + run.pattern_length + run_length_bitsize(run.run_length)
}

/// Encoded length of a run in bytes, rounded up.
#[inline]
pub fn estimate_size(run: &SymbolRun) -> usize {
    encoded_bits(run).div_ceil(8) as usize
}

// =============================================================================
// Encode / decode
// =============================================================================

/// Pack a run into a code unit. The run must satisfy [`is_fit`].
#[inline]
pub fn encode(run: &SymbolRun) -> u64 {
    debug_assert!(is_fit(run.pattern_length, run.run_length));
    let len_bits = run_length_bitsize(run.run_length);
    let body = run.pattern | (1u64 << run.pattern_length);
    u64::from(len_bits) | (run.run_length << LEN_BITS) | (body << (LEN_BITS + len_bits))
}

/// Unpack a code unit produced by [`encode`].
#[inline]
pub fn decode(unit: u64) -> SymbolRun {
    let len_bits = (unit & low_mask(LEN_BITS)) as u32;
    let run_length = (unit >> LEN_BITS) & low_mask(len_bits);
    let body = unit.checked_shr(LEN_BITS + len_bits).unwrap_or(0);
    let pattern_length = if body == 0 { 0 } else { 63 - body.leading_zeros() };
    SymbolRun {
        pattern: body & low_mask(pattern_length),
        pattern_length,
        run_length,
    }
}

/// Like [`decode`], but rejects units that [`encode`] can never produce.
pub fn try_decode(unit: u64) -> Option<SymbolRun> {
    let len_bits = (unit & low_mask(LEN_BITS)) as u32;
    if len_bits > DATA_BITS {
        return None;
    }
    let body = unit >> (LEN_BITS + len_bits);
    if body == 0 {
        return None;
    }
    let run = decode(unit);
    if run_length_bitsize(run.run_length) != len_bits || !is_fit(run.pattern_length, run.run_length)
    {
        return None;
    }
    Some(run)
}

// =============================================================================
// SymbolRun
// =============================================================================

/// One decoded run. A default run is empty.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SymbolRun {
    pattern: u64,
    pattern_length: u32,
    run_length: u64,
}

impl std::fmt::Debug for SymbolRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymbolRun(")?;
        for i in 0..self.pattern_length {
            write!(f, "{}", (self.pattern >> i) & 1)?;
        }
        write!(f, " +{})", self.run_length)
    }
}

impl SymbolRun {
    /// Bits of `pattern` above `pattern_length` are dropped.
    #[inline]
    pub fn new(pattern: u64, pattern_length: u32, run_length: u64) -> Self {
        Self {
            pattern: pattern & low_mask(pattern_length),
            pattern_length,
            run_length,
        }
    }

    /// `count` copies of one symbol. Empty when `count == 0`.
    #[inline]
    pub fn repeat(symbol: u8, count: u64) -> Self {
        if count == 0 {
            return Self::default();
        }
        Self::new(u64::from(symbol & 1), 1, count - 1)
    }

    /// Literal run over `symbols`, compacted. At most
    /// [`max_pattern_length`] symbols.
    pub fn from_symbols(symbols: &[u8]) -> Self {
        debug_assert!(symbols.len() <= max_pattern_length() as usize);
        let mut pattern = 0u64;
        for (i, &s) in symbols.iter().enumerate() {
            pattern |= u64::from(s & 1) << i;
        }
        Self::new(pattern, symbols.len() as u32, 0).compacted()
    }

    #[inline]
    pub fn pattern(&self) -> u64 {
        self.pattern
    }

    #[inline]
    pub fn pattern_length(&self) -> u32 {
        self.pattern_length
    }

    #[inline]
    pub fn run_length(&self) -> u64 {
        self.run_length
    }

    /// Logical number of symbols: pattern plus repeated tail.
    #[inline]
    pub fn len(&self) -> u64 {
        u64::from(self.pattern_length) + self.run_length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Symbol repeated by the tail. An empty pattern repeats `0`.
    #[inline]
    pub fn last_symbol(&self) -> u8 {
        if self.pattern_length == 0 {
            0
        } else {
            ((self.pattern >> (self.pattern_length - 1)) & 1) as u8
        }
    }

    /// Symbol at `idx < len()`.
    #[inline]
    pub fn symbol(&self, idx: u64) -> u8 {
        debug_assert!(idx < self.len());
        if idx < u64::from(self.pattern_length) {
            ((self.pattern >> idx) & 1) as u8
        } else {
            self.last_symbol()
        }
    }

    /// Pattern bits set where the pattern holds `symbol`.
    #[inline]
    fn symbol_word(&self, symbol: u8) -> u64 {
        if symbol & 1 == 1 {
            self.pattern
        } else {
            !self.pattern & low_mask(self.pattern_length)
        }
    }

    // -------------------------------------------------------------------------
    // Pattern-local primitives
    // -------------------------------------------------------------------------

    #[inline]
    pub fn pattern_rank(&self, symbol: u8) -> u64 {
        u64::from(self.symbol_word(symbol).count_ones())
    }

    /// Occurrences of `symbol` among the first `idx` pattern symbols.
    #[inline]
    pub fn pattern_rank_to(&self, idx: u32, symbol: u8) -> u64 {
        let idx = idx.min(self.pattern_length);
        u64::from((self.symbol_word(symbol) & low_mask(idx)).count_ones())
    }

    /// Adds the pattern's symbol counts into `sink` (index 0 = "0").
    #[inline]
    pub fn pattern_ranks(&self, sink: &mut [u64; SYMBOLS]) {
        let ones = u64::from(self.pattern.count_ones());
        sink[1] += ones;
        sink[0] += u64::from(self.pattern_length) - ones;
    }

    #[inline]
    pub fn pattern_ranks_to(&self, idx: u32, sink: &mut [u64; SYMBOLS]) {
        let idx = idx.min(self.pattern_length);
        let ones = u64::from((self.pattern & low_mask(idx)).count_ones());
        sink[1] += ones;
        sink[0] += u64::from(idx) - ones;
    }

    /// Pattern position of the `rank`-th (zero-based) `symbol`.
    #[inline]
    pub fn pattern_select_fw(&self, rank: u64, symbol: u8) -> Option<u32> {
        self.pattern_select_fw_with::<Hardware>(rank, symbol)
    }

    pub fn pattern_select_fw_with<S: BitSelect>(&self, rank: u64, symbol: u8) -> Option<u32> {
        let word = self.symbol_word(symbol);
        if rank >= u64::from(word.count_ones()) {
            return None;
        }
        Some(S::select1(word, rank as u32))
    }

    /// Length of the block of `symbol` starting at pattern position `start`.
    #[inline]
    pub fn pattern_count_fw(&self, start: u32, symbol: u8) -> u32 {
        if start >= self.pattern_length {
            return 0;
        }
        let word = self.symbol_word(symbol) >> start;
        word.trailing_ones().min(self.pattern_length - start)
    }

    /// Length of the block of `symbol` ending at pattern position `start`
    /// (inclusive), scanning backwards.
    #[inline]
    pub fn pattern_count_bw(&self, start: u32, symbol: u8) -> u32 {
        if start >= self.pattern_length {
            return 0;
        }
        let word = self.symbol_word(symbol) << (63 - start);
        word.leading_ones().min(start + 1)
    }

    // -------------------------------------------------------------------------
    // Whole-run primitives (pattern plus tail)
    // -------------------------------------------------------------------------

    /// Occurrences of `symbol` in `[0, idx)`, `idx <= len()`.
    #[inline]
    pub fn rank(&self, idx: u64, symbol: u8) -> u64 {
        let pl = u64::from(self.pattern_length);
        if idx <= pl {
            self.pattern_rank_to(idx as u32, symbol)
        } else if self.last_symbol() == symbol & 1 {
            self.pattern_rank(symbol) + (idx.min(self.len()) - pl)
        } else {
            self.pattern_rank(symbol)
        }
    }

    #[inline]
    pub fn count(&self, symbol: u8) -> u64 {
        self.rank(self.len(), symbol)
    }

    #[inline]
    pub fn ranks(&self, sink: &mut [u64; SYMBOLS]) {
        self.pattern_ranks(sink);
        sink[usize::from(self.last_symbol())] += self.run_length;
    }

    pub fn ranks_to(&self, idx: u64, sink: &mut [u64; SYMBOLS]) {
        let pl = u64::from(self.pattern_length);
        if idx <= pl {
            self.pattern_ranks_to(idx as u32, sink);
        } else {
            self.pattern_ranks(sink);
            sink[usize::from(self.last_symbol())] += idx.min(self.len()) - pl;
        }
    }

    /// Position of the `rank`-th (zero-based) `symbol` in the whole run.
    #[inline]
    pub fn select_fw(&self, rank: u64, symbol: u8) -> Option<u64> {
        self.select_fw_with::<Hardware>(rank, symbol)
    }

    pub fn select_fw_with<S: BitSelect>(&self, rank: u64, symbol: u8) -> Option<u64> {
        let in_pattern = self.pattern_rank(symbol);
        if rank < in_pattern {
            return self
                .pattern_select_fw_with::<S>(rank, symbol)
                .map(u64::from);
        }
        // Tail hit: plain arithmetic.
        let tail_rank = rank - in_pattern;
        if self.last_symbol() == symbol & 1 && tail_rank < self.run_length {
            Some(u64::from(self.pattern_length) + tail_rank)
        } else {
            None
        }
    }

    /// Distance from `start` to the next position not holding `symbol`.
    pub fn count_fw(&self, start: u64, symbol: u8) -> u64 {
        let pl = u64::from(self.pattern_length);
        if start >= self.len() {
            return 0;
        }
        let same_tail = self.last_symbol() == symbol & 1;
        if start >= pl {
            return if same_tail { self.len() - start } else { 0 };
        }
        let cnt = u64::from(self.pattern_count_fw(start as u32, symbol));
        if start + cnt == pl && same_tail {
            cnt + self.run_length
        } else {
            cnt
        }
    }

    /// Length of the block of `symbol` ending at `start` (inclusive).
    pub fn count_bw(&self, start: u64, symbol: u8) -> u64 {
        let pl = u64::from(self.pattern_length);
        if start >= self.len() {
            return 0;
        }
        if start < pl {
            return u64::from(self.pattern_count_bw(start as u32, symbol));
        }
        if self.last_symbol() != symbol & 1 {
            return 0;
        }
        let tail = start - pl + 1;
        if pl == 0 {
            tail
        } else {
            tail + u64::from(self.pattern_count_bw(self.pattern_length - 1, symbol))
        }
    }

    // -------------------------------------------------------------------------
    // Structural operations
    // -------------------------------------------------------------------------

    /// True iff every symbol of the run equals `symbol`.
    #[inline]
    pub fn is_uniform(&self, symbol: u8) -> bool {
        if self.pattern_length == 0 {
            return symbol & 1 == 0;
        }
        self.pattern_count_fw(0, symbol) == self.pattern_length
    }

    /// Replace an empty pattern by an explicit `0` so the tail symbol is
    /// carried by the pattern.
    #[inline]
    pub(crate) fn normalized(self) -> Self {
        if self.pattern_length == 0 && self.run_length > 0 && is_fit(1, self.run_length - 1) {
            Self::new(0, 1, self.run_length - 1)
        } else {
            self
        }
    }

    /// Move a uniform pattern suffix into the run length. Never grows the
    /// encoding.
    pub fn compacted(self) -> Self {
        if self.pattern_length < 2 {
            return self;
        }
        let last = self.last_symbol();
        let same = self.pattern_count_bw(self.pattern_length - 1, last);
        if same < 2 {
            return self;
        }
        let pattern_length = self.pattern_length - same + 1;
        Self::new(
            self.pattern,
            pattern_length,
            self.run_length + u64::from(same - 1),
        )
    }

    /// Split into `[0, at)` and `[at, len())`. Either side may be empty.
    pub fn split(&self, at: u64) -> (SymbolRun, SymbolRun) {
        debug_assert!(at <= self.len());
        let at = at.min(self.len());
        let pl = u64::from(self.pattern_length);
        if self.pattern_length == 0 {
            return (Self::repeat(0, at), Self::repeat(0, self.run_length - at));
        }
        let last = self.last_symbol();
        if at <= pl {
            let left = Self::new(self.pattern, at as u32, 0);
            let right = if at < pl {
                Self::new(self.pattern >> at, (pl - at) as u32, self.run_length)
            } else {
                Self::repeat(last, self.run_length)
            };
            (left, right)
        } else {
            let taken = at - pl;
            let left = Self::new(self.pattern, self.pattern_length, taken);
            (left, Self::repeat(last, self.run_length - taken))
        }
    }

    /// Concatenate `self` followed by `next` into one run if the result fits
    /// a code unit.
    pub fn concat(&self, next: &SymbolRun) -> Option<SymbolRun> {
        if next.is_empty() {
            return Some(*self);
        }
        if self.is_empty() {
            return Some(next.compacted());
        }
        let next = next.normalized();
        let last = self.last_symbol();

        if next.is_uniform(last) {
            let run_length = self.run_length.checked_add(next.len())?;
            if is_fit(self.pattern_length, run_length) {
                return Some(Self::new(self.pattern, self.pattern_length, run_length));
            }
        }

        // Expand our tail into a literal and append the next pattern.
        let literal = u64::from(self.pattern_length) + self.run_length + u64::from(next.pattern_length);
        if literal > u64::from(DATA_BITS) || !is_fit(literal as u32, next.run_length) {
            return None;
        }
        let tail_at = u64::from(self.pattern_length) + self.run_length;
        let tail = if last == 1 {
            low_mask(self.run_length as u32) << self.pattern_length
        } else {
            0
        };
        let pattern = self.pattern | tail | (next.pattern << tail_at);
        Some(Self::new(pattern, literal as u32, next.run_length).compacted())
    }

    /// Iterate the run's symbols.
    pub fn symbols(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.len()).map(move |i| self.symbol(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::Portable;

    fn expand(run: &SymbolRun) -> Vec<u8> {
        run.symbols().collect()
    }

    #[test]
    fn test_encode_decode_literal() {
        let run = SymbolRun::new(0b10110, 5, 0);
        assert_eq!(estimate_size(&run), 2);
        let unit = encode(&run);
        assert_eq!(decode(unit), run);
        assert_eq!(try_decode(unit), Some(run));
        assert_eq!(expand(&run), vec![0, 1, 1, 0, 1]);
    }

    #[test]
    fn test_unit_field_order() {
        // L = 2, run_length = 0b11, pattern 0b10110 under terminator bit 5.
        let run = SymbolRun::new(0b10110, 5, 3);
        let unit = encode(&run);
        assert_eq!(unit, 2 | (3 << 6) | (0b110110 << 8));
        assert_eq!(unit, 14_018);
        assert_eq!(encoded_bits(&run), 16);
        assert_eq!(decode(unit), run);
        // Pure run of one extra symbol: L = 1, run_length = 1, terminator at bit 7.
        assert_eq!(encode(&SymbolRun::new(0, 0, 1)), 1 | (1 << 6) | (1 << 7));
    }

    #[test]
    fn test_encode_decode_extremes() {
        let longest = SymbolRun::new(u64::MAX, max_pattern_length(), 0);
        assert!(is_fit(longest.pattern_length(), longest.run_length()));
        assert_eq!(decode(encode(&longest)), longest);
        assert_eq!(estimate_size(&longest), 8);

        let repeat = SymbolRun::new(1, 1, max_run_length(1));
        assert!(is_fit(1, repeat.run_length()));
        assert!(!is_fit(1, max_run_length(1) + 1));
        assert_eq!(decode(encode(&repeat)), repeat);

        let pure = SymbolRun::new(0, 0, 12);
        assert_eq!(decode(encode(&pure)), pure);
        assert_eq!(expand(&pure), vec![0; 12]);
    }

    #[test]
    fn test_try_decode_rejects_garbage() {
        assert_eq!(try_decode(0), None);
        assert_eq!(try_decode(63), None);
    }

    #[test]
    fn test_capacity_functions() {
        assert_eq!(max_pattern_length(), 57);
        assert_eq!(max_run_length(57), 0);
        assert_eq!(max_run_length(50), 127);
        assert!(is_fit(50, 127));
        assert!(!is_fit(50, 128));
        assert!(!is_fit(58, 0));
    }

    #[test]
    fn test_rank_and_ranks() {
        // 1 0 1 1 then 5 more 1s
        let run = SymbolRun::new(0b1101, 4, 5);
        assert_eq!(run.len(), 9);
        assert_eq!(run.pattern_rank(1), 3);
        assert_eq!(run.pattern_rank(0), 1);
        assert_eq!(run.pattern_rank_to(2, 1), 1);
        assert_eq!(run.rank(9, 1), 8);
        assert_eq!(run.rank(6, 1), 5);
        assert_eq!(run.rank(6, 0), 1);

        let mut sink = [0u64; SYMBOLS];
        run.pattern_ranks(&mut sink);
        assert_eq!(sink, [1, 3]);
        let mut sink = [0u64; SYMBOLS];
        run.pattern_ranks_to(2, &mut sink);
        assert_eq!(sink, [1, 1]);
        let mut sink = [0u64; SYMBOLS];
        run.ranks(&mut sink);
        assert_eq!(sink, [1, 8]);
    }

    #[test]
    fn test_select_pattern_and_tail() {
        let run = SymbolRun::new(0b0110, 4, 3); // 0 1 1 0 0 0 0
        assert_eq!(run.select_fw(0, 1), Some(1));
        assert_eq!(run.select_fw(1, 1), Some(2));
        assert_eq!(run.select_fw(2, 1), None);
        assert_eq!(run.select_fw(0, 0), Some(0));
        assert_eq!(run.select_fw(1, 0), Some(3));
        assert_eq!(run.select_fw(2, 0), Some(4));
        assert_eq!(run.select_fw(4, 0), Some(6));
        assert_eq!(run.select_fw(5, 0), None);
    }

    #[test]
    fn test_select_fallback_matches_hardware() {
        let run = SymbolRun::new(0x1_5A5A_F0F0_1234, 49, 9);
        for symbol in 0..2u8 {
            for rank in 0..=run.count(symbol) {
                assert_eq!(
                    run.select_fw_with::<Portable>(rank, symbol),
                    run.select_fw_with::<Hardware>(rank, symbol)
                );
            }
        }
    }

    #[test]
    fn test_counts() {
        let run = SymbolRun::new(0b1100, 4, 2); // 0 0 1 1 1 1
        assert_eq!(run.pattern_count_fw(0, 0), 2);
        assert_eq!(run.pattern_count_fw(2, 1), 2);
        assert_eq!(run.count_fw(2, 1), 4);
        assert_eq!(run.count_fw(0, 1), 0);
        assert_eq!(run.count_fw(5, 1), 1);
        assert_eq!(run.pattern_count_bw(1, 0), 2);
        assert_eq!(run.count_bw(5, 1), 4);
        assert_eq!(run.count_bw(1, 0), 2);
        assert_eq!(run.count_bw(1, 1), 0);
    }

    #[test]
    fn test_compacted_moves_uniform_suffix() {
        let run = SymbolRun::new(0b11100, 5, 0).compacted();
        assert_eq!(run.pattern_length(), 3);
        assert_eq!(run.run_length(), 2);
        assert_eq!(expand(&run), vec![0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_split_every_position() {
        let run = SymbolRun::new(0b01101, 5, 3);
        let full = expand(&run);
        for at in 0..=run.len() {
            let (l, r) = run.split(at);
            let mut joined = expand(&l);
            joined.extend(expand(&r));
            assert_eq!(joined, full, "at={at}");
            assert_eq!(l.len(), at);
        }
    }

    #[test]
    fn test_concat_tail_extension_and_literal() {
        let a = SymbolRun::repeat(1, 4);
        let b = SymbolRun::repeat(1, 3);
        let ab = a.concat(&b).unwrap();
        assert_eq!(ab, SymbolRun::repeat(1, 7));

        let c = SymbolRun::repeat(0, 2);
        let ac = a.concat(&c).unwrap();
        assert_eq!(expand(&ac), vec![1, 1, 1, 1, 0, 0]);

        let zeros = SymbolRun::new(0, 0, 3);
        let az = a.concat(&zeros).unwrap();
        assert_eq!(expand(&az), vec![1, 1, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_concat_refuses_oversized_literal() {
        let a = SymbolRun::new(0x0155_5555_5555_5555, 57, 0);
        let b = SymbolRun::new(0b10, 2, 0);
        assert_eq!(a.concat(&b), None);
    }
}
