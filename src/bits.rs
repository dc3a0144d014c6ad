//! Word-level bit utilities.
//!
//! Select-in-word has two implementations behind [`BitSelect`]: [`Hardware`]
//! uses BMI2 `pdep` + `tzcnt` when the CPU supports it, [`Portable`] is a
//! plain scan. Both must agree bit for bit.

/// Mask of the `len` low bits. `len >= 64` yields all ones.
#[inline]
pub fn low_mask(len: u32) -> u64 {
    if len >= 64 {
        u64::MAX
    } else {
        (1u64 << len) - 1
    }
}

/// Number of significant bits of `value` (`0` for `0`).
#[inline]
pub fn bit_width(value: u64) -> u32 {
    64 - value.leading_zeros()
}

// =============================================================================
// Parallel bit deposit
// =============================================================================

#[inline]
pub(crate) fn pdep_u64_fallback(value: u64, mut mask: u64) -> u64 {
    let mut out = 0u64;
    let mut src_bit = 1u64;
    while mask != 0 {
        let lsb = mask & mask.wrapping_neg();
        if (value & src_bit) != 0 {
            out |= lsb;
        }
        mask ^= lsb;
        src_bit <<= 1;
    }
    out
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "bmi2")]
unsafe fn pdep_u64_bmi2(value: u64, mask: u64) -> u64 {
    // SAFETY: Caller guarantees BMI2.
    core::arch::x86_64::_pdep_u64(value, mask)
}

/// Deposit the low bits of `value` into the set positions of `mask`.
#[inline]
pub fn pdep_u64(value: u64, mask: u64) -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        if std::is_x86_feature_detected!("bmi2") {
            // SAFETY: feature detected at runtime.
            return unsafe { pdep_u64_bmi2(value, mask) };
        }
    }
    pdep_u64_fallback(value, mask)
}

// =============================================================================
// Select in word
// =============================================================================

/// Position of the `rank`-th (zero-based) set bit of a word.
///
/// Callers guarantee `rank < word.count_ones()`; otherwise the result is 64.
pub trait BitSelect {
    fn select1(word: u64, rank: u32) -> u32;
}

/// Linear scan bounded by the word width. Runs on every target.
#[derive(Debug, Clone, Copy, Default)]
pub struct Portable;

impl BitSelect for Portable {
    #[inline]
    fn select1(word: u64, rank: u32) -> u32 {
        let mut seen = 0u32;
        for bit in 0..64u32 {
            if (word >> bit) & 1 != 0 {
                if seen == rank {
                    return bit;
                }
                seen += 1;
            }
        }
        64
    }
}

/// `pdep(1 << rank, word)` then count trailing zeros.
///
/// Without BMI2 the deposit goes through the portable loop, so the result is
/// identical on every target.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hardware;

impl BitSelect for Hardware {
    #[inline]
    fn select1(word: u64, rank: u32) -> u32 {
        if rank >= 64 {
            return 64;
        }
        pdep_u64(1u64 << rank, word).trailing_zeros()
    }
}
