//! Cursor arithmetic shared by the power-of-two ring types.
//!
//! Every cursor in this crate is a monotonically increasing counter. The
//! physical slot is found by masking with `capacity - 1`, which is why all
//! capacities must be powers of two.

/// Compile-time capacity check for const-generic rings.
///
/// Referencing `Capacity::<N>::MASK` in a constructor turns a bad `N` into a
/// build error instead of a runtime panic.
pub(crate) struct Capacity<const N: usize>;

impl<const N: usize> Capacity<N> {
    pub(crate) const MASK: u64 = {
        assert!(N.is_power_of_two(), "ring capacity must be a non-zero power of 2");
        (N as u64) - 1
    };
}

/// Converts a cursor to a slot index.
///
/// With `capacity = 8` (mask = 7 = `0b111`):
/// ```text
/// seq =  5 → 5 & 7 = 5
/// seq =  8 → 8 & 7 = 0  (wraps around)
/// seq = 15 → 15 & 7 = 7
/// ```
#[inline(always)]
pub fn seq_to_index(seq: u64, mask: u64) -> usize {
    (seq & mask) as usize
}

/// `true` when cursor `a` comes strictly before cursor `b`.
///
/// Compared through the signed distance so the answer stays right after the
/// counters wrap at `u64::MAX`.
#[inline(always)]
pub fn seq_before(a: u64, b: u64) -> bool {
    (a.wrapping_sub(b) as i64) < 0
}

/// Accounts for entries a broadcast reader skipped when it jumps from
/// `expected` to a newer stamp.
///
/// ```text
/// expected = 5, stamp = 12
/// skipped  = 12 - 5 = 7 entries lost
/// ```
#[inline(always)]
pub fn apply_overrun_policy(stamp: u64, expected: u64, overruns: &mut u64) {
    if seq_before(expected, stamp) {
        *overruns += stamp.wrapping_sub(expected);
    }
}

/// Pads and aligns a value to its own cache-line pair.
///
/// Adjacent-line prefetch on x86 pulls lines in pairs, so 128 bytes keeps
/// two cursors from ever sharing a prefetch unit.
#[repr(C, align(128))]
#[derive(Default)]
pub struct CachePadded<T>(pub T);

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.0
    }
}
