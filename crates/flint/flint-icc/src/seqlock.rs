//! Stamped seqlock slot for the broadcast ring.
//!
//! Each slot carries one atomic word that plays two roles at once:
//!
//! ```text
//!  63                                  1   0
//! ┌─────────────────────────────────────┬───┐
//! │ stamp: cursor that last filled slot │ W │
//! └─────────────────────────────────────┴───┘
//!                                  W = write in progress
//! ```
//!
//! **Writer** (only one per ring):
//! 1. Store `stamp << 1 | 1` (write in progress)
//! 2. Release fence, then write data
//! 3. Store `stamp << 1` with Release (write complete)
//!
//! **Reader**:
//! 1. Load the word with Acquire; a stamp older than expected means nothing new
//! 2. Copy the data
//! 3. Acquire fence, reload the word; if it changed the copy may be torn, retry
//!
//! The zeroed word (stamp 0, not writing) is the "never written" state. The
//! first cursor ever published is 1, and `read` reports stamp 0 as stale
//! whatever cursor the reader expects.

use crate::ring::seq_before;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering, fence};

const WRITING: u64 = 1;

/// Outcome of a single read attempt on a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRead<T> {
    /// The slot holds something older than what the reader expects next.
    Stale,
    /// A newer value is being written right now.
    InFlight,
    /// A complete value and the cursor that published it.
    Fresh { stamp: u64, value: T },
}

/// A slot protected by a stamped sequence lock.
#[repr(C, align(64))]
pub struct StampedSlot<T: Copy> {
    word: AtomicU64,
    data: UnsafeCell<MaybeUninit<T>>,
}

impl<T: Copy> StampedSlot<T> {
    pub const fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
            data: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Stamp of the last completed write (0 if never written).
    #[inline(always)]
    pub fn stamp(&self) -> u64 {
        self.word.load(Ordering::Acquire) >> 1
    }

    /// Writes `value` and publishes it under `stamp`.
    ///
    /// # Safety
    /// Only one thread may write to a given slot at a time. The broadcast
    /// writer guarantees this by being the only writer of the whole ring.
    #[inline(always)]
    pub unsafe fn write(&self, stamp: u64, value: T) {
        self.word.store((stamp << 1) | WRITING, Ordering::Relaxed);
        // Readers that see the new data must also see the in-flight mark.
        fence(Ordering::Release);
        // SAFETY: single writer; readers never hand out the bytes they copy
        // while the word is odd or changed under them.
        unsafe { std::ptr::write_volatile(self.data.get(), MaybeUninit::new(value)) };
        self.word.store(stamp << 1, Ordering::Release);
    }

    /// One attempt at reading a value published at or after `expected`.
    #[inline(always)]
    pub fn read(&self, expected: u64) -> SlotRead<T> {
        loop {
            let w1 = self.word.load(Ordering::Acquire);
            let stamp = w1 >> 1;
            if stamp == 0 || seq_before(stamp, expected) {
                return SlotRead::Stale;
            }
            if w1 & WRITING != 0 {
                return SlotRead::InFlight;
            }

            // SAFETY: `write` stores a non-zero even stamp only after the data
            // is in place, and stamp 0 was rejected above, so the slot has
            // been fully written at least once. A racing overwrite is
            // detected below and the possibly torn copy is discarded unused.
            let copy = unsafe { std::ptr::read_volatile(self.data.get()) };

            fence(Ordering::Acquire);
            let w2 = self.word.load(Ordering::Relaxed);
            if w1 == w2 {
                // SAFETY: the word did not move while copying, so the copy is
                // the complete value published under `stamp`.
                let value = unsafe { copy.assume_init() };
                return SlotRead::Fresh { stamp, value };
            }

            // Overwritten while copying; look again.
            std::hint::spin_loop();
        }
    }
}

impl<T: Copy> Default for StampedSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_slot_is_stale() {
        let slot = StampedSlot::<u64>::new();
        assert_eq!(slot.stamp(), 0);
        assert_eq!(slot.read(1), SlotRead::Stale);
    }

    #[test]
    fn zeroed_slot_is_stale_even_for_cursor_zero() {
        let slot = StampedSlot::<u64>::new();
        assert_eq!(slot.read(0), SlotRead::Stale);
        assert_eq!(slot.read(u64::MAX), SlotRead::Stale);
    }

    #[test]
    fn write_then_read() {
        let slot = StampedSlot::<u64>::new();
        unsafe { slot.write(1, 99) };
        assert_eq!(slot.stamp(), 1);
        assert_eq!(slot.read(1), SlotRead::Fresh { stamp: 1, value: 99 });
        // A reader already past this stamp sees nothing new.
        assert_eq!(slot.read(2), SlotRead::Stale);
    }

    #[test]
    fn newer_stamp_is_fresh_for_lagging_reader() {
        let slot = StampedSlot::<u32>::new();
        unsafe { slot.write(9, 5) };
        assert_eq!(slot.read(1), SlotRead::Fresh { stamp: 9, value: 5 });
    }

    #[test]
    fn in_flight_mark_blocks_readers() {
        let slot = StampedSlot::<u32>::new();
        slot.word.store((3 << 1) | WRITING, Ordering::Relaxed);
        assert_eq!(slot.read(3), SlotRead::InFlight);
        assert_eq!(slot.read(4), SlotRead::Stale);
    }
}
