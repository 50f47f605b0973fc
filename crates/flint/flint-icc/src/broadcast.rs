//! Single-producer, multi-consumer (SPMC) broadcast ring buffer.
//!
//! One writer publishes values that any number of independent readers can
//! observe, in-process or across processes when the ring lives in a shared
//! memory segment (see [`crate::shm`]).
//!
//! # Design
//! - **Writer**: never waits and never learns whether readers exist. Each
//!   publish fills the next slot and stamps it with the new cursor.
//! - **Readers**: each keeps its own "next expected" cursor and polls the slot
//!   it maps to. Readers share no mutable state with each other.
//! - **Overrun**: a reader that falls more than `N` entries behind finds a
//!   newer stamp in its slot. It takes that value and resumes after it; the
//!   entries in between are gone, like datagrams on a multicast group.
//!
//! Readers start at the next value to be written, so they must be created
//! before the writer starts if they need the full stream.
//!
//! # Thread Safety
//! - `BroadcastWriter` is `Send` but NOT `Sync`; only one may exist per ring.
//! - `BroadcastReader` is `Send` but NOT `Sync` (each reader is independent).

use crate::ring::{Capacity, CachePadded, apply_overrun_policy, seq_to_index};
use crate::seqlock::{SlotRead, StampedSlot};
use crate::wait::WaitStrategy;
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[repr(C)]
struct WriterState {
    /// Last cursor published. Written only by the writer.
    cursor: AtomicU64,
    /// Set while a safely obtained writer handle is alive.
    claimed: AtomicBool,
}

/// Fixed-capacity broadcast ring. `N` must be a power of 2.
///
/// The element type must be `Copy`: readers copy values out of slots that
/// the writer may overwrite at any time.
#[repr(C, align(128))]
pub struct BroadcastRing<T: Copy, const N: usize> {
    slots: [StampedSlot<T>; N],
    writer: CachePadded<WriterState>,
}

// SAFETY: slot access is mediated by the stamp protocol; only one writer
// handle can exist and readers only ever copy.
unsafe impl<T: Copy + Send, const N: usize> Send for BroadcastRing<T, N> {}
unsafe impl<T: Copy + Send, const N: usize> Sync for BroadcastRing<T, N> {}

type PhantomUnsync = PhantomData<Cell<()>>;

/// The writer side of a [`BroadcastRing`].
pub struct BroadcastWriter<'a, T: Copy, const N: usize> {
    ring: &'a BroadcastRing<T, N>,
    /// Local copy of the write cursor; no other thread ever changes it.
    cursor: u64,
    /// Whether dropping this handle releases the claim flag.
    claimed: bool,
    _unsync: PhantomUnsync,
}

/// The reader side of a [`BroadcastRing`].
#[derive(Clone)]
pub struct BroadcastReader<'a, T: Copy, const N: usize> {
    ring: &'a BroadcastRing<T, N>,
    /// Cursor of the next value this reader expects.
    next: u64,
    /// Entries skipped because the writer lapped this reader.
    overruns: u64,
    _unsync: PhantomUnsync,
}

impl<T: Copy, const N: usize> BroadcastRing<T, N> {
    const MASK: u64 = Capacity::<N>::MASK;

    pub const fn new() -> Self {
        let _ = Self::MASK;
        Self {
            slots: [const { StampedSlot::new() }; N],
            writer: CachePadded(WriterState {
                cursor: AtomicU64::new(0),
                claimed: AtomicBool::new(false),
            }),
        }
    }

    /// Allocates an empty ring directly on the heap.
    pub fn new_boxed() -> Box<Self> {
        let _ = Self::MASK;
        let layout = std::alloc::Layout::new::<Self>();
        // SAFETY: non-zero sized; zeroed slots carry stamp 0 ("never
        // written"), cursor 0 and an unclaimed writer: a valid empty ring.
        unsafe {
            let ptr = std::alloc::alloc_zeroed(layout) as *mut Self;
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    /// Claims the writer side, or `None` if a claimed writer is still alive.
    pub fn writer(&self) -> Option<BroadcastWriter<'_, T, N>> {
        self.writer
            .claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        Some(BroadcastWriter {
            ring: self,
            cursor: self.writer.cursor.load(Ordering::Acquire),
            claimed: true,
            _unsync: PhantomData,
        })
    }

    /// Returns a writer without touching the claim flag.
    ///
    /// Meant for rings in shared memory, where a crashed writer process
    /// would leave the flag set forever. The writer resumes from the cursor
    /// stored in the ring.
    ///
    /// # Safety
    /// No other writer for this ring may be alive, in any process.
    pub unsafe fn writer_unchecked(&self) -> BroadcastWriter<'_, T, N> {
        BroadcastWriter {
            ring: self,
            cursor: self.writer.cursor.load(Ordering::Acquire),
            claimed: false,
            _unsync: PhantomData,
        }
    }

    /// A reader that will see everything published from now on.
    pub fn reader(&self) -> BroadcastReader<'_, T, N> {
        let cursor = self.writer.cursor.load(Ordering::Acquire);
        self.reader_from(cursor.wrapping_add(1))
    }

    /// A reader whose next expected cursor is `next`.
    ///
    /// Cursors already overwritten are treated as an overrun on first read.
    /// The first cursor ever published is 1, so `0` starts there too.
    pub fn reader_from(&self, next: u64) -> BroadcastReader<'_, T, N> {
        BroadcastReader {
            ring: self,
            next: next.max(1),
            overruns: 0,
            _unsync: PhantomData,
        }
    }

    /// Last cursor the writer published (0 before the first write).
    pub fn write_cursor(&self) -> u64 {
        self.writer.cursor.load(Ordering::Acquire)
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline(always)]
    fn slot(&self, seq: u64) -> &StampedSlot<T> {
        &self.slots[seq_to_index(seq, Self::MASK)]
    }
}

impl<T: Copy, const N: usize> Default for BroadcastRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T: Copy, const N: usize> BroadcastWriter<'a, T, N> {
    /// Publishes the value built by `make` into the next slot.
    ///
    /// Never waits: whatever the slot held before is overwritten.
    #[inline(always)]
    pub fn write<F: FnOnce() -> T>(&mut self, make: F) {
        let next = self.cursor.wrapping_add(1);
        // SAFETY: this handle is the ring's only writer.
        unsafe { self.ring.slot(next).write(next, make()) };
        self.cursor = next;
        // Only consulted when a new reader picks its starting point.
        self.ring.writer.cursor.store(next, Ordering::Release);
    }

    #[inline(always)]
    pub fn publish(&mut self, value: T) {
        self.write(|| value);
    }

    /// Last cursor published by this writer.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn ring(&self) -> &'a BroadcastRing<T, N> {
        self.ring
    }
}

impl<T: Copy, const N: usize> Drop for BroadcastWriter<'_, T, N> {
    fn drop(&mut self) {
        if self.claimed {
            self.ring.writer.claimed.store(false, Ordering::Release);
        }
    }
}

impl<'a, T: Copy, const N: usize> BroadcastReader<'a, T, N> {
    /// Returns the next value at or after the expected cursor, or `None` if
    /// nothing new has been published.
    ///
    /// After an overrun the reader silently resumes at whatever the slot
    /// currently holds; see [`BroadcastReader::overruns`].
    #[inline(always)]
    pub fn read(&mut self) -> Option<T> {
        match self.ring.slot(self.next).read(self.next) {
            SlotRead::Fresh { stamp, value } => {
                apply_overrun_policy(stamp, self.next, &mut self.overruns);
                self.next = stamp.wrapping_add(1);
                Some(value)
            }
            SlotRead::Stale | SlotRead::InFlight => None,
        }
    }

    /// Drains everything available and returns only the newest value.
    pub fn read_last(&mut self) -> Option<T> {
        let mut last = None;
        while let Some(v) = self.read() {
            last = Some(v);
        }
        last
    }

    /// Polls [`BroadcastReader::read`] until a value arrives or `wait` gives up.
    pub fn poll<W: WaitStrategy>(&mut self, wait: &mut W) -> Option<T> {
        loop {
            if let Some(v) = self.read() {
                return Some(v);
            }
            if !wait.wait() {
                return None;
            }
        }
    }

    /// Total entries skipped because the writer lapped this reader.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Cursor of the next value this reader expects.
    pub fn next_cursor(&self) -> u64 {
        self.next
    }

    pub fn ring(&self) -> &'a BroadcastRing<T, N> {
        self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_claimed_writer() {
        let ring = BroadcastRing::<u64, 8>::new();
        let w = ring.writer().unwrap();
        assert!(ring.writer().is_none());
        drop(w);
        assert!(ring.writer().is_some());
    }

    #[test]
    fn reader_created_before_writes_sees_all() {
        let ring = BroadcastRing::<u64, 8>::new();
        let mut r = ring.reader();
        let mut w = ring.writer().unwrap();
        for i in 0..5 {
            w.publish(i);
        }
        for i in 0..5 {
            assert_eq!(r.read(), Some(i));
        }
        assert_eq!(r.read(), None);
        assert_eq!(r.overruns(), 0);
    }

    #[test]
    fn late_reader_only_sees_new_values() {
        let ring = BroadcastRing::<u64, 8>::new();
        let mut w = ring.writer().unwrap();
        w.publish(1);
        w.publish(2);
        let mut r = ring.reader();
        assert_eq!(r.read(), None);
        w.publish(3);
        assert_eq!(r.read(), Some(3));
    }

    #[test]
    fn lapped_reader_jumps_forward_and_counts() {
        let ring = BroadcastRing::<u64, 4>::new();
        let mut r = ring.reader();
        let mut w = ring.writer().unwrap();
        // Cursors 1..=10; slot of cursor 1 now holds cursor 9.
        for i in 1..=10 {
            w.publish(i * 100);
        }
        assert_eq!(r.read(), Some(900));
        assert_eq!(r.overruns(), 8);
        assert_eq!(r.read(), Some(1000));
        assert_eq!(r.read(), None);
    }

    #[test]
    fn read_last_keeps_newest() {
        let ring = BroadcastRing::<u32, 16>::new();
        let mut r = ring.reader();
        let mut w = ring.writer().unwrap();
        assert_eq!(r.read_last(), None);
        for i in 0..6 {
            w.publish(i);
        }
        assert_eq!(r.read_last(), Some(5));
        assert_eq!(r.read(), None);
    }

    #[test]
    fn unchecked_writer_resumes_cursor() {
        let ring = BroadcastRing::<u32, 8>::new_boxed();
        {
            let mut w = unsafe { ring.writer_unchecked() };
            w.publish(1);
            w.publish(2);
        }
        let w = unsafe { ring.writer_unchecked() };
        assert_eq!(w.cursor(), 2);
        assert_eq!(ring.write_cursor(), 2);
    }

    #[test]
    fn cloned_reader_is_independent() {
        let ring = BroadcastRing::<u32, 8>::new();
        let mut a = ring.reader();
        let mut w = ring.writer().unwrap();
        w.publish(1);
        w.publish(2);
        assert_eq!(a.read(), Some(1));
        let mut b = a.clone();
        assert_eq!(a.read(), Some(2));
        assert_eq!(b.read(), Some(2));
        assert_eq!(a.read(), None);
        assert_eq!(b.read(), None);
    }
}
