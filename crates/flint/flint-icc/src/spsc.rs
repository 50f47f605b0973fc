//! Bounded single-producer, single-consumer (SPSC) ring buffer.
//!
//! One producer and one consumer exchange values through a fixed array of
//! `N` slots. Nothing is ever lost: when the ring is full the producer is
//! told so and decides whether to retry, drop or spin.
//!
//! # Design
//! - **Write cursor**: advanced only by the producer, released after the slot
//!   is filled so the consumer never sees an index before its data.
//! - **Read cursor**: advanced only by the consumer, released after the slot
//!   has been consumed so the producer never overwrites live data.
//! - **Cached cursors**: each handle keeps its own copy of the other side's
//!   cursor and only pays for an acquire load when the copy says full/empty.
//!
//! Both cursors live on separate cache-line pairs so the two threads never
//! contend on the same line.
//!
//! The all-zero byte pattern is a valid empty ring, which is what lets a
//! freshly created shared-memory segment be used without an init pass.
//!
//! # Thread Safety
//! - `Producer` and `Consumer` are `Send` but NOT `Sync`.
//! - At most one of each may exist per ring at a time. [`RingBuffer::split`]
//!   enforces this through the borrow checker; the `unsafe` accessors leave it
//!   to the caller (needed when the ring is shared between processes).

use crate::ring::{Capacity, CachePadded, seq_to_index};
use crate::wait::WaitStrategy;
use std::alloc::{Layout, alloc_zeroed, handle_alloc_error};
use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-capacity SPSC ring. `N` must be a power of 2 (checked at compile time).
#[repr(C, align(128))]
pub struct RingBuffer<T, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    /// Next cursor the producer will fill.
    write: CachePadded<AtomicU64>,
    /// Next cursor the consumer will read.
    read: CachePadded<AtomicU64>,
}

// SAFETY: slots are handed back and forth by the cursor protocol; a slot is
// only touched by the side that currently owns it.
unsafe impl<T: Send, const N: usize> Send for RingBuffer<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for RingBuffer<T, N> {}

/// Marker to opt out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<()>>;

/// Write end of a [`RingBuffer`].
pub struct Producer<'a, T, const N: usize> {
    ring: &'a RingBuffer<T, N>,
    /// Last read cursor observed; refreshed only when the ring looks full.
    read_cache: u64,
    _unsync: PhantomUnsync,
}

/// Read end of a [`RingBuffer`].
pub struct Consumer<'a, T, const N: usize> {
    ring: &'a RingBuffer<T, N>,
    /// Last write cursor observed; refreshed only when the ring looks empty.
    write_cache: u64,
    _unsync: PhantomUnsync,
}

impl<T, const N: usize> RingBuffer<T, N> {
    const MASK: u64 = Capacity::<N>::MASK;

    /// Creates an empty ring in place.
    ///
    /// Large rings should use [`RingBuffer::new_boxed`] to avoid building the
    /// slot array on the stack.
    pub const fn new() -> Self {
        let _ = Self::MASK;
        Self {
            slots: [const { UnsafeCell::new(MaybeUninit::uninit()) }; N],
            write: CachePadded(AtomicU64::new(0)),
            read: CachePadded(AtomicU64::new(0)),
        }
    }

    /// Allocates an empty ring directly on the heap.
    pub fn new_boxed() -> Box<Self> {
        let _ = Self::MASK;
        let layout = Layout::new::<Self>();
        // SAFETY: the layout is non-zero sized (two padded cursors), and the
        // all-zero pattern is a valid empty ring: both cursors at 0, every
        // slot uninitialised.
        unsafe {
            let ptr = alloc_zeroed(layout) as *mut Self;
            if ptr.is_null() {
                handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    /// Splits the ring into its two ends.
    ///
    /// The exclusive borrow guarantees no other producer or consumer exists
    /// while the returned handles are alive.
    pub fn split(&mut self) -> (Producer<'_, T, N>, Consumer<'_, T, N>) {
        let this: &Self = self;
        // SAFETY: `&mut self` rules out any other handle for this lifetime.
        unsafe { (this.producer(), this.consumer()) }
    }

    /// Returns a producer handle.
    ///
    /// # Safety
    /// No other `Producer` for this ring may be alive at the same time, in
    /// this process or any other process mapping the same memory.
    pub unsafe fn producer(&self) -> Producer<'_, T, N> {
        Producer {
            ring: self,
            read_cache: self.read.load(Ordering::Acquire),
            _unsync: PhantomData,
        }
    }

    /// Returns a consumer handle.
    ///
    /// # Safety
    /// No other `Consumer` for this ring may be alive at the same time, in
    /// this process or any other process mapping the same memory.
    pub unsafe fn consumer(&self) -> Consumer<'_, T, N> {
        Consumer {
            ring: self,
            write_cache: self.read.load(Ordering::Relaxed),
            _unsync: PhantomData,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of published, unconsumed values. A snapshot under concurrency.
    pub fn len(&self) -> usize {
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        (write.wrapping_sub(read) as usize).min(N)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    fn slot(&self, seq: u64) -> *mut MaybeUninit<T> {
        self.slots[seq_to_index(seq, Self::MASK)].get()
    }
}

impl<T, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for RingBuffer<T, N> {
    fn drop(&mut self) {
        if !std::mem::needs_drop::<T>() {
            return;
        }
        let read = *self.read.0.get_mut();
        let write = *self.write.0.get_mut();
        let mut seq = read;
        while seq != write {
            // SAFETY: every cursor in [read, write) holds a published value.
            unsafe { (*self.slot(seq)).assume_init_drop() };
            seq = seq.wrapping_add(1);
        }
    }
}

impl<'a, T, const N: usize> Producer<'a, T, N> {
    /// Returns the next writable slot, or `None` if the ring is full.
    ///
    /// The slot is not visible to the consumer until [`Producer::push`].
    #[inline]
    pub fn alloc(&mut self) -> Option<&mut MaybeUninit<T>> {
        // Relaxed: we are the only writer of this cursor.
        let write = self.ring.write.load(Ordering::Relaxed);
        if write.wrapping_sub(self.read_cache) >= N as u64 {
            // Cold path: the cached read cursor says full, look at the real one.
            self.read_cache = self.ring.read.load(Ordering::Acquire);
            if write.wrapping_sub(self.read_cache) >= N as u64 {
                return None;
            }
        }
        // SAFETY: write - read < N, so the consumer is not looking at this
        // slot, and it stays ours until the write cursor is released.
        Some(unsafe { &mut *self.ring.slot(write) })
    }

    /// Publishes the slot returned by the last [`Producer::alloc`].
    ///
    /// # Safety
    /// The previous call on this handle must have been an `alloc` that
    /// returned `Some`, and that slot must have been initialised since.
    #[inline]
    pub unsafe fn push(&mut self) {
        let write = self.ring.write.load(Ordering::Relaxed);
        // Release: the slot contents happen-before the consumer's acquire of
        // the new cursor.
        self.ring
            .write
            .store(write.wrapping_add(1), Ordering::Release);
    }

    /// Pushes `value`, handing it back if the ring is full.
    #[inline]
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        match self.alloc() {
            Some(slot) => {
                slot.write(value);
                // SAFETY: the slot from this alloc was just initialised.
                unsafe { self.push() };
                Ok(())
            }
            None => Err(value),
        }
    }

    /// Builds a value with `make` only if a slot is free, then pushes it.
    #[inline]
    pub fn try_push_with<F: FnOnce() -> T>(&mut self, make: F) -> bool {
        match self.alloc() {
            Some(slot) => {
                slot.write(make());
                // SAFETY: the slot from this alloc was just initialised.
                unsafe { self.push() };
                true
            }
            None => false,
        }
    }

    /// Spins on [`Producer::try_push`] until it succeeds.
    ///
    /// There is no backoff and no way out; use [`Producer::block_push_with`]
    /// when the wait must be bounded.
    #[inline]
    pub fn block_push(&mut self, mut value: T) {
        loop {
            match self.try_push(value) {
                Ok(()) => return,
                Err(v) => {
                    value = v;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Retries [`Producer::try_push`] while `wait` agrees to keep waiting.
    ///
    /// # Errors
    /// Returns `Err(value)` once `wait` gives up.
    pub fn block_push_with<W: WaitStrategy>(&mut self, mut value: T, wait: &mut W) -> Result<(), T> {
        loop {
            match self.try_push(value) {
                Ok(()) => return Ok(()),
                Err(v) => {
                    if !wait.wait() {
                        return Err(v);
                    }
                    value = v;
                }
            }
        }
    }

    pub fn ring(&self) -> &'a RingBuffer<T, N> {
        self.ring
    }
}

impl<'a, T, const N: usize> Consumer<'a, T, N> {
    /// Cursor of the next readable slot, if any.
    #[inline(always)]
    fn readable(&mut self) -> Option<u64> {
        let read = self.ring.read.load(Ordering::Relaxed);
        if read == self.write_cache {
            // Acquire: pairs with the producer's release in `push`.
            self.write_cache = self.ring.write.load(Ordering::Acquire);
            if read == self.write_cache {
                return None;
            }
        }
        Some(read)
    }

    /// Returns the next readable value without consuming it.
    #[inline]
    pub fn front(&mut self) -> Option<&T> {
        let read = self.readable()?;
        // SAFETY: read < write, so the slot holds a published value that the
        // producer will not touch until we release the read cursor.
        Some(unsafe { (*self.ring.slot(read)).assume_init_ref() })
    }

    /// Consumes the value returned by [`Consumer::front`].
    ///
    /// Returns `false` and leaves the cursor alone when nothing is readable.
    #[inline]
    pub fn pop(&mut self) -> bool {
        let Some(read) = self.readable() else {
            return false;
        };
        // SAFETY: same ownership argument as `front`; the value is dropped
        // exactly once here before the slot is handed back.
        unsafe { (*self.ring.slot(read)).assume_init_drop() };
        self.ring
            .read
            .store(read.wrapping_add(1), Ordering::Release);
        true
    }

    /// Moves the next value out of the ring.
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        let read = self.readable()?;
        // SAFETY: published slot owned by the consumer; the bitwise copy is
        // the only live owner once the read cursor moves past it.
        let value = unsafe { (*self.ring.slot(read)).assume_init_read() };
        self.ring
            .read
            .store(read.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Lets `inspect` look at the next value in place, then consumes it.
    #[inline]
    pub fn try_pop_with<F: FnOnce(&T)>(&mut self, inspect: F) -> bool {
        match self.front() {
            Some(v) => inspect(v),
            None => return false,
        }
        self.pop()
    }

    pub fn ring(&self) -> &'a RingBuffer<T, N> {
        self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::Deadline;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn boxed_ring_starts_empty() {
        let mut ring = RingBuffer::<u64, 16>::new_boxed();
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 16);
        let (_tx, mut rx) = ring.split();
        assert!(rx.front().is_none());
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn pop_on_empty_leaves_cursors_alone() {
        let mut ring = RingBuffer::<u32, 4>::new();
        let (mut tx, mut rx) = ring.split();
        assert!(!rx.pop());
        assert!(!rx.pop());
        tx.try_push(7).unwrap();
        assert_eq!(rx.try_pop(), Some(7));
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn two_phase_alloc_push() {
        let mut ring = RingBuffer::<u32, 4>::new();
        let (mut tx, mut rx) = ring.split();

        tx.alloc().unwrap().write(11);
        // Not visible before push.
        assert!(rx.front().is_none());
        unsafe { tx.push() };
        assert_eq!(rx.front(), Some(&11));
        assert!(rx.pop());
    }

    #[test]
    fn try_push_with_skips_builder_when_full() {
        let mut ring = RingBuffer::<u32, 2>::new();
        let (mut tx, _rx) = ring.split();
        assert!(tx.try_push_with(|| 1));
        assert!(tx.try_push_with(|| 2));
        let mut called = false;
        assert!(!tx.try_push_with(|| {
            called = true;
            3
        }));
        assert!(!called);
    }

    #[test]
    fn try_pop_with_sees_value_in_place() {
        let mut ring = RingBuffer::<String, 4>::new();
        let (mut tx, mut rx) = ring.split();
        tx.try_push("a".to_string()).unwrap();
        let mut seen = String::new();
        assert!(rx.try_pop_with(|s| seen.push_str(s)));
        assert_eq!(seen, "a");
        assert!(!rx.try_pop_with(|_| panic!("empty ring")));
    }

    #[test]
    fn block_push_with_gives_value_back() {
        let mut ring = RingBuffer::<u32, 1>::new();
        let (mut tx, _rx) = ring.split();
        tx.block_push(1);
        let mut wait = Deadline::after(Duration::from_millis(1));
        assert_eq!(tx.block_push_with(2, &mut wait), Err(2));
    }

    #[test]
    fn drop_releases_unconsumed_values() {
        let token = Rc::new(());
        {
            let mut ring = RingBuffer::<Rc<()>, 8>::new();
            let (mut tx, mut rx) = ring.split();
            for _ in 0..5 {
                tx.try_push(Rc::clone(&token)).unwrap();
            }
            assert!(rx.pop());
            assert_eq!(Rc::strong_count(&token), 5);
        }
        assert_eq!(Rc::strong_count(&token), 1);
    }

    #[test]
    fn len_tracks_both_cursors() {
        let mut ring = RingBuffer::<u8, 8>::new();
        {
            let (mut tx, mut rx) = ring.split();
            for i in 0..6 {
                tx.try_push(i).unwrap();
            }
            rx.try_pop().unwrap();
        }
        assert_eq!(ring.len(), 5);
    }
}
