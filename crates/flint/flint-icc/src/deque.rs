//! Growable Chase–Lev work-stealing deque.
//!
//! One owner thread pushes and pops at the bottom end; any number of thieves
//! steal from the top end. The owner works on the freshest (cache-warm) tasks
//! while thieves pick up the oldest ones.
//!
//! # Cursors
//! - `top`: next index to steal. Advanced by CAS, by thieves and by the
//!   owner when it races them for the last element.
//! - `bottom`: next index to push. Written only by the owner.
//!
//! Both are signed: `pop` speculatively decrements `bottom` before checking
//! for emptiness, and on an empty deque that dips below `top`.
//!
//! # Growth and reclamation
//! When `push` finds the array full it copies the live range `[top, bottom)`
//! into an array of twice the capacity and installs it. Thieves may still be
//! reading the old array, so it is retired to the `crossbeam-epoch` collector
//! and only freed once every thread that could have loaded it has unpinned.

use crate::ring::CachePadded;
use crate::wait::WaitStrategy;
use crossbeam_epoch::{self as epoch, Atomic, Owned};
use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering, fence};

/// Arrays at least this large are pushed to the global collector right away
/// instead of waiting in the thread-local bag.
const FLUSH_THRESHOLD: usize = 1 << 10;

/// Power-of-two backing array. Never drops its contents; the deque decides
/// which slots hold live values.
struct Buffer<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

impl<T> Buffer<T> {
    fn alloc(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Self { slots }
    }

    #[inline(always)]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    fn at(&self, index: isize) -> *mut MaybeUninit<T> {
        self.slots[(index as usize) & (self.capacity() - 1)].get()
    }

    /// # Safety
    /// Only the owner writes, and never into a slot in the live range.
    #[inline(always)]
    unsafe fn write(&self, index: isize, value: T) {
        unsafe { std::ptr::write_volatile(self.at(index), MaybeUninit::new(value)) }
    }

    /// Bitwise copy of a slot. Only becomes a `T` once the caller has won
    /// ownership of that index.
    #[inline(always)]
    unsafe fn read(&self, index: isize) -> MaybeUninit<T> {
        unsafe { std::ptr::read_volatile(self.at(index)) }
    }

    /// Copies the live range into a fresh array of `capacity` slots.
    ///
    /// # Safety
    /// Owner only; `[top, bottom)` must be the live range.
    unsafe fn resize(&self, bottom: isize, top: isize, capacity: usize) -> Self {
        let grown = Self::alloc(capacity);
        let mut i = top;
        while i != bottom {
            unsafe { std::ptr::copy_nonoverlapping(self.at(i), grown.at(i), 1) };
            i = i.wrapping_add(1);
        }
        grown
    }
}

struct Inner<T> {
    top: CachePadded<AtomicIsize>,
    bottom: CachePadded<AtomicIsize>,
    buffer: CachePadded<Atomic<Buffer<T>>>,
}

// SAFETY: values move between threads only through the cursor protocol; the
// buffer pointer is protected by epoch pinning.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let top = *self.top.0.get_mut();
        let bottom = *self.bottom.0.get_mut();
        // SAFETY: `&mut self` means no worker or stealer is left, so nothing
        // else can observe the buffer.
        unsafe {
            let buffer = self.buffer.load(Ordering::Relaxed, epoch::unprotected());
            let mut i = top;
            while i != bottom {
                (*buffer.deref().at(i)).assume_init_drop();
                i = i.wrapping_add(1);
            }
            drop(buffer.into_owned());
        }
    }
}

/// Result of a steal attempt.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steal<T> {
    /// Nothing to steal.
    Empty,
    /// Took the oldest element.
    Success(T),
    /// Lost a race with the owner or another thief. The deque may still
    /// hold elements; try again.
    Retry,
}

impl<T> Steal<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Steal::Empty)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Steal::Success(_))
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Steal::Retry)
    }

    pub fn success(self) -> Option<T> {
        match self {
            Steal::Success(v) => Some(v),
            _ => None,
        }
    }
}

/// Owner end of the deque. `Send` but not `Sync`: exactly one thread pushes
/// and pops.
pub struct Worker<T> {
    inner: Arc<Inner<T>>,
    _unsync: PhantomData<Cell<()>>,
}

/// Thief end of the deque. Cheap to clone, shareable between threads.
pub struct Stealer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Worker<T> {
    /// Creates an empty deque with room for `capacity` elements before the
    /// first growth.
    ///
    /// # Panics
    /// Panics if `capacity` is not a power of 2.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "deque capacity must be a power of 2");
        let inner = Inner {
            top: CachePadded(AtomicIsize::new(0)),
            bottom: CachePadded(AtomicIsize::new(0)),
            buffer: CachePadded(Atomic::new(Buffer::alloc(capacity))),
        };
        Self {
            inner: Arc::new(inner),
            _unsync: PhantomData,
        }
    }

    pub fn stealer(&self) -> Stealer<T> {
        Stealer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Pushes onto the bottom end, growing the array if it is full.
    pub fn push(&self, value: T) {
        let inner = &*self.inner;
        let b = inner.bottom.load(Ordering::Relaxed);
        // Acquire: fullness is decided on a recent `top`.
        let t = inner.top.load(Ordering::Acquire);

        // SAFETY: only the owner replaces the buffer, so the current one
        // cannot be retired while we hold it.
        let mut buffer = unsafe { inner.buffer.load(Ordering::Relaxed, epoch::unprotected()) };
        let capacity = unsafe { buffer.deref() }.capacity();
        if capacity as isize - 1 < b.wrapping_sub(t) {
            self.grow(b, t, capacity * 2);
            buffer = unsafe { inner.buffer.load(Ordering::Relaxed, epoch::unprotected()) };
        }

        // SAFETY: index `b` is outside the live range.
        unsafe { buffer.deref().write(b, value) };

        // Thieves must never see the new bottom before the slot write.
        fence(Ordering::Release);
        inner.bottom.store(b.wrapping_add(1), Ordering::Relaxed);
    }

    /// Pops from the bottom end (the most recently pushed element).
    pub fn pop(&self) -> Option<T> {
        let inner = &*self.inner;
        let b = inner.bottom.load(Ordering::Relaxed).wrapping_sub(1);
        // SAFETY: owner-side load, see `push`.
        let buffer = unsafe { inner.buffer.load(Ordering::Relaxed, epoch::unprotected()) };
        inner.bottom.store(b, Ordering::Relaxed);

        // Thieves must see the reserved bottom before we read top.
        fence(Ordering::SeqCst);
        let t = inner.top.load(Ordering::Relaxed);

        let len = b.wrapping_sub(t);
        if len < 0 {
            // Already empty.
            inner.bottom.store(t, Ordering::Relaxed);
            return None;
        }

        // SAFETY: index `b` is in the live range we just reserved.
        let value = unsafe { buffer.deref().read(b) };
        if len == 0 {
            // Last element: race the thieves for it.
            let won = inner
                .top
                .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            inner.bottom.store(t.wrapping_add(1), Ordering::Relaxed);
            if !won {
                return None;
            }
        }
        // SAFETY: we own index `b`: either it was not the last element, or we
        // won the CAS for it.
        Some(unsafe { value.assume_init() })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity of the backing array.
    pub fn capacity(&self) -> usize {
        // SAFETY: owner-side load, see `push`.
        unsafe {
            self.inner
                .buffer
                .load(Ordering::Relaxed, epoch::unprotected())
                .deref()
                .capacity()
        }
    }

    #[cold]
    fn grow(&self, bottom: isize, top: isize, capacity: usize) {
        let inner = &*self.inner;
        let guard = &epoch::pin();
        let old = inner.buffer.load(Ordering::Relaxed, guard);
        // SAFETY: owner only, `[top, bottom)` is live.
        let grown = unsafe { old.deref().resize(bottom, top, capacity) };
        let old = inner
            .buffer
            .swap(Owned::new(grown).into_shared(guard), Ordering::Release, guard);
        // SAFETY: the old array is unreachable from the deque now; pinned
        // thieves may still read it until they unpin.
        unsafe { guard.defer_destroy(old) };
        if capacity >= FLUSH_THRESHOLD {
            guard.flush();
        }
        tracing::debug!(capacity, live = bottom.wrapping_sub(top), "work-stealing deque grew");
    }
}

impl<T> Stealer<T> {
    /// Steals the oldest element from the top end.
    ///
    /// [`Steal::Retry`] means another thread got there first, not that the
    /// deque is empty.
    pub fn steal(&self) -> Steal<T> {
        let inner = &*self.inner;
        let guard = &epoch::pin();

        let t = inner.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = inner.bottom.load(Ordering::Acquire);
        if b.wrapping_sub(t) <= 0 {
            return Steal::Empty;
        }

        let buffer = inner.buffer.load(Ordering::Acquire, guard);
        // SAFETY: the pin keeps this array alive even if the owner retires it.
        let value = unsafe { buffer.deref().read(t) };

        if inner
            .top
            .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return Steal::Retry;
        }
        // SAFETY: winning the CAS made index `t` ours.
        Steal::Success(unsafe { value.assume_init() })
    }

    /// Steals, retrying lost races while `wait` agrees. `None` means the
    /// deque was seen empty or `wait` gave up.
    pub fn steal_with<W: WaitStrategy>(&self, wait: &mut W) -> Option<T> {
        loop {
            match self.steal() {
                Steal::Success(v) => return Some(v),
                Steal::Empty => return None,
                Steal::Retry => {
                    if !wait.wait() {
                        return None;
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        let guard = &epoch::pin();
        let buffer = self.inner.buffer.load(Ordering::Acquire, guard);
        // SAFETY: pinned for the duration of the access.
        unsafe { buffer.deref() }.capacity()
    }
}

impl<T> Inner<T> {
    fn len(&self) -> usize {
        let t = self.top.load(Ordering::Acquire);
        let b = self.bottom.load(Ordering::Acquire);
        b.wrapping_sub(t).max(0) as usize
    }
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker").field("len", &self.len()).finish_non_exhaustive()
    }
}

impl<T> fmt::Debug for Stealer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stealer").field("len", &self.len()).finish_non_exhaustive()
    }
}
