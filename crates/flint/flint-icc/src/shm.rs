//! Placing queues in named shared-memory segments.
//!
//! A segment is sized to exactly `size_of::<Q>()` and mapped for the rest of
//! the process; the returned reference is `'static`. Two processes that
//! attach the same name with the same queue type see the same queue.
//!
//! Nothing checks that both sides agree on the type. Attaching one name with
//! two different queue definitions gives garbage to everyone.

use crate::broadcast::BroadcastRing;
use crate::spsc::RingBuffer;
use flint_mmap::ShmSegment;
use std::io;
use std::mem::{align_of, size_of};

pub use flint_mmap::{shm_path, unlink};

/// Types that can live in a shared-memory segment.
///
/// # Safety
/// The all-zero byte pattern must be a valid (empty) value, the type must not
/// need `Drop`, and it must stay meaningful when mapped at different
/// addresses in different processes.
pub unsafe trait ShmSafe: Sync {}

/// Element types that may be stored in a ring attached to shared memory.
///
/// ```compile_fail
/// // References point into one process's address space.
/// let _ = flint_icc::shm::attach::<flint_icc::BroadcastRing<&'static str, 4>>("x");
/// ```
///
/// # Safety
/// The type must be plain data: no pointers, references or function
/// pointers, and every byte pattern another process can write through the
/// queue must be a valid value.
pub unsafe trait ShmElement: Copy + Send {}

macro_rules! shm_element {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl ShmElement for $t {})*
    };
}

// SAFETY: integers and floats hold no pointers and every bit pattern is valid.
shm_element!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

// SAFETY: an array of plain data is plain data.
unsafe impl<T: ShmElement, const M: usize> ShmElement for [T; M] {}

// SAFETY: both rings are valid when zeroed and hold only atomics and
// `ShmElement` values inline.
unsafe impl<T: ShmElement, const N: usize> ShmSafe for RingBuffer<T, N> {}
unsafe impl<T: ShmElement, const N: usize> ShmSafe for BroadcastRing<T, N> {}

/// Opens (creating if absent) the segment `name`, sizes it for `Q` and maps it.
///
/// # Errors
/// Any open/resize/map failure, or `InvalidData` if the mapping does not fit
/// `Q`. Callers are expected to treat these as fatal.
pub fn attach<Q: ShmSafe>(name: &str) -> io::Result<&'static Q> {
    let bytes = size_of::<Q>();
    let mut segment = ShmSegment::open_or_create(name, bytes as u64)?;

    if segment.len() != bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("segment {name} is {} bytes, expected {bytes}", segment.len()),
        ));
    }
    if segment.as_mut_ptr().align_offset(align_of::<Q>()) != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("segment {name} is not aligned for the queue type"),
        ));
    }

    tracing::info!(name, bytes, path = %segment.path().display(), "attached shared queue");
    let base = segment.leak();
    // SAFETY: the mapping is exactly `size_of::<Q>()` bytes, suitably aligned,
    // never unmapped, and any byte pattern another process left behind was
    // produced by the same `Q` (or is zero from creation).
    Ok(unsafe { &*(base as *const Q) })
}
