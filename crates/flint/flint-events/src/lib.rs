pub mod sample;
pub use sample::{Beacon, Sample};

// SAFETY: both are `repr(C)` structs of integers with no pointers, and any
// bytes a writer of the same type leaves in a slot form a valid value.
unsafe impl flint_icc::shm::ShmElement for Sample {}
unsafe impl flint_icc::shm::ShmElement for Beacon {}
