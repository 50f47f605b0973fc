#![forbid(unsafe_code)]

// Plain-old-data messages: fixed size, no pointers, so they can be copied
// byte for byte through a shared-memory queue.

/// Point-to-point message for the SPSC queue.
///
/// Carries between 1 and 4 consecutive values of a running counter so the
/// receiver can check nothing was lost or reordered.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    pub ts_ticks: u64,
    pub len: u32,
    pub _pad: u32,
    pub vals: [u64; Sample::MAX_VALS],
}

impl Sample {
    pub const MAX_VALS: usize = 4;

    /// Fills `len` consecutive values starting after `*counter`, advancing it.
    #[inline]
    pub fn consecutive(ts_ticks: u64, len: usize, counter: &mut u64) -> Self {
        let len = len.clamp(1, Self::MAX_VALS);
        let mut vals = [0; Self::MAX_VALS];
        for v in vals.iter_mut().take(len) {
            *counter += 1;
            *v = *counter;
        }
        Self {
            ts_ticks,
            len: len as u32,
            _pad: 0,
            vals,
        }
    }

    #[inline]
    pub fn values(&self) -> &[u64] {
        &self.vals[..(self.len as usize).min(Self::MAX_VALS)]
    }
}

/// Broadcast message for the SPMC ring: a sequence number plus filler that
/// brings it to one cache line, so a torn copy would be easy to spot.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Beacon {
    pub ts_ticks: u64,
    pub idx: u64,
    pub payload: [u8; 48],
}

impl Beacon {
    /// Every payload byte is derived from `idx`.
    #[inline]
    pub fn new(ts_ticks: u64, idx: u64) -> Self {
        Self {
            ts_ticks,
            idx,
            payload: [idx as u8; 48],
        }
    }

    /// `true` if the payload matches `idx`, i.e. the copy is not torn.
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.payload.iter().all(|&b| b == self.idx as u8)
    }
}

impl Default for Beacon {
    fn default() -> Self {
        Self::new(0, 0)
    }
}
