//! Monotonic tick source and per-stage latency recorder for queue hot paths.
//!
//! [`now_ticks`] is always available: it reads the time-stamp counter with
//! `rdtscp` on x86_64 (which waits for earlier instructions to retire) and
//! falls back to `CLOCK_MONOTONIC` nanoseconds elsewhere. Ticks are only
//! comparable with other ticks from the same machine.
//!
//! When the `record` feature is **off**, `PerfRecorder` is a zero-sized type
//! and every method is an `#[inline(always)]` no-op.
//!
//! When `record` is **on**, each stage gets a pre-allocated
//! `[u64; MAX_SAMPLES]` buffer and `begin`/`end` pairs store elapsed ticks.

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PerfStage {
    Alloc = 0,
    Push = 1,
    Front = 2,
    Pop = 3,
    Write = 4,
    Read = 5,
    Steal = 6,
    EndToEnd = 7,
}

impl PerfStage {
    pub const ALL: [PerfStage; NUM_STAGES] = [
        PerfStage::Alloc,
        PerfStage::Push,
        PerfStage::Front,
        PerfStage::Pop,
        PerfStage::Write,
        PerfStage::Read,
        PerfStage::Steal,
        PerfStage::EndToEnd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PerfStage::Alloc => "alloc",
            PerfStage::Push => "push",
            PerfStage::Front => "front",
            PerfStage::Pop => "pop",
            PerfStage::Write => "write",
            PerfStage::Read => "read",
            PerfStage::Steal => "steal",
            PerfStage::EndToEnd => "end_to_end",
        }
    }
}

pub const NUM_STAGES: usize = 8;
pub const MAX_SAMPLES: usize = 262_144; // 256K per stage

/// Reads the tick counter.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn now_ticks() -> u64 {
    let mut aux = 0u32;
    // SAFETY: rdtscp is available on every x86_64 CPU we target and has no
    // memory side effects.
    unsafe { core::arch::x86_64::__rdtscp(&mut aux) }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn now_ticks() -> u64 {
    now_ns()
}

/// Monotonic nanoseconds.
#[inline(always)]
pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}

/// Average cost of one [`now_ticks`] call, to subtract from short measurements.
pub fn tick_overhead() -> u64 {
    const ROUNDS: u64 = 100;
    let before = now_ticks();
    for _ in 0..ROUNDS - 1 {
        std::hint::black_box(now_ticks());
    }
    let after = now_ticks();
    after.saturating_sub(before) / ROUNDS
}

// ─── Feature: record ON ─────────────────────────────────────────────────────

#[cfg(feature = "record")]
mod inner {
    use super::*;

    struct StageBuf {
        samples: Vec<u64>,
        pending: u64,
    }

    impl StageBuf {
        fn new() -> Self {
            Self {
                samples: Vec::with_capacity(MAX_SAMPLES),
                pending: 0,
            }
        }

        #[inline(always)]
        fn push(&mut self, v: u64) {
            if self.samples.len() < MAX_SAMPLES {
                self.samples.push(v);
            }
        }
    }

    pub struct PerfRecorder {
        stages: Vec<StageBuf>,
    }

    impl PerfRecorder {
        pub fn new() -> Self {
            Self {
                stages: (0..NUM_STAGES).map(|_| StageBuf::new()).collect(),
            }
        }

        #[inline(always)]
        pub fn begin(&mut self, stage: PerfStage) {
            self.stages[stage as usize].pending = now_ticks();
        }

        #[inline(always)]
        pub fn end(&mut self, stage: PerfStage) {
            let buf = &mut self.stages[stage as usize];
            let elapsed = now_ticks().saturating_sub(buf.pending);
            buf.push(elapsed);
        }

        #[inline(always)]
        pub fn record(&mut self, stage: PerfStage, ticks: u64) {
            self.stages[stage as usize].push(ticks);
        }

        pub fn samples(&self, stage: PerfStage) -> &[u64] {
            &self.stages[stage as usize].samples
        }

        pub fn count(&self, stage: PerfStage) -> usize {
            self.stages[stage as usize].samples.len()
        }

        /// Mean ticks for a stage, 0 if nothing was recorded.
        pub fn mean(&self, stage: PerfStage) -> u64 {
            let s = self.samples(stage);
            if s.is_empty() {
                0
            } else {
                s.iter().sum::<u64>() / s.len() as u64
            }
        }

        pub fn drain(&mut self, stage: PerfStage) {
            self.stages[stage as usize].samples.clear();
        }

        pub fn reset(&mut self) {
            for buf in self.stages.iter_mut() {
                buf.samples.clear();
            }
        }
    }

    impl Default for PerfRecorder {
        fn default() -> Self {
            Self::new()
        }
    }
}

// ─── Feature: record OFF (zero-cost stubs) ──────────────────────────────────

#[cfg(not(feature = "record"))]
mod inner {
    use super::*;

    pub struct PerfRecorder;

    impl PerfRecorder {
        #[inline(always)]
        pub fn new() -> Self {
            Self
        }
        #[inline(always)]
        pub fn begin(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn end(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn record(&mut self, _stage: PerfStage, _ticks: u64) {}
        #[inline(always)]
        pub fn samples(&self, _stage: PerfStage) -> &[u64] {
            &[]
        }
        #[inline(always)]
        pub fn count(&self, _stage: PerfStage) -> usize {
            0
        }
        #[inline(always)]
        pub fn mean(&self, _stage: PerfStage) -> u64 {
            0
        }
        #[inline(always)]
        pub fn drain(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn reset(&mut self) {}
    }

    impl Default for PerfRecorder {
        fn default() -> Self {
            Self
        }
    }
}

pub use inner::PerfRecorder;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_do_not_go_backwards_on_one_thread() {
        let a = now_ticks();
        let b = now_ticks();
        assert!(b >= a);
        let x = now_ns();
        let y = now_ns();
        assert!(y >= x);
    }

    #[test]
    fn stage_names_cover_all_stages() {
        for (i, s) in PerfStage::ALL.iter().enumerate() {
            assert_eq!(*s as usize, i);
            assert!(!s.name().is_empty());
        }
    }

    #[cfg(feature = "record")]
    #[test]
    fn records_and_drains() {
        let mut r = PerfRecorder::new();
        r.record(PerfStage::Push, 10);
        r.record(PerfStage::Push, 30);
        r.begin(PerfStage::Pop);
        r.end(PerfStage::Pop);
        assert_eq!(r.count(PerfStage::Push), 2);
        assert_eq!(r.mean(PerfStage::Push), 20);
        assert_eq!(r.count(PerfStage::Pop), 1);
        r.drain(PerfStage::Push);
        assert_eq!(r.count(PerfStage::Push), 0);
        r.reset();
        assert_eq!(r.count(PerfStage::Pop), 0);
    }

    #[cfg(not(feature = "record"))]
    #[test]
    fn disabled_recorder_is_zero_sized() {
        let mut r = PerfRecorder::new();
        r.record(PerfStage::Push, 10);
        assert_eq!(r.count(PerfStage::Push), 0);
        assert_eq!(std::mem::size_of::<PerfRecorder>(), 0);
    }
}
