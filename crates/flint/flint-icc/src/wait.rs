//! Call-site policies for spinning on a queue probe.
//!
//! Every queue in this crate only exposes non-blocking probes. The blocking
//! helpers (`block_push_with`, `BroadcastReader::poll`, `Stealer::steal_with`)
//! loop on a probe and ask a [`WaitStrategy`] what to do after each miss.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Decides whether to keep waiting after a failed attempt.
pub trait WaitStrategy {
    /// Called once per failed attempt. Returning `false` abandons the wait.
    fn wait(&mut self) -> bool;
}

/// Pure busy-spin. Never gives up.
#[derive(Debug, Default, Clone, Copy)]
pub struct Spin;

impl WaitStrategy for Spin {
    #[inline(always)]
    fn wait(&mut self) -> bool {
        std::hint::spin_loop();
        true
    }
}

/// Exponential spin that falls back to yielding the thread. Never gives up.
#[derive(Debug, Default, Clone)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }
}

impl WaitStrategy for Backoff {
    #[inline]
    fn wait(&mut self) -> bool {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                std::hint::spin_loop();
            }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
        true
    }
}

/// Spins until a point in time, then gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    until: Instant,
}

impl Deadline {
    pub fn at(until: Instant) -> Self {
        Self { until }
    }

    pub fn after(timeout: std::time::Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }
}

impl WaitStrategy for Deadline {
    #[inline]
    fn wait(&mut self) -> bool {
        std::hint::spin_loop();
        Instant::now() < self.until
    }
}

/// Spins until another thread raises the flag.
#[derive(Debug, Clone, Copy)]
pub struct Cancel<'a> {
    flag: &'a AtomicBool,
}

impl<'a> Cancel<'a> {
    pub fn new(flag: &'a AtomicBool) -> Self {
        Self { flag }
    }
}

impl WaitStrategy for Cancel<'_> {
    #[inline]
    fn wait(&mut self) -> bool {
        std::hint::spin_loop();
        !self.flag.load(Ordering::Relaxed)
    }
}

impl<F: FnMut() -> bool> WaitStrategy for F {
    #[inline]
    fn wait(&mut self) -> bool {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn spin_and_backoff_never_give_up() {
        let mut spin = Spin;
        let mut backoff = Backoff::new();
        for _ in 0..32 {
            assert!(spin.wait());
            assert!(backoff.wait());
        }
    }

    #[test]
    fn deadline_expires() {
        let mut d = Deadline::after(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(2));
        assert!(!d.wait());
    }

    #[test]
    fn cancel_follows_flag() {
        let flag = AtomicBool::new(false);
        let mut c = Cancel::new(&flag);
        assert!(c.wait());
        flag.store(true, Ordering::Relaxed);
        assert!(!c.wait());
    }

    #[test]
    fn closures_are_strategies() {
        let mut left = 3;
        let mut f = || {
            left -= 1;
            left > 0
        };
        assert!(f.wait());
        assert!(f.wait());
        assert!(!f.wait());
    }
}
