//! Modeled compute for one job.
//!
//! A job's WCET is consumed by busy work, never by sleeping: a job that
//! sleeps would leave the processor and hide exactly the interference
//! the harness is trying to measure.

use std::hint::{black_box, spin_loop};
use std::time::{Duration, Instant};

/// Consumes processor time on behalf of a job.
pub trait CpuBurner: Send + Sync {
    /// Keep the calling unit busy for `ms` milliseconds.
    fn burn(&self, ms: u32);
}

/// Iterations of arithmetic between clock reads.
const CHUNK: u32 = 256;

/// Busy loop calibrated against the wall clock.
///
/// Runs a fixed xorshift mix in chunks and checks elapsed time between
/// chunks, so the burn lasts at least `ms` of wall time regardless of
/// processor speed. Time spent preempted counts towards the burn.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinBurner;

impl SpinBurner {
    /// Burn for `duration`, returning the mix so the work cannot be elided.
    #[must_use]
    pub fn burn_for(duration: Duration) -> u64 {
        let start = Instant::now();
        let mut acc: u64 = 0x9E37_79B9_7F4A_7C15;
        while start.elapsed() < duration {
            for _ in 0..CHUNK {
                acc ^= acc << 13;
                acc ^= acc >> 7;
                acc ^= acc << 17;
                acc = black_box(acc);
            }
            spin_loop();
        }
        acc
    }
}

impl CpuBurner for SpinBurner {
    fn burn(&self, ms: u32) {
        if ms == 0 {
            return;
        }
        black_box(Self::burn_for(Duration::from_millis(u64::from(ms))));
    }
}

/// Zero-cost stand-in that returns immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBurner;

impl CpuBurner for NullBurner {
    #[inline]
    fn burn(&self, _ms: u32) {}
}
