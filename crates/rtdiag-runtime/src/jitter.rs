//! Per-runner release jitter source.
//!
//! Each job runner owns its own generator, so draws never contend and a
//! fixed seed reproduces the same jitter sequence per task.

use rtdiag_common::task::TaskId;

/// Xorshift64 jitter generator bounded by `max_ms` (exclusive).
#[derive(Debug, Clone)]
pub struct Jitter {
    state: u64,
    max_ms: u64,
}

impl Jitter {
    /// Generator for `task_id` derived from a run-wide seed.
    #[must_use]
    pub fn for_task(seed: u64, task_id: TaskId, max_ms: u64) -> Self {
        Self::new(mix(seed ^ u64::from(task_id).rotate_left(32)), max_ms)
    }

    /// Generator with an explicit state. A zero state is replaced, since
    /// xorshift never leaves zero.
    #[must_use]
    pub fn new(state: u64, max_ms: u64) -> Self {
        Self {
            state: if state == 0 { 0x2545_F491_4F6C_DD1D } else { state },
            max_ms,
        }
    }

    /// Upper bound (exclusive) of each draw.
    #[must_use]
    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    /// Next jitter delay in `[0, max_ms)`; always zero when `max_ms` is zero.
    pub fn next_ms(&mut self) -> u64 {
        if self.max_ms == 0 {
            return 0;
        }
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state % self.max_ms
    }
}

/// Splitmix64 finalizer; spreads nearby seeds across the state space.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed derived from the system clock, for runs without a configured seed.
#[must_use]
pub fn clock_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| mix(d.as_secs() ^ u64::from(d.subsec_nanos()).rotate_left(29)))
}
