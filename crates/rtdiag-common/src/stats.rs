//! Scheduler-level statistics snapshot.

use serde::{Deserialize, Serialize};

/// Copy of the scheduler diagnostics counters at one instant.
///
/// Produced by `snapshot()` on a scheduler observer; the all-zero value
/// is what a build without scheduler diagnostics reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchedStats {
    /// Dispatch decisions observed (first dispatch excluded).
    pub context_switches: u64,
    /// Dispatches where the incoming unit outranked the outgoing one.
    pub preemptions: u64,
    /// Runnable units currently waiting in the ready set.
    pub ready_queue_len_current: u32,
    /// High-water mark of `ready_queue_len_current`.
    pub ready_queue_len_max: u32,
}

impl SchedStats {
    /// Returns true if the ready-queue high-water mark covers the current depth.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.ready_queue_len_max >= self.ready_queue_len_current
    }
}
