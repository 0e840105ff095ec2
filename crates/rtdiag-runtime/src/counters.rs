//! Scheduler diagnostics counters.
//!
//! The scheduler (or the platform adapter standing in for it) reports
//! dispatch events through [`SchedulerObserver`]. [`DiagCounters`] is the
//! production observer: four counters behind a [`SpinLock`], updated in
//! critical sections of a few instructions.
//!
//! # Hook contract
//!
//! `on_enqueue`, `on_dequeue`, and `on_context_switch` may be called from
//! inside scheduler-critical sections. Implementations must not block,
//! sleep, allocate, log, or do anything that could trigger rescheduling.
//!
//! # Build-time switch
//!
//! Without the `sched-diag` feature every operation is a no-op and
//! `snapshot()` returns zeroed statistics.

#[cfg(feature = "sched-diag")]
use crate::spinlock::SpinLock;
use rtdiag_common::stats::SchedStats;
use rtdiag_common::task::PriorityClass;
use static_assertions::assert_impl_all;

/// Identifier of a unit of execution known to the platform adapter.
pub type UnitId = u32;

/// Identity and class of a unit taking part in a dispatch decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchedUnit {
    /// Unit identifier (the task id for job runners).
    pub id: UnitId,
    /// Static priority class of the unit.
    pub class: PriorityClass,
}

impl DispatchedUnit {
    /// Create a unit descriptor.
    #[must_use]
    pub const fn new(id: UnitId, class: PriorityClass) -> Self {
        Self { id, class }
    }
}

/// Receiver of scheduler dispatch events plus measurement-window control.
pub trait SchedulerObserver: Send + Sync {
    /// Zero all counters.
    fn reset(&self);

    /// Consistent copy of all counters.
    fn snapshot(&self) -> SchedStats;

    /// A unit became runnable.
    fn on_enqueue(&self);

    /// A runnable unit left the ready set.
    fn on_dequeue(&self);

    /// The scheduler switched from `from` to `to`.
    ///
    /// `from` is `None` only for the very first dispatch.
    fn on_context_switch(&self, from: Option<DispatchedUnit>, to: DispatchedUnit);
}

/// Spin-lock protected scheduler counters.
#[derive(Debug, Default)]
pub struct DiagCounters {
    #[cfg(feature = "sched-diag")]
    stats: SpinLock<SchedStats>,
}

assert_impl_all!(DiagCounters: Send, Sync);

impl DiagCounters {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this build records scheduler events.
    #[must_use]
    pub const fn enabled() -> bool {
        cfg!(feature = "sched-diag")
    }
}

#[cfg(feature = "sched-diag")]
impl SchedulerObserver for DiagCounters {
    fn reset(&self) {
        *self.stats.lock() = SchedStats::default();
    }

    fn snapshot(&self) -> SchedStats {
        *self.stats.lock()
    }

    #[inline]
    fn on_enqueue(&self) {
        let mut stats = self.stats.lock();
        stats.ready_queue_len_current = stats.ready_queue_len_current.saturating_add(1);
        if stats.ready_queue_len_current > stats.ready_queue_len_max {
            stats.ready_queue_len_max = stats.ready_queue_len_current;
        }
    }

    #[inline]
    fn on_dequeue(&self) {
        let mut stats = self.stats.lock();
        // Clamped: an unmatched dequeue must never wrap
        stats.ready_queue_len_current = stats.ready_queue_len_current.saturating_sub(1);
    }

    #[inline]
    fn on_context_switch(&self, from: Option<DispatchedUnit>, to: DispatchedUnit) {
        let Some(from) = from else {
            return;
        };
        let mut stats = self.stats.lock();
        stats.context_switches = stats.context_switches.wrapping_add(1);
        if to.class.outranks(from.class) {
            stats.preemptions = stats.preemptions.wrapping_add(1);
        }
    }
}

#[cfg(not(feature = "sched-diag"))]
impl SchedulerObserver for DiagCounters {
    #[inline]
    fn reset(&self) {}

    #[inline]
    fn snapshot(&self) -> SchedStats {
        SchedStats::default()
    }

    #[inline]
    fn on_enqueue(&self) {}

    #[inline]
    fn on_dequeue(&self) {}

    #[inline]
    fn on_context_switch(&self, _from: Option<DispatchedUnit>, _to: DispatchedUnit) {}
}
