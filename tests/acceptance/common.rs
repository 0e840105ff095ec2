//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Running a workload on real threads with a timestamping observer
//! - Checking per-record invariants of a report
//! - Checking real-time prerequisites (privileges)

#![allow(dead_code)] // Not every scenario uses every helper

use rtdiag_common::config::HarnessConfig;
use rtdiag_common::stats::SchedStats;
use rtdiag_common::task::TaskDescriptor;
use rtdiag_runtime::burner::CpuBurner;
use rtdiag_runtime::counters::{DiagCounters, DispatchedUnit, SchedulerObserver};
use rtdiag_runtime::platform::{Clock, MonotonicClock, ThreadPlatform};
use rtdiag_runtime::report::Report;
use rtdiag_runtime::workload::{Harness, HarnessRun};
use std::sync::{Arc, Mutex};

/// Check if running as root (required for RT priority).
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// A dispatch where the incoming unit outranked the outgoing one.
#[derive(Debug, Clone, Copy)]
pub struct PreemptionEvent {
    /// Time on the harness clock.
    pub at_ms: u64,
    /// Displaced unit.
    pub from: DispatchedUnit,
    /// Incoming unit.
    pub to: DispatchedUnit,
}

/// Production counters plus a timestamped list of preemptions.
#[derive(Debug)]
pub struct TimedObserver {
    clock: MonotonicClock,
    counters: DiagCounters,
    preemptions: Mutex<Vec<PreemptionEvent>>,
}

impl TimedObserver {
    pub fn new(clock: MonotonicClock) -> Self {
        Self {
            clock,
            counters: DiagCounters::new(),
            preemptions: Mutex::new(Vec::new()),
        }
    }

    pub fn preemptions(&self) -> Vec<PreemptionEvent> {
        self.preemptions.lock().unwrap().clone()
    }
}

impl SchedulerObserver for TimedObserver {
    fn reset(&self) {
        self.counters.reset();
        self.preemptions.lock().unwrap().clear();
    }

    fn snapshot(&self) -> SchedStats {
        self.counters.snapshot()
    }

    fn on_enqueue(&self) {
        self.counters.on_enqueue();
    }

    fn on_dequeue(&self) {
        self.counters.on_dequeue();
    }

    fn on_context_switch(&self, from: Option<DispatchedUnit>, to: DispatchedUnit) {
        self.counters.on_context_switch(from, to);
        if let Some(from) = from {
            if to.class.outranks(from.class) {
                self.preemptions.lock().unwrap().push(PreemptionEvent {
                    at_ms: self.clock.now_ms(),
                    from,
                    to,
                });
            }
        }
    }
}

/// Result of a threaded run.
pub struct Outcome {
    pub run: HarnessRun,
    pub observer: Arc<TimedObserver>,
}

/// Run `config` on OS threads; observer timestamps share the platform clock.
pub fn run_threads<B: CpuBurner + 'static>(config: HarnessConfig, burner: B) -> Outcome {
    let clock = MonotonicClock::new();
    let observer = Arc::new(TimedObserver::new(clock));
    let platform = Arc::new(ThreadPlatform::with_clock(
        clock,
        observer.clone(),
        config.realtime.clone(),
    ));
    let harness = Harness::new(config, platform, Arc::new(burner), observer.clone()).unwrap();
    let run = harness.run().unwrap();
    Outcome { run, observer }
}

/// Every best-effort miss overlaps a preemption of that unit by a higher class.
pub fn assert_be_misses_preempted(
    report: &Report,
    tasks: &[TaskDescriptor],
    preemptions: &[PreemptionEvent],
) {
    for task in tasks.iter().filter(|t| !t.critical) {
        for miss in report.task_records(task.id).filter(|r| !r.met) {
            assert!(
                preemptions.iter().any(|p| p.from.id == task.id
                    && p.at_ms >= miss.start_ms
                    && p.at_ms <= miss.finish_ms),
                "best-effort miss without preemption: {miss:?}"
            );
        }
    }
}

/// Per-record invariants plus gapless per-task job ids.
pub fn assert_record_invariants(report: &Report, tasks: &[TaskDescriptor]) {
    for r in &report.records {
        assert!(r.start_ms >= r.release_ms, "start before release: {r:?}");
        assert!(r.finish_ms >= r.start_ms, "finish before start: {r:?}");

        let task = tasks.iter().find(|t| t.id == r.task_id).unwrap();
        assert_eq!(r.deadline_ms, r.release_ms + u64::from(task.deadline_ms));
        assert_eq!(r.met, r.finish_ms <= r.deadline_ms, "met flag wrong: {r:?}");
    }

    for task in tasks {
        let ids: Vec<u32> = report.task_records(task.id).map(|r| r.job_id).collect();
        let expected: Vec<u32> = (0..ids.len() as u32).collect();
        assert_eq!(ids, expected, "job ids of task {} not gapless", task.id);
    }

    assert!(report.stats.is_consistent());
}
