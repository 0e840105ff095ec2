//! Workload model and run orchestration.
//!
//! [`Workload`] is the validated task table. [`Harness`] turns it into one
//! job-runner unit per task, staggers their creation, waits a fixed run
//! window, and collects the report. Units still running when the window
//! closes are left alone; their unfinished jobs are simply absent from
//! the report.

use crate::burner::CpuBurner;
use crate::counters::SchedulerObserver;
use crate::exec_log::ExecutionLog;
use crate::jitter::{self, Jitter};
use crate::job_runner::JobRunner;
use crate::platform::{Platform, UnitHandle, UnitSpec};
use crate::realtime;
use crate::report::{self, Report};
use rtdiag_common::config::{ConfigError, HarnessConfig};
use rtdiag_common::error::HarnessResult;
use rtdiag_common::task::TaskDescriptor;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Validated, immutable task table.
#[derive(Debug, Clone)]
pub struct Workload {
    tasks: Arc<[TaskDescriptor]>,
}

impl Workload {
    /// Validate `config` and take its task table.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found.
    pub fn load(config: &HarnessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            tasks: config.tasks.iter().copied().collect(),
        })
    }

    /// Tasks in creation order.
    #[must_use]
    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if there are no tasks (never the case once loaded).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Real-time and best-effort task counts.
    #[must_use]
    pub fn class_counts(&self) -> (usize, usize) {
        let rt = self.tasks.iter().filter(|t| t.critical).count();
        (rt, self.tasks.len() - rt)
    }
}

/// Result of one harness run.
#[derive(Debug)]
pub struct HarnessRun {
    /// Records and counters collected at the end of the run window.
    pub report: Report,
    /// The same report in text form, as emitted from the live log.
    pub text: String,
    /// Units created.
    pub units_spawned: usize,
    /// Units that could not be created.
    pub spawn_failures: usize,
    /// Units still running when the report was collected.
    pub units_unfinished: usize,
    /// Records the execution log rejected.
    pub records_dropped: u64,
    /// Jitter seed actually used.
    pub seed: u64,
}

/// Runs a workload on a platform and reports what happened.
pub struct Harness<P: Platform + 'static, B: CpuBurner + 'static> {
    config: HarnessConfig,
    workload: Workload,
    platform: Arc<P>,
    burner: Arc<B>,
    observer: Arc<dyn SchedulerObserver>,
    log: Arc<ExecutionLog>,
}

impl<P: Platform + 'static, B: CpuBurner + 'static> Harness<P, B> {
    /// Validate `config` and prepare a run.
    ///
    /// `observer` must be the observer the platform reports dispatch
    /// events to; the harness resets and snapshots it.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the workload is invalid. Nothing has
    /// been created at that point.
    pub fn new(
        config: HarnessConfig,
        platform: Arc<P>,
        burner: Arc<B>,
        observer: Arc<dyn SchedulerObserver>,
    ) -> Result<Self, ConfigError> {
        let workload = Workload::load(&config)?;
        let log = Arc::new(ExecutionLog::new(config.log_capacity));
        Ok(Self {
            config,
            workload,
            platform,
            burner,
            observer,
            log,
        })
    }

    /// The validated workload.
    #[must_use]
    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    /// The shared execution log.
    #[must_use]
    pub fn log(&self) -> &Arc<ExecutionLog> {
        &self.log
    }

    /// Create every unit, wait out the run window, and collect the report.
    ///
    /// A unit that fails to spawn is logged and skipped; the report covers
    /// whatever the remaining units produced.
    ///
    /// # Errors
    ///
    /// Returns an error if process-wide real-time setup fails or the
    /// report cannot be emitted.
    pub fn run(&self) -> HarnessResult<HarnessRun> {
        realtime::init_process(&self.config.realtime)?;

        self.observer.reset();
        self.platform.reset();
        self.log.reset();

        let seed = self.config.seed.unwrap_or_else(jitter::clock_seed);
        let jitter_max = u64::try_from(self.config.jitter_max.as_millis()).unwrap_or(u64::MAX);
        let stagger = u64::try_from(self.config.stagger.as_millis()).unwrap_or(u64::MAX);
        let (rt, be) = self.workload.class_counts();

        info!(
            tasks = self.workload.len(),
            rt,
            be,
            jobs_per_task = self.config.jobs_per_task,
            log_capacity = self.log.capacity(),
            seed,
            "Starting workload"
        );

        let mut handles: Vec<UnitHandle> = Vec::with_capacity(self.workload.len());
        let mut spawn_failures = 0;
        let count = self.workload.len();

        for (i, task) in self.workload.tasks().iter().enumerate() {
            let mut runner = JobRunner::new(
                *task,
                self.config.jobs_per_task,
                Jitter::for_task(seed, task.id, jitter_max),
                Arc::clone(&self.platform),
                Arc::clone(&self.burner),
                Arc::clone(&self.log),
            );
            let spec = UnitSpec::new(task.unit_name(), task.id, task.class());
            let task_id = task.id;

            let body = Box::new(move || {
                if let Err(e) = runner.run() {
                    error!(task_id, error = %e, "Job runner aborted");
                }
            });

            match self.platform.spawn(spec, body) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    spawn_failures += 1;
                    error!(task_id, error = %e, "Failed to create unit");
                }
            }

            if i + 1 < count && stagger > 0 {
                self.platform.sleep_ms(stagger);
            }
        }

        let run_window = u64::try_from(self.config.run_window.as_millis()).unwrap_or(u64::MAX);
        info!(units = handles.len(), run_window_ms = run_window, "All units created");
        self.platform.sleep_ms(run_window);

        let mut text = Vec::with_capacity((self.log.len() + 2) * 32);
        let report = report::emit_text(&self.log, self.observer.as_ref(), &mut text)?;
        let text = String::from_utf8_lossy(&text).into_owned();

        let mut unfinished = 0;
        for handle in handles.iter().filter(|h| !h.is_finished()) {
            unfinished += 1;
            warn!(unit = handle.name(), "Unit still running at end of run window");
        }
        let units_spawned = handles.len();
        for handle in handles {
            if handle.is_finished() {
                if let Err(e) = handle.join() {
                    error!(error = %e, "Unit terminated abnormally");
                }
            }
        }

        let records_dropped = self.log.dropped();
        if records_dropped > 0 {
            warn!(
                dropped = records_dropped,
                capacity = self.log.capacity(),
                "Execution log overflowed"
            );
        }
        info!(
            records = report.len(),
            misses = report.deadline_misses(),
            context_switches = report.stats.context_switches,
            preemptions = report.stats.preemptions,
            "Run window closed"
        );

        Ok(HarnessRun {
            report,
            text,
            units_spawned,
            spawn_failures,
            units_unfinished: unfinished,
            records_dropped,
            seed,
        })
    }
}
