//! Periodic job runner.
//!
//! One runner drives one task for a fixed number of jobs:
//! 1. Advance the nominal release by one period
//! 2. Sleep a random jitter, then until the nominal release
//! 3. Burn the task's WCET
//! 4. Append the job's record to the shared execution log
//!
//! The first nominal release is one period after the runner starts. The
//! recorded release and the absolute deadline both use the nominal
//! release, so jitter shows up as start latency and never moves the
//! deadline.

use crate::burner::CpuBurner;
use crate::exec_log::ExecutionLog;
use crate::jitter::Jitter;
use crate::platform::Platform;
use rtdiag_common::error::{HarnessError, HarnessResult};
use rtdiag_common::state::{JobPhase, PhaseMachine};
use rtdiag_common::task::{JobRecord, TaskDescriptor, TaskId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Outcome of a completed runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunnerSummary {
    /// Task driven by the runner.
    pub task_id: TaskId,
    /// Jobs executed.
    pub jobs_run: u32,
    /// Jobs that finished past their absolute deadline.
    pub deadline_misses: u32,
    /// Records the execution log rejected.
    pub dropped: u32,
}

/// Periodic executor for a single task.
pub struct JobRunner<P: Platform + ?Sized, B: CpuBurner + ?Sized> {
    task: TaskDescriptor,
    platform: Arc<P>,
    burner: Arc<B>,
    log: Arc<ExecutionLog>,
    jitter: Jitter,
    jobs: u32,
    phase: PhaseMachine,
    /// Nominal release of the most recent job.
    next_release_ms: Option<u64>,
    summary: RunnerSummary,
}

impl<P: Platform + ?Sized, B: CpuBurner + ?Sized> JobRunner<P, B> {
    /// Create a runner for `task` executing `jobs` jobs.
    pub fn new(
        task: TaskDescriptor,
        jobs: u32,
        jitter: Jitter,
        platform: Arc<P>,
        burner: Arc<B>,
        log: Arc<ExecutionLog>,
    ) -> Self {
        Self {
            task,
            platform,
            burner,
            log,
            jitter,
            jobs,
            phase: PhaseMachine::new(),
            next_release_ms: None,
            summary: RunnerSummary {
                task_id: task.id,
                ..Default::default()
            },
        }
    }

    /// Task driven by this runner.
    #[must_use]
    pub fn task(&self) -> &TaskDescriptor {
        &self.task
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> JobPhase {
        self.phase.phase()
    }

    /// Progress so far.
    #[must_use]
    pub fn summary(&self) -> RunnerSummary {
        self.summary
    }

    /// Execute one job.
    ///
    /// Returns the job's record whether or not the log had room for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the runner has already finished its budget.
    pub fn run_job(&mut self) -> HarnessResult<JobRecord> {
        let phase = self.phase.phase();
        if !phase.can_transition_to(JobPhase::Running) {
            return Err(HarnessError::InvalidStateTransition {
                from: phase.to_string(),
                to: JobPhase::Running.to_string(),
            });
        }

        let job_id = self.summary.jobs_run;
        let period = u64::from(self.task.period_ms);

        // WAITING_FOR_WINDOW
        let release_ms = match self.next_release_ms {
            Some(prev) => prev + period,
            None => self.platform.now_ms() + period,
        };
        self.next_release_ms = Some(release_ms);

        let jitter_ms = self.jitter.next_ms();
        if jitter_ms > 0 {
            self.platform.sleep_ms(jitter_ms);
        }
        self.platform.sleep_until_ms(release_ms);

        // RUNNING
        self.phase.transition(JobPhase::Running)?;
        let start_ms = self.platform.now_ms();
        self.burner.burn(self.task.wcet_ms);
        let finish_ms = self.platform.now_ms();

        // LOGGING_RESULT
        self.phase.transition(JobPhase::LoggingResult)?;
        let record = JobRecord::new(&self.task, job_id, release_ms, start_ms, finish_ms);
        if let Err(e) = self.log.append(record) {
            self.summary.dropped += 1;
            if self.summary.dropped == 1 {
                warn!(task_id = self.task.id, job_id, error = %e, "Job record dropped");
            } else {
                debug!(task_id = self.task.id, job_id, "Job record dropped");
            }
        }

        self.summary.jobs_run += 1;
        if !record.met {
            self.summary.deadline_misses += 1;
            debug!(
                task_id = self.task.id,
                job_id,
                finish_ms,
                deadline_ms = record.deadline_ms,
                "Deadline missed"
            );
        }

        trace!(
            task_id = self.task.id,
            job_id,
            release_ms,
            jitter_ms,
            start_ms,
            finish_ms,
            "Job complete"
        );

        let next = if self.summary.jobs_run < self.jobs {
            JobPhase::WaitingForWindow
        } else {
            JobPhase::Done
        };
        self.phase.transition(next)?;

        Ok(record)
    }

    /// Run every job in the budget, then terminate.
    ///
    /// # Errors
    ///
    /// Returns an error if the phase machine rejects a transition.
    pub fn run(&mut self) -> HarnessResult<RunnerSummary> {
        info!(
            task_id = self.task.id,
            class = %self.task.class(),
            period_ms = self.task.period_ms,
            wcet_ms = self.task.wcet_ms,
            jobs = self.jobs,
            "Job runner started"
        );

        if self.jobs == 0 {
            self.phase.transition(JobPhase::Done)?;
        }
        while !self.phase.phase().is_terminal() {
            self.run_job()?;
        }

        info!(
            task_id = self.task.id,
            jobs = self.summary.jobs_run,
            misses = self.summary.deadline_misses,
            dropped = self.summary.dropped,
            "Job runner finished"
        );
        Ok(self.summary)
    }
}
