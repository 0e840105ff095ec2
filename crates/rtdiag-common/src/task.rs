//! Workload task descriptors and per-job timing records.
//!
//! All timestamps are milliseconds on the harness monotonic clock
//! (zero at harness start).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a periodic task.
pub type TaskId = u32;

/// Static priority class a unit is created in.
///
/// Ordering follows scheduling precedence: `RealTime > BestEffort`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    /// Lower class for non-critical tasks.
    BestEffort,
    /// Highest class, reserved for critical tasks.
    RealTime,
}

impl PriorityClass {
    /// Map a task's criticality flag to its class.
    #[must_use]
    pub fn from_critical(critical: bool) -> Self {
        if critical {
            Self::RealTime
        } else {
            Self::BestEffort
        }
    }

    /// Returns true if `self` would displace a running unit of class `other`.
    #[must_use]
    pub fn outranks(self, other: Self) -> bool {
        self > other
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RealTime => write!(f, "RT"),
            Self::BestEffort => write!(f, "BE"),
        }
    }
}

/// Immutable description of one periodic task.
///
/// `wcet_ms <= deadline_ms` is deliberately not required; an overloaded
/// descriptor is a valid scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Task identifier, unique within a workload.
    pub id: TaskId,
    /// Release period in milliseconds. Must be non-zero.
    pub period_ms: u32,
    /// Modeled compute cost per job in milliseconds.
    pub wcet_ms: u32,
    /// Deadline relative to each release, in milliseconds.
    pub deadline_ms: u32,
    /// Real-time (`true`) or best-effort (`false`).
    pub critical: bool,
}

impl TaskDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub const fn new(id: TaskId, period_ms: u32, wcet_ms: u32, deadline_ms: u32, critical: bool) -> Self {
        Self {
            id,
            period_ms,
            wcet_ms,
            deadline_ms,
            critical,
        }
    }

    /// Priority class the task's unit runs in.
    #[must_use]
    pub fn class(&self) -> PriorityClass {
        PriorityClass::from_critical(self.critical)
    }

    /// Name given to the task's unit of execution.
    #[must_use]
    pub fn unit_name(&self) -> String {
        format!("task_{}", self.id)
    }
}

/// Timing outcome of one completed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobRecord {
    /// Owning task.
    pub task_id: TaskId,
    /// 0-based job index within the task.
    pub job_id: u32,
    /// Nominal (jitter-free) release time.
    pub release_ms: u64,
    /// Time the job started executing.
    pub start_ms: u64,
    /// Time the job finished executing.
    pub finish_ms: u64,
    /// Absolute deadline: `release_ms + deadline`.
    pub deadline_ms: u64,
    /// `finish_ms <= deadline_ms`.
    pub met: bool,
}

impl JobRecord {
    /// Build a record, deriving the absolute deadline and the met flag.
    #[must_use]
    pub fn new(task: &TaskDescriptor, job_id: u32, release_ms: u64, start_ms: u64, finish_ms: u64) -> Self {
        let deadline_ms = release_ms + u64::from(task.deadline_ms);
        Self {
            task_id: task.id,
            job_id,
            release_ms,
            start_ms,
            finish_ms,
            deadline_ms,
            met: finish_ms <= deadline_ms,
        }
    }

    /// Execution span, `finish - start`.
    #[must_use]
    pub fn response_ms(&self) -> u64 {
        self.finish_ms.saturating_sub(self.start_ms)
    }

    /// Returns true if the timestamps are ordered `release <= start <= finish`.
    #[must_use]
    pub fn is_well_ordered(&self) -> bool {
        self.release_ms <= self.start_ms && self.start_ms <= self.finish_ms
    }
}
