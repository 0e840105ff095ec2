//! Configuration structures for the diagnostic harness.
//!
//! Supports TOML deserialization with defaults that reproduce the stock
//! mixed workload: six real-time control tasks sharing the processor
//! with eight long best-effort jobs.

use crate::task::{TaskDescriptor, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Default number of jobs each task runs before its unit terminates.
pub const DEFAULT_JOBS_PER_TASK: u32 = 10;

/// Default execution log capacity in records.
pub const DEFAULT_LOG_CAPACITY: usize = 512;

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Jobs per task (K).
    pub jobs_per_task: u32,

    /// Maximum records retained by the execution log.
    pub log_capacity: usize,

    /// Exclusive upper bound of the per-job release jitter.
    #[serde(with = "humantime_serde")]
    pub jitter_max: Duration,

    /// Delay between consecutive unit creations.
    #[serde(with = "humantime_serde")]
    pub stagger: Duration,

    /// Fixed wait after the last unit is created before the report is emitted.
    #[serde(with = "humantime_serde")]
    pub run_window: Duration,

    /// Seed for the jitter generator; derived from the clock when absent.
    pub seed: Option<u64>,

    /// Real-time scheduling configuration.
    pub realtime: RealtimeConfig,

    /// Task table.
    pub tasks: Vec<TaskDescriptor>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            jobs_per_task: DEFAULT_JOBS_PER_TASK,
            log_capacity: DEFAULT_LOG_CAPACITY,
            jitter_max: Duration::from_millis(10),
            stagger: Duration::from_millis(20),
            run_window: Duration::from_secs(5),
            seed: None,
            realtime: RealtimeConfig::default(),
            tasks: default_workload(),
        }
    }
}

/// Stock mixed workload.
#[must_use]
pub fn default_workload() -> Vec<TaskDescriptor> {
    vec![
        // id, period, wcet, deadline, critical
        TaskDescriptor::new(0, 50, 8, 50, true),
        TaskDescriptor::new(1, 60, 12, 60, true),
        TaskDescriptor::new(2, 400, 250, 400, false),
        TaskDescriptor::new(3, 420, 260, 420, false),
        TaskDescriptor::new(4, 400, 250, 400, false),
        TaskDescriptor::new(5, 420, 260, 420, false),
        TaskDescriptor::new(6, 400, 250, 400, false),
        TaskDescriptor::new(7, 420, 260, 420, false),
        TaskDescriptor::new(12, 400, 250, 400, false),
        TaskDescriptor::new(13, 420, 260, 420, false),
        TaskDescriptor::new(8, 50, 8, 50, true),
        TaskDescriptor::new(9, 60, 12, 60, true),
        TaskDescriptor::new(10, 50, 8, 50, true),
        TaskDescriptor::new(11, 60, 12, 6000, true),
    ]
}

/// Real-time scheduling configuration applied to every unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Apply policy, priorities, and affinity (requires privileges).
    pub enabled: bool,

    /// Scheduler policy: "fifo", "rr", or "other".
    pub policy: SchedPolicy,

    /// OS priority for real-time class units (1-99 for RT policies).
    pub rt_priority: u8,

    /// OS priority for best-effort class units; must stay below `rt_priority`.
    pub be_priority: u8,

    /// CPU affinity for every unit. A single CPU gives a uniprocessor measurement.
    pub cpu_affinity: CpuAffinity,

    /// Lock all memory pages (mlockall) before the first unit starts.
    pub lock_memory: bool,

    /// Nice value for best-effort units whenever no real-time policy is in
    /// effect (disabled, denied, or `other`). 0 leaves them at the default.
    pub be_nice: i32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: SchedPolicy::Fifo,
            rt_priority: 90,
            be_priority: 10,
            cpu_affinity: CpuAffinity::None,
            lock_memory: false,
            be_nice: 10,
        }
    }
}

/// Scheduler policy for unit threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// `SCHED_FIFO`: strict priority, runs until it blocks.
    #[default]
    Fifo,
    /// `SCHED_RR`: strict priority with a time slice among equals.
    Rr,
    /// `SCHED_OTHER`: default time sharing; class priorities are ignored.
    Other,
}

/// CPUs every unit is pinned to.
///
/// Written in TOML as a single index (`cpu_affinity = 0`) or an array
/// (`cpu_affinity = [0, 1]`); an empty array means unpinned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "AffinityRepr", into = "AffinityRepr")]
pub enum CpuAffinity {
    /// Unpinned; the OS places units.
    #[default]
    None,
    /// One CPU, the uniprocessor measurement setup.
    Single(usize),
    /// A set of CPUs.
    Set(Vec<usize>),
}

impl CpuAffinity {
    /// CPUs named by this affinity, empty for `None`.
    #[must_use]
    pub fn cpus(&self) -> Vec<usize> {
        match self {
            CpuAffinity::None => Vec::new(),
            CpuAffinity::Single(cpu) => vec![*cpu],
            CpuAffinity::Set(cpus) => cpus.clone(),
        }
    }
}

/// On-disk shape of [`CpuAffinity`]. TOML has no null, so "unpinned" is
/// written as an empty array.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AffinityRepr {
    Unset,
    One(usize),
    Many(Vec<usize>),
}

impl From<AffinityRepr> for CpuAffinity {
    fn from(repr: AffinityRepr) -> Self {
        match repr {
            AffinityRepr::Unset => CpuAffinity::None,
            AffinityRepr::One(cpu) => CpuAffinity::Single(cpu),
            AffinityRepr::Many(cpus) if cpus.is_empty() => CpuAffinity::None,
            AffinityRepr::Many(cpus) => CpuAffinity::Set(cpus),
        }
    }
}

impl From<CpuAffinity> for AffinityRepr {
    fn from(affinity: CpuAffinity) -> Self {
        match affinity {
            CpuAffinity::None => AffinityRepr::Many(Vec::new()),
            CpuAffinity::Single(cpu) => AffinityRepr::One(cpu),
            CpuAffinity::Set(cpus) => AffinityRepr::Many(cpus),
        }
    }
}

impl HarnessConfig {
    /// Read a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a TOML config document.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Render as a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check the workload before any unit is created.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: an empty task table, a zero
    /// period, a repeated task id, a zero job budget, or a zero log
    /// capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::EmptyWorkload);
        }
        if self.jobs_per_task == 0 {
            return Err(ConfigError::ZeroJobBudget);
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::ZeroLogCapacity);
        }

        let mut seen: HashSet<TaskId> = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if task.period_ms == 0 {
                return Err(ConfigError::ZeroPeriod { task_id: task.id });
            }
            if !seen.insert(task.id) {
                return Err(ConfigError::DuplicateTaskId { task_id: task.id });
            }
            if task.wcet_ms > task.deadline_ms {
                debug!(
                    task_id = task.id,
                    wcet_ms = task.wcet_ms,
                    deadline_ms = task.deadline_ms,
                    "Task is overloaded by construction"
                );
            }
        }
        Ok(())
    }

    /// Records the run can produce when no capacity is lost: `K × task_count`.
    #[must_use]
    pub fn expected_records(&self) -> usize {
        self.jobs_per_task as usize * self.tasks.len()
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("invalid harness config: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("cannot encode harness config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The task table is empty.
    #[error("workload has no tasks")]
    EmptyWorkload,

    /// A task has a zero release period.
    #[error("task {task_id} has a zero period")]
    ZeroPeriod {
        /// Offending task.
        task_id: TaskId,
    },

    /// Two tasks share an id.
    #[error("task id {task_id} appears more than once")]
    DuplicateTaskId {
        /// Repeated id.
        task_id: TaskId,
    },

    /// `jobs_per_task` is zero.
    #[error("jobs_per_task must be at least 1")]
    ZeroJobBudget,

    /// `log_capacity` is zero.
    #[error("log_capacity must be at least 1")]
    ZeroLogCapacity,
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
