use thiserror::Error;

/// Harness error types covering configuration, unit creation, and platform setup.
///
/// Deadline misses are not represented here: a job that finishes past its
/// absolute deadline is a normal outcome recorded as `met = false`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HarnessError {
    /// Workload or harness configuration rejected before any unit was created.
    #[error("configuration error: {0}")]
    Config(String),

    /// A concurrently-executing unit could not be created.
    #[error("failed to spawn unit {name}: {reason}")]
    Spawn {
        /// Unit name (e.g. `task_3`).
        name: String,
        /// Underlying OS error text.
        reason: String,
    },

    /// Real-time policy, priority, or affinity setup failed.
    #[error("real-time setup error: {0}")]
    Realtime(String),

    /// I/O operation error (report output, config files).
    #[error("I/O error: {0}")]
    IoError(String),

    /// Invalid job phase transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Convenience type alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
