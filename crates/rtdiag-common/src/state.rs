//! Job runner lifecycle state machine.
//!
//! Each periodic job walks the cycle
//! WAITING_FOR_WINDOW → RUNNING → LOGGING_RESULT → WAITING_FOR_WINDOW,
//! and the runner leaves the cycle for DONE once its job budget is spent.

use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phases of a job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    /// Sleeping until the next release (plus jitter).
    #[default]
    WaitingForWindow,
    /// Executing the modeled compute for the current job.
    Running,
    /// Appending the finished job's record to the execution log.
    LoggingResult,
    /// Job budget exhausted; the unit terminates.
    Done,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingForWindow => write!(f, "WAITING_FOR_WINDOW"),
            Self::Running => write!(f, "RUNNING"),
            Self::LoggingResult => write!(f, "LOGGING_RESULT"),
            Self::Done => write!(f, "DONE"),
        }
    }
}

impl JobPhase {
    /// Check if a transition to `target` is valid from the current phase.
    #[must_use]
    pub fn can_transition_to(&self, target: JobPhase) -> bool {
        use JobPhase::{Done, LoggingResult, Running, WaitingForWindow};

        matches!(
            (self, target),
            (WaitingForWindow, Running)
                | (Running, LoggingResult)
                | (LoggingResult, WaitingForWindow)
                | (LoggingResult, Done)
                // A zero-job budget never leaves the initial phase
                | (WaitingForWindow, Done)
        )
    }

    /// Returns true once the runner has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Phase tracker for one job runner.
#[derive(Debug, Clone, Default)]
pub struct PhaseMachine {
    current: JobPhase,
    transition_count: u64,
}

impl PhaseMachine {
    /// Create a machine in `WAITING_FOR_WINDOW`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> JobPhase {
        self.current
    }

    /// Number of transitions taken so far.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a phase transition.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidStateTransition`] if `target` is not
    /// reachable from the current phase.
    pub fn transition(&mut self, target: JobPhase) -> HarnessResult<()> {
        if self.current.can_transition_to(target) {
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(HarnessError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}
