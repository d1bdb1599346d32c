//! Task state model.
//!
//! A task moves through `NotStarted -> Building -> Built -> Running -> Finished`.
//! `Building` and `Running` carry a `waiting` flag that is set while the task is
//! suspended on a resource pool. `Finished` carries the terminal [`Outcome`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Specialization of a failed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Failure {
    /// Generic execution failure (non-zero exit with a clean shutdown)
    Failed,
    /// The executed binary terminated abnormally
    Crashed,
    /// An external process exceeded its allotted time
    TimedOut,
    /// The harness itself faulted
    HarnessException,
    /// The build step failed; the execution step never ran
    BuildFailure {
        /// The build was killed because it exceeded its timeout
        timed_out: bool,
    },
}

impl Failure {
    /// Whether the failure was caused by a timeout (build or run).
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Failure::TimedOut | Failure::BuildFailure { timed_out: true })
    }

    /// Whether the failure happened while building.
    pub fn is_build_failure(&self) -> bool {
        matches!(self, Failure::BuildFailure { .. })
    }
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Work completed successfully
    Succeeded,
    /// Work failed
    Failed(Failure),
    /// Deliberately skipped; neither pass nor fail
    Ignored,
    /// No candidate device or simulator was available
    DeviceNotFound,
}

impl Outcome {
    /// Whether this outcome makes the overall run unhealthy.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::DeviceNotFound)
    }
}

/// Externally observable state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Created or reset, never run
    NotStarted,
    /// Running preconditions or the build step
    Building {
        /// Suspended on a resource
        waiting: bool,
    },
    /// Build finished successfully, execution not yet started
    Built,
    /// Running the execution step
    Running {
        /// Suspended on a resource
        waiting: bool,
    },
    /// Terminal
    Finished(Outcome),
}

impl Default for Phase {
    fn default() -> Self {
        Phase::NotStarted
    }
}

impl Phase {
    /// Shorthand for a failed terminal phase.
    pub fn failed(failure: Failure) -> Self {
        Phase::Finished(Outcome::Failed(failure))
    }

    /// Check if the task never started.
    pub fn is_not_started(&self) -> bool {
        matches!(self, Phase::NotStarted)
    }

    /// Check if the task is in progress (building, built or running).
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Phase::Building { .. } | Phase::Built | Phase::Running { .. })
    }

    /// Check if the task is suspended on a resource.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            Phase::Building { waiting: true } | Phase::Running { waiting: true }
        )
    }

    /// Check if the task reached a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(self, Phase::Finished(_))
    }

    /// Terminal outcome, if finished.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Phase::Finished(outcome) => Some(*outcome),
            _ => None,
        }
    }

    /// Failure specialization, if finished with a failure.
    pub fn failure(&self) -> Option<Failure> {
        match self {
            Phase::Finished(Outcome::Failed(failure)) => Some(*failure),
            _ => None,
        }
    }

    /// Check if the task finished successfully.
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Phase::Finished(Outcome::Succeeded))
    }

    /// Check if the task was ignored.
    pub fn is_ignored(&self) -> bool {
        matches!(self, Phase::Finished(Outcome::Ignored))
    }

    /// Check if the task failed (any failure specialization).
    pub fn is_failed(&self) -> bool {
        matches!(self, Phase::Finished(Outcome::Failed(_)))
    }

    /// Same activity with the waiting flag replaced.
    ///
    /// Phases without a waiting flag are returned unchanged.
    pub fn with_waiting(self, waiting: bool) -> Self {
        match self {
            Phase::Building { .. } => Phase::Building { waiting },
            Phase::Running { .. } => Phase::Running { waiting },
            other => other,
        }
    }

    /// Short label used by reports.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::NotStarted => "NotStarted",
            Phase::Building { waiting: false } => "Building",
            Phase::Building { waiting: true } => "Building (waiting)",
            Phase::Built => "Built",
            Phase::Running { waiting: false } => "Running",
            Phase::Running { waiting: true } => "Running (waiting)",
            Phase::Finished(Outcome::Succeeded) => "Succeeded",
            Phase::Finished(Outcome::Ignored) => "Ignored",
            Phase::Finished(Outcome::DeviceNotFound) => "DeviceNotFound",
            Phase::Finished(Outcome::Failed(failure)) => match failure {
                Failure::Failed => "Failed",
                Failure::Crashed => "Crashed",
                Failure::TimedOut => "TimedOut",
                Failure::HarnessException => "HarnessException",
                Failure::BuildFailure { timed_out: false } => "BuildFailure",
                Failure::BuildFailure { timed_out: true } => "BuildFailure (timed out)",
            },
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
