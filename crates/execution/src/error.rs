//! Errors from operator actions on tasks.

use simlane_core::TaskId;
use thiserror::Error;

/// An illegal state change requested on a task.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Reset requested while the task is running
    #[error("task {0} is in progress and cannot be reset")]
    InProgress(TaskId),

    /// Ignore toggled on a task that already started
    #[error("task {0} has already started and cannot be ignored")]
    NotStarted(TaskId),

    /// No task with this id
    #[error("no task with id {0}")]
    NotFound(TaskId),
}
