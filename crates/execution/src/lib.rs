//! Task scheduling for the test harness.
//!
//! Every unit of work is a [`Task`] driven by a [`TaskCore`] state machine.
//! [`BuildTask`]s build projects, [`RunTask`]s build and then run on a bound
//! device, and [`AggregatedSimulatorTask`]s run several simulator tasks in a
//! single simulator session. The [`Scheduler`] creates the tasks from a
//! [`HarnessConfig`] and drives them.

#![warn(missing_docs)]

pub mod stopwatch;
pub mod error;
pub mod task;
pub mod config;
pub mod services;
pub mod build;
pub mod run;
pub mod xi;
pub mod aggregated;
pub mod summary;
pub mod scheduler;

pub use stopwatch::Stopwatch;
pub use error::TaskError;
pub use task::{precondition, Precondition, Task, TaskBody, TaskCore};
pub use config::{
    ChecksConfig, ConfigError, HarnessConfig, ProjectConfig, ResourcesConfig, TimeoutsConfig,
    ToolsConfig,
};
pub use services::Services;
pub use build::BuildTask;
pub use run::{RunStep, RunTask};
pub use xi::{AppBundle, MacRun, RunMacTask, RunXiTask, XiRun};
pub use aggregated::AggregatedSimulatorTask;
pub use summary::{RunSummary, TaskReport};
pub use scheduler::Scheduler;
