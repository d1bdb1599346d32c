//! External tool integration.
//!
//! Every collaborator the scheduler shells out to (build tool, simulator
//! control, installer/runner, disk probe) sits behind an `async_trait` seam
//! and runs through a [`ProcessManager`] with an explicit timeout.

#![warn(missing_docs)]

pub mod process;
pub mod build;
pub mod simctl;
pub mod runner;
pub mod check;

pub use process::{
    ProcessError, ProcessManager, ProcessOutput, ProcessSpec, SystemProcessManager, ToolResult,
};
pub use build::{BuildReport, BuildRequest, BuildTool, CommandBuildTool};
pub use simctl::{SimulatorControl, XcrunSimctl};
pub use runner::{AppRunner, CommandAppRunner, RunTarget, RunnerReport};
pub use check::{CheckError, DiskSpaceCheck, ResourceCheck};
