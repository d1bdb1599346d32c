//! simlane core data models.
//!
//! This crate defines the identifiers, task states and device model shared by
//! the scheduler crates.

#![warn(missing_docs)]

mod id;
mod state;
mod device;
mod target;
mod log;

pub use id::TaskId;
pub use state::{Failure, Outcome, Phase};
pub use device::{
    Architecture, ConnectionType, Device, DeviceClass, DevicePair, Platform, SimDeviceType,
    SimRuntime, SimulatorDevice, TargetDevice,
};
pub use target::TestTarget;
pub use log::{LogEntry, TaskLog};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
