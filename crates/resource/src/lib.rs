//! Resource arbitration for the scheduler.
//!
//! A [`ResourcePool`] is a counting semaphore with two acquisition modes:
//! bounded-concurrent and exclusive. A [`ResourceGroup`] races acquisition
//! across several pools and keeps whichever is granted first.

#![warn(missing_docs)]

pub mod pool;
pub mod group;
pub mod registry;

pub use pool::{AccessMode, AcquiredResource, PoolSnapshot, ResourceError, ResourcePool};
pub use group::ResourceGroup;
pub use registry::Resources;
