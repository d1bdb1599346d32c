//! Catalog errors.

use simlane_core::TestTarget;
use simlane_tools::ProcessError;
use thiserror::Error;

/// Errors from discovery, provisioning and pairing.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The listing tool failed or timed out
    #[error("failed to load {what}: {reason}")]
    LoadFailed {
        /// Which listing
        what: &'static str,
        /// Tool output or timeout description
        reason: String,
    },

    /// The listing could not be parsed
    #[error("failed to parse {what} listing: {reason}")]
    Parse {
        /// Which listing
        what: &'static str,
        /// Parser error
        reason: String,
    },

    /// Scratch file handling failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No installed runtime fits the target
    #[error("no runtime installed for {0}")]
    NoRuntime(TestTarget),

    /// The required device type is not supported
    #[error("device type {device_type} not available for {target}")]
    NoDeviceType {
        /// Target being resolved
        target: TestTarget,
        /// Missing device type identifier
        device_type: String,
    },

    /// Pairing failed with an unrecoverable error
    #[error("failed to pair {watch} with {phone}: {reason}")]
    PairFailed {
        /// Watch UDID
        watch: String,
        /// Phone UDID
        phone: String,
        /// Tool output
        reason: String,
    },

    /// Creating a simulator failed
    #[error("failed to create simulator {name}: {reason}")]
    CreateFailed {
        /// Requested name
        name: String,
        /// Tool output
        reason: String,
    },

    /// A control tool could not be run
    #[error(transparent)]
    Control(#[from] ProcessError),
}
