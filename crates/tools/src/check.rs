//! Preconditions verified before a task starts its timers.

use crate::process::{ProcessError, ProcessManager, ProcessSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// A failed precondition.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Not enough free disk space
    #[error("not enough disk space on {path}: {free_mb} MB free, {required_mb} MB required")]
    InsufficientDisk {
        /// Checked path
        path: String,
        /// Free space found
        free_mb: u64,
        /// Free space required
        required_mb: u64,
    },

    /// The probe output could not be understood
    #[error("could not determine free space: {0}")]
    Probe(String),

    /// The probe could not be run
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// A precondition for running a task.
#[async_trait]
pub trait ResourceCheck: Send + Sync {
    /// Verify the precondition holds.
    async fn verify(&self) -> Result<(), CheckError>;
}

/// Requires a minimum amount of free disk space, measured with `df -Pk`.
pub struct DiskSpaceCheck {
    processes: Arc<dyn ProcessManager>,
    path: PathBuf,
    min_free_mb: u64,
}

impl DiskSpaceCheck {
    /// Create a check; `min_free_mb == 0` disables it.
    pub fn new(processes: Arc<dyn ProcessManager>, path: impl Into<PathBuf>, min_free_mb: u64) -> Self {
        Self {
            processes,
            path: path.into(),
            min_free_mb,
        }
    }
}

#[async_trait]
impl ResourceCheck for DiskSpaceCheck {
    async fn verify(&self) -> Result<(), CheckError> {
        if self.min_free_mb == 0 {
            return Ok(());
        }
        let path = self.path.to_string_lossy().to_string();
        let spec = ProcessSpec::new("df")
            .with_args(["-Pk", path.as_str()])
            .with_timeout(Duration::from_secs(30));
        let output = self.processes.execute(&spec).await?;
        if !output.succeeded() {
            return Err(CheckError::Probe(output.combined().trim().to_string()));
        }

        let free_mb = parse_df_available_kb(&output.stdout)
            .ok_or_else(|| CheckError::Probe(format!("unexpected df output: {}", output.stdout.trim())))?
            / 1024;
        debug!(path = %path, free_mb, required_mb = self.min_free_mb, "disk space");
        if free_mb < self.min_free_mb {
            return Err(CheckError::InsufficientDisk {
                path,
                free_mb,
                required_mb: self.min_free_mb,
            });
        }
        Ok(())
    }
}

/// Available kilobytes from POSIX `df -Pk` output.
fn parse_df_available_kb(output: &str) -> Option<u64> {
    output
        .lines()
        .nth(1)?
        .split_whitespace()
        .nth(3)?
        .parse()
        .ok()
}
