//! Simulator control (`xcrun simctl`).

use crate::process::{ProcessError, ProcessManager, ProcessOutput, ProcessSpec};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Controls simulator instances.
///
/// Every call reports the raw process output; interpreting failures (for
/// example recoverable pairing errors) is up to the caller.
#[async_trait]
pub trait SimulatorControl: Send + Sync {
    /// Create a simulator; on success stdout holds the new UDID.
    async fn create(
        &self,
        name: &str,
        device_type: &str,
        runtime: &str,
    ) -> Result<ProcessOutput, ProcessError>;

    /// Pair a watch simulator with a phone simulator.
    async fn pair(&self, watch: &str, phone: &str) -> Result<ProcessOutput, ProcessError>;

    /// Boot a simulator.
    async fn boot(&self, udid: &str) -> Result<ProcessOutput, ProcessError>;

    /// Shut a simulator down.
    async fn shutdown(&self, udid: &str) -> Result<ProcessOutput, ProcessError>;

    /// Erase a simulator's contents and settings.
    async fn erase(&self, udid: &str) -> Result<ProcessOutput, ProcessError>;

    /// Reset privacy permissions of one app.
    async fn reset_permissions(
        &self,
        udid: &str,
        bundle_identifier: &str,
    ) -> Result<ProcessOutput, ProcessError>;

    /// Kill simulator processes left over by a run.
    async fn kill_simulator_processes(&self) -> Result<(), ProcessError>;
}

/// Processes that outlive a simulator session.
const SIMULATOR_PROCESSES: &[&str] = &["Simulator", "launchd_sim", "CoreSimulatorBridge"];

/// [`SimulatorControl`] backed by `xcrun simctl`.
pub struct XcrunSimctl {
    processes: Arc<dyn ProcessManager>,
    xcrun: String,
    timeout: Duration,
}

impl XcrunSimctl {
    /// Create a controller with a per-command timeout.
    pub fn new(processes: Arc<dyn ProcessManager>, timeout: Duration) -> Self {
        Self {
            processes,
            xcrun: "xcrun".to_string(),
            timeout,
        }
    }

    /// Use a different `xcrun` executable.
    pub fn with_xcrun(mut self, xcrun: impl Into<String>) -> Self {
        self.xcrun = xcrun.into();
        self
    }

    async fn simctl(&self, args: &[&str]) -> Result<ProcessOutput, ProcessError> {
        let spec = ProcessSpec::new(&self.xcrun)
            .with_args(std::iter::once("simctl").chain(args.iter().copied()))
            .with_timeout(self.timeout);
        let output = self.processes.execute(&spec).await?;
        if !output.succeeded() {
            debug!(command = %spec.command_line(), output = %output.combined().trim(), "simctl failed");
        }
        Ok(output)
    }
}

#[async_trait]
impl SimulatorControl for XcrunSimctl {
    async fn create(
        &self,
        name: &str,
        device_type: &str,
        runtime: &str,
    ) -> Result<ProcessOutput, ProcessError> {
        self.simctl(&["create", name, device_type, runtime]).await
    }

    async fn pair(&self, watch: &str, phone: &str) -> Result<ProcessOutput, ProcessError> {
        self.simctl(&["pair", watch, phone]).await
    }

    async fn boot(&self, udid: &str) -> Result<ProcessOutput, ProcessError> {
        self.simctl(&["boot", udid]).await
    }

    async fn shutdown(&self, udid: &str) -> Result<ProcessOutput, ProcessError> {
        self.simctl(&["shutdown", udid]).await
    }

    async fn erase(&self, udid: &str) -> Result<ProcessOutput, ProcessError> {
        self.simctl(&["erase", udid]).await
    }

    async fn reset_permissions(
        &self,
        udid: &str,
        bundle_identifier: &str,
    ) -> Result<ProcessOutput, ProcessError> {
        self.simctl(&["privacy", udid, "reset", "all", bundle_identifier])
            .await
    }

    async fn kill_simulator_processes(&self) -> Result<(), ProcessError> {
        for name in SIMULATOR_PROCESSES {
            let spec = ProcessSpec::new("pkill")
                .with_args(["-9", "-x", name])
                .with_timeout(self.timeout);
            let output = self.processes.execute(&spec).await?;
            // pkill exits 1 when nothing matched.
            if !matches!(output.exit_code, Some(0) | Some(1)) {
                warn!(process = name, output = %output.combined().trim(), "failed to kill");
            }
        }
        Ok(())
    }
}
