//! Execution steps for apps installed on simulators, devices and the host.

use crate::run::{RunStep, RunTask};
use crate::services::Services;
use crate::task::TaskCore;
use async_trait::async_trait;
use simlane_core::{Device, Failure, Outcome, SimulatorDevice, TargetDevice, TestTarget};
use simlane_devices::SimulatorSelection;
use simlane_tools::{ProcessSpec, RunTarget, RunnerReport, ToolResult};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// An app bundle to install and launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppBundle {
    /// Bundle identifier
    pub bundle_identifier: String,
    /// Built app bundle
    pub app_path: PathBuf,
}

/// Installs and runs an app on a device of kind `D`.
pub struct XiRun<D> {
    app: AppBundle,
    target: TestTarget,
    services: Arc<Services>,
    _device: PhantomData<fn() -> D>,
}

/// Run task bound to a device of kind `D`.
pub type RunXiTask<D> = RunTask<XiRun<D>>;

impl<D: TargetDevice> XiRun<D> {
    /// Create the step.
    pub fn new(app: AppBundle, target: TestTarget, services: Arc<Services>) -> Self {
        Self {
            app,
            target,
            services,
            _device: PhantomData,
        }
    }

    /// The app.
    pub fn app(&self) -> &AppBundle {
        &self.app
    }

    /// The test target.
    pub fn target(&self) -> TestTarget {
        self.target
    }
}

fn outcome_for(result: ToolResult) -> Outcome {
    match result {
        ToolResult::Succeeded => Outcome::Succeeded,
        ToolResult::Failed => Outcome::Failed(Failure::Failed),
        ToolResult::Crashed => Outcome::Failed(Failure::Crashed),
        ToolResult::TimedOut => Outcome::Failed(Failure::TimedOut),
    }
}

fn record(core: &TaskCore, report: &RunnerReport) {
    if !report.log.is_empty() {
        core.write_log_block(&report.log);
    }
}

/// Uninstall, install, run, uninstall. Uninstall failures are tolerated.
async fn install_and_run(
    core: &TaskCore,
    services: &Services,
    app: &AppBundle,
    target: &RunTarget,
) -> anyhow::Result<Outcome> {
    let runner = &services.runner;

    let report = runner.uninstall(target, &app.bundle_identifier).await?;
    record(core, &report);
    if !report.succeeded() {
        core.write_log("Uninstall before install failed, continuing");
    }

    let report = runner.install(target, &app.app_path).await?;
    record(core, &report);
    if !report.succeeded() {
        core.set_failure_message(
            report
                .failure_message
                .unwrap_or_else(|| "Install failed".to_string()),
        );
        return Ok(outcome_for(report.result));
    }

    let report = runner
        .run(target, &app.app_path, &app.bundle_identifier)
        .await?;
    record(core, &report);
    let outcome = outcome_for(report.result);
    if let Some(message) = report.failure_message {
        core.set_failure_message(message);
    }

    let cleanup = runner.uninstall(target, &app.bundle_identifier).await?;
    record(core, &cleanup);
    if !cleanup.succeeded() {
        warn!(task = %core.name(), udid = %target.udid, "uninstall after run failed");
    }
    Ok(outcome)
}

#[async_trait]
impl RunStep for XiRun<Device> {
    async fn execute(&self, core: &TaskCore) -> anyhow::Result<Outcome> {
        let devices = self.services.catalog.devices();
        if let Err(e) = devices.load(false).await {
            core.write_log(format!("Device discovery failed: {e}"));
        }

        let mut candidates = devices.candidates(self.target).collect().await;
        if candidates.is_empty() {
            core.set_failure_message("No applicable devices found.");
            return Ok(Outcome::DeviceNotFound);
        }
        candidates.sort_by_key(|device| device.speed_rank());

        let group = self
            .services
            .resources
            .group_for(candidates.iter().map(|device| device.udid.as_str()));
        let (index, _device_token) = core.acquire_any(&group).await?;
        let device = &candidates[index];
        core.write_log(format!("Running on {} ({})", device.name, device.udid));

        let companion = if self.target.is_watch() {
            let Some(phone) = devices.find_companion(device).await else {
                core.set_failure_message(format!(
                    "No companion device found for {} ({})",
                    device.name, device.udid
                ));
                return Ok(Outcome::Failed(Failure::Failed));
            };
            Some(phone)
        } else {
            None
        };
        let _companion_token = match &companion {
            Some(phone) => Some(
                core.acquire_concurrent(&self.services.resources.device(&phone.udid))
                    .await?,
            ),
            None => None,
        };

        let target = RunTarget::device(&device.udid)
            .with_companion(companion.map(|phone| phone.udid));
        install_and_run(core, &self.services, &self.app, &target).await
    }
}

impl XiRun<SimulatorDevice> {
    /// Install and run on an already prepared simulator.
    ///
    /// The caller holds the desktop pool exclusively.
    pub async fn run_on(
        &self,
        core: &TaskCore,
        selection: &SimulatorSelection,
    ) -> anyhow::Result<Outcome> {
        core.write_log(format!(
            "Running on {} ({})",
            selection.device.name, selection.device.udid
        ));
        let target = RunTarget::simulator(&selection.device.udid).with_companion(
            selection
                .companion
                .as_ref()
                .map(|phone| phone.udid.clone()),
        );
        install_and_run(core, &self.services, &self.app, &target).await
    }
}

#[async_trait]
impl RunStep for XiRun<SimulatorDevice> {
    async fn execute(&self, core: &TaskCore) -> anyhow::Result<Outcome> {
        let selection = match self
            .services
            .catalog
            .simulators()
            .find_simulators(self.target)
            .await
        {
            Ok(selection) => selection,
            Err(e) => {
                core.set_failure_message(format!("No applicable simulators found: {e}"));
                return Ok(Outcome::DeviceNotFound);
            }
        };

        let _desktop = core
            .acquire_exclusive(self.services.resources.desktop())
            .await?;
        let bundles = [self.app.bundle_identifier.as_str()];
        let prepared = prepare_simulator(core, &self.services, &selection, &bundles).await;
        let outcome = match prepared {
            Ok(()) => self.run_on(core, &selection).await,
            Err(e) => Err(e),
        };
        teardown_simulator(core, &self.services, &selection).await;
        outcome
    }
}

fn selected_udids(selection: &SimulatorSelection) -> impl Iterator<Item = &str> {
    selection
        .companion
        .iter()
        .chain(std::iter::once(&selection.device))
        .map(|device| device.udid.as_str())
}

/// Boot the selected simulators and reset permissions of every bundle.
pub(crate) async fn prepare_simulator(
    core: &TaskCore,
    services: &Services,
    selection: &SimulatorSelection,
    bundles: &[&str],
) -> anyhow::Result<()> {
    let simctl = services.simctl();
    for udid in selected_udids(selection) {
        let output = simctl.boot(udid).await?;
        let text = output.combined();
        if !output.succeeded() && !text.contains("current state: Booted") {
            anyhow::bail!("failed to boot simulator {udid}: {}", text.trim());
        }
        core.write_log(format!("Booted simulator {udid}"));
    }

    let device = &selection.device.udid;
    for bundle in bundles {
        let output = simctl.reset_permissions(device, bundle).await?;
        if !output.succeeded() {
            core.write_log(format!(
                "Resetting permissions for {bundle} failed: {}",
                output.combined().trim()
            ));
        }
    }
    info!(udid = %device, apps = bundles.len(), "simulator prepared");
    Ok(())
}

/// Shut the selected simulators down and kill leftover simulator processes.
///
/// Failures are logged and otherwise ignored.
pub(crate) async fn teardown_simulator(
    core: &TaskCore,
    services: &Services,
    selection: &SimulatorSelection,
) {
    let simctl = services.simctl();
    for udid in selected_udids(selection) {
        match simctl.shutdown(udid).await {
            Ok(output) if output.succeeded() => {}
            Ok(output) => core.write_log(format!(
                "Shutting down {udid} failed: {}",
                output.combined().trim()
            )),
            Err(e) => warn!(udid, "shutdown failed: {e}"),
        }
    }
    if let Err(e) = simctl.kill_simulator_processes().await {
        warn!("failed to kill simulator processes: {e}");
    }
}

/// Runs a macOS executable directly on the host.
pub struct MacRun {
    executable: PathBuf,
    args: Vec<String>,
    services: Arc<Services>,
}

/// Run task executing on the host.
pub type RunMacTask = RunTask<MacRun>;

impl MacRun {
    /// Create the step.
    pub fn new(executable: impl Into<PathBuf>, services: Arc<Services>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            services,
        }
    }

    /// Pass arguments to the executable.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl RunStep for MacRun {
    async fn execute(&self, core: &TaskCore) -> anyhow::Result<Outcome> {
        let timeout = self.services.timeouts.run();
        let spec = ProcessSpec::new(self.executable.to_string_lossy())
            .with_args(self.args.clone())
            .with_timeout(timeout);
        let output = self.services.processes.execute(&spec).await?;
        core.write_log_block(&output.combined());

        let outcome = outcome_for(output.result());
        match outcome {
            Outcome::Failed(Failure::TimedOut) => core.set_failure_message(format!(
                "run timed out after {} seconds",
                timeout.as_secs()
            )),
            Outcome::Failed(Failure::Crashed) => core.set_failure_message("run crashed"),
            Outcome::Failed(_) => core.set_failure_message(format!(
                "run failed with exit code {}",
                output.exit_code.unwrap_or(-1)
            )),
            _ => {}
        }
        Ok(outcome)
    }
}
