//! Fakes for the external tools used by scheduler tests.

#![allow(dead_code)]

use async_trait::async_trait;
use simlane_devices::{DeviceCatalog, DiscoveryTool};
use simlane_execution::{ProjectConfig, Services};
use simlane_resource::Resources;
use simlane_tools::{
    AppRunner, BuildReport, BuildRequest, BuildTool, ProcessError, ProcessManager,
    ProcessOutput, ProcessSpec, RunTarget, RunnerReport, SimulatorControl, ToolResult,
};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const IOS_RUNTIME: &str = "com.apple.CoreSimulator.SimRuntime.iOS-17-2";
pub const PHONE_TYPE: &str = "com.apple.CoreSimulator.SimDeviceType.iPhone-15";

/// A listing with one iOS runtime and the given iPhone simulators.
pub fn simulator_xml(udids: &[&str]) -> String {
    let mut xml = format!(
        "<MTouch><Simulator><SupportedRuntimes><SimRuntime><Name>iOS 17.2</Name><Identifier>{IOS_RUNTIME}</Identifier><Version>17.2</Version></SimRuntime></SupportedRuntimes>\
         <SupportedDeviceTypes><SimDeviceType><Name>iPhone 15</Name><Identifier>{PHONE_TYPE}</Identifier></SimDeviceType></SupportedDeviceTypes><AvailableDevices>"
    );
    for udid in udids {
        xml += &format!(
            "<SimDevice UDID=\"{udid}\" Name=\"iPhone 15 ({udid})\"><SimRuntime>{IOS_RUNTIME}</SimRuntime><SimDeviceType>{PHONE_TYPE}</SimDeviceType></SimDevice>"
        );
    }
    xml + "</AvailableDevices><AvailableDevicePairs></AvailableDevicePairs></Simulator></MTouch>"
}

/// A physical device entry: udid, class, interface, companion.
pub type DeviceEntry<'a> = (&'a str, &'a str, &'a str, Option<&'a str>);

/// A listing with the given physical devices.
pub fn device_xml(devices: &[DeviceEntry<'_>]) -> String {
    let mut xml = String::from("<MTouch>");
    for (udid, class, interface, companion) in devices {
        xml += &format!(
            "<Device><DeviceIdentifier>{udid}</DeviceIdentifier><Name>{udid}</Name><DeviceClass>{class}</DeviceClass><InterfaceType>{interface}</InterfaceType><IsUsableForDebugging>true</IsUsableForDebugging>"
        );
        if let Some(companion) = companion {
            xml += &format!("<CompanionIdentifier>{companion}</CompanionIdentifier>");
        }
        xml += "</Device>";
    }
    xml + "</MTouch>"
}

pub struct FakeDiscovery {
    simulators: String,
    devices: String,
    pub calls: AtomicUsize,
}

#[async_trait]
impl DiscoveryTool for FakeDiscovery {
    async fn list_simulators(&self, output: &Path) -> Result<ProcessOutput, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, &self.simulators).await.unwrap();
        Ok(ProcessOutput::success(""))
    }

    async fn list_devices(&self, output: &Path) -> Result<ProcessOutput, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, &self.devices).await.unwrap();
        Ok(ProcessOutput::success(""))
    }
}

/// Simulator control that records calls; everything but `create` succeeds.
#[derive(Default)]
pub struct FakeSimctl {
    calls: Mutex<Vec<String>>,
}

impl FakeSimctl {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) -> ProcessOutput {
        self.calls.lock().unwrap().push(call);
        ProcessOutput::success("")
    }
}

#[async_trait]
impl SimulatorControl for FakeSimctl {
    async fn create(&self, name: &str, _: &str, _: &str) -> Result<ProcessOutput, ProcessError> {
        self.record(format!("create {name}"));
        Ok(ProcessOutput::failure(1, "creation disabled"))
    }

    async fn pair(&self, watch: &str, phone: &str) -> Result<ProcessOutput, ProcessError> {
        Ok(self.record(format!("pair {watch} {phone}")))
    }

    async fn boot(&self, udid: &str) -> Result<ProcessOutput, ProcessError> {
        Ok(self.record(format!("boot {udid}")))
    }

    async fn shutdown(&self, udid: &str) -> Result<ProcessOutput, ProcessError> {
        Ok(self.record(format!("shutdown {udid}")))
    }

    async fn erase(&self, udid: &str) -> Result<ProcessOutput, ProcessError> {
        Ok(self.record(format!("erase {udid}")))
    }

    async fn reset_permissions(&self, udid: &str, bundle: &str) -> Result<ProcessOutput, ProcessError> {
        Ok(self.record(format!("privacy {udid} {bundle}")))
    }

    async fn kill_simulator_processes(&self) -> Result<(), ProcessError> {
        self.record("kill".to_string());
        Ok(())
    }
}

/// Build tool taking one second; results can be scripted per project path.
#[derive(Default)]
pub struct FakeBuild {
    results: Mutex<HashMap<String, ToolResult>>,
    pub builds: AtomicUsize,
}

impl FakeBuild {
    pub fn with_result(self, project: &str, result: ToolResult) -> Self {
        self.results.lock().unwrap().insert(project.to_string(), result);
        self
    }
}

#[async_trait]
impl BuildTool for FakeBuild {
    async fn restore(&self, _request: &BuildRequest) -> Result<BuildReport, ProcessError> {
        Ok(BuildReport {
            result: ToolResult::Succeeded,
            log: String::new(),
        })
    }

    async fn build(&self, request: &BuildRequest) -> Result<BuildReport, ProcessError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let project = request.project_path.to_string_lossy().to_string();
        let result = self
            .results
            .lock()
            .unwrap()
            .get(&project)
            .copied()
            .unwrap_or(ToolResult::Succeeded);
        Ok(BuildReport {
            result,
            log: format!("build {project}: {result:?}"),
        })
    }
}

/// Runner recording `step udid bundle`; runs can be scripted per bundle.
#[derive(Default)]
pub struct FakeRunner {
    results: Mutex<HashMap<String, ToolResult>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn with_result(self, bundle: &str, result: ToolResult) -> Self {
        self.results.lock().unwrap().insert(bundle.to_string(), result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn report(&self, result: ToolResult) -> RunnerReport {
        RunnerReport {
            result,
            log: String::new(),
            failure_message: (result != ToolResult::Succeeded).then(|| format!("run {result:?}")),
        }
    }
}

#[async_trait]
impl AppRunner for FakeRunner {
    async fn install(&self, target: &RunTarget, app: &Path) -> Result<RunnerReport, ProcessError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("install {} {}", target.udid, app.display()));
        Ok(self.report(ToolResult::Succeeded))
    }

    async fn uninstall(&self, target: &RunTarget, bundle: &str) -> Result<RunnerReport, ProcessError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("uninstall {} {bundle}", target.udid));
        // the app is usually not installed yet
        Ok(self.report(ToolResult::Failed))
    }

    async fn run(&self, target: &RunTarget, _app: &Path, bundle: &str) -> Result<RunnerReport, ProcessError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("run {} {bundle}", target.udid));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let result = self
            .results
            .lock()
            .unwrap()
            .get(bundle)
            .copied()
            .unwrap_or(ToolResult::Succeeded);
        Ok(self.report(result))
    }
}

pub struct NoProcesses;

#[async_trait]
impl ProcessManager for NoProcesses {
    async fn execute(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
        Ok(ProcessOutput::failure(127, format!("{}: not found", spec.program)))
    }
}

/// Services wired to fakes, plus handles to inspect them.
pub struct Harness {
    pub services: Arc<Services>,
    pub discovery: Arc<FakeDiscovery>,
    pub simctl: Arc<FakeSimctl>,
    pub build: Arc<FakeBuild>,
    pub runner: Arc<FakeRunner>,
}

impl Harness {
    pub fn new(simulators: String, devices: String, build: FakeBuild, runner: FakeRunner) -> Self {
        Self::with_services(simulators, devices, build, runner, |services| services)
    }

    pub fn with_services(
        simulators: String,
        devices: String,
        build: FakeBuild,
        runner: FakeRunner,
        customize: impl FnOnce(Services) -> Services,
    ) -> Self {
        let discovery = Arc::new(FakeDiscovery {
            simulators,
            devices,
            calls: AtomicUsize::new(0),
        });
        let simctl = Arc::new(FakeSimctl::default());
        let build = Arc::new(build);
        let runner = Arc::new(runner);
        let services = Services::new(
            Arc::new(Resources::new(NonZeroUsize::new(2).unwrap())),
            Arc::new(DeviceCatalog::new(discovery.clone(), simctl.clone())),
            build.clone(),
            runner.clone(),
            Arc::new(NoProcesses),
        );
        Self {
            services: Arc::new(customize(services)),
            discovery,
            simctl,
            build,
            runner,
        }
    }
}

/// A project running `bundle` on `targets`.
pub fn project(name: &str, targets: Vec<simlane_core::TestTarget>) -> ProjectConfig {
    ProjectConfig {
        name: name.to_string(),
        path: format!("{name}/{name}.xcodeproj").into(),
        bundle_identifier: format!("com.example.{name}"),
        app_path: format!("build/{name}.app").into(),
        targets,
        ..ProjectConfig::default()
    }
}
