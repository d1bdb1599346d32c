//! Collaborators shared by every task of a run.

use crate::config::{HarnessConfig, TimeoutsConfig};
use simlane_devices::{CommandDiscoveryTool, DeviceCatalog};
use simlane_resource::Resources;
use simlane_tools::{
    AppRunner, BuildTool, CommandAppRunner, CommandBuildTool, DiskSpaceCheck, ProcessManager,
    ResourceCheck, SimulatorControl, SystemProcessManager, XcrunSimctl,
};
use std::sync::Arc;

/// Resource pools, device catalog and external tools of one run.
pub struct Services {
    /// Resource pools
    pub resources: Arc<Resources>,
    /// Simulators and devices
    pub catalog: Arc<DeviceCatalog>,
    /// Build tool
    pub build_tool: Arc<dyn BuildTool>,
    /// Installer and runner
    pub runner: Arc<dyn AppRunner>,
    /// Process runner for host (macOS) apps
    pub processes: Arc<dyn ProcessManager>,
    /// Precondition verified before each task starts its timer
    pub check: Option<Arc<dyn ResourceCheck>>,
    /// Timeouts
    pub timeouts: TimeoutsConfig,
}

impl Services {
    /// Assemble services from explicit collaborators.
    pub fn new(
        resources: Arc<Resources>,
        catalog: Arc<DeviceCatalog>,
        build_tool: Arc<dyn BuildTool>,
        runner: Arc<dyn AppRunner>,
        processes: Arc<dyn ProcessManager>,
    ) -> Self {
        Self {
            resources,
            catalog,
            build_tool,
            runner,
            processes,
            check: None,
            timeouts: TimeoutsConfig::default(),
        }
    }

    /// Set the task precondition.
    pub fn with_check(mut self, check: Arc<dyn ResourceCheck>) -> Self {
        self.check = Some(check);
        self
    }

    /// Set the timeouts.
    pub fn with_timeouts(mut self, timeouts: TimeoutsConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Services running real processes on this host.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::with_processes(config, Arc::new(SystemProcessManager))
    }

    /// Services running every external tool through `processes`.
    pub fn with_processes(config: &HarnessConfig, processes: Arc<dyn ProcessManager>) -> Self {
        let timeouts = &config.timeouts;
        let tools = &config.tools;

        let simctl: Arc<dyn SimulatorControl> = Arc::new(
            XcrunSimctl::new(Arc::clone(&processes), timeouts.simctl()).with_xcrun(&tools.xcrun),
        );
        let discovery = Arc::new(CommandDiscoveryTool::new(
            Arc::clone(&processes),
            &tools.discovery,
            timeouts.discovery(),
        ));

        let mut build_tool = CommandBuildTool::new(Arc::clone(&processes), &tools.build);
        if let Some(args) = &tools.build_args {
            build_tool = build_tool.with_build_args(args.clone());
        }
        if let Some(args) = &tools.restore_args {
            build_tool = build_tool.with_restore_args(args.clone());
        }

        let runner = CommandAppRunner::new(
            Arc::clone(&processes),
            &tools.runner,
            timeouts.install(),
            timeouts.run(),
        );

        let mut services = Self::new(
            Arc::new(Resources::new(config.resources.max_concurrent_builds)),
            Arc::new(DeviceCatalog::new(discovery, simctl)),
            Arc::new(build_tool),
            Arc::new(runner),
            Arc::clone(&processes),
        )
        .with_timeouts(timeouts.clone());

        if config.checks.min_free_disk_mb > 0 {
            services = services.with_check(Arc::new(DiskSpaceCheck::new(
                processes,
                &config.checks.disk_path,
                config.checks.min_free_disk_mb,
            )));
        }
        services
    }

    /// Simulator control used for provisioning and preparation.
    pub fn simctl(&self) -> &Arc<dyn SimulatorControl> {
        self.catalog.simulators().control()
    }
}
