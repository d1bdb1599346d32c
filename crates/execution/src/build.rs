//! Build task.

use crate::services::Services;
use crate::task::{Task, TaskBody, TaskCore};
use async_trait::async_trait;
use simlane_core::{Failure, Outcome, Phase};
use simlane_tools::{BuildReport, BuildRequest, ToolResult};
use std::sync::Arc;
use tracing::info;

/// Builds one project for one platform.
///
/// Holds a concurrent slot on the desktop pool while building; the package
/// restore step, if enabled, additionally holds the restore lock exclusively.
pub struct BuildTask {
    core: TaskCore,
    services: Arc<Services>,
    request: BuildRequest,
    restore_packages: bool,
}

impl BuildTask {
    /// Create a build task.
    pub fn new(core: TaskCore, services: Arc<Services>, request: BuildRequest) -> Self {
        Self {
            core,
            services,
            request,
            restore_packages: false,
        }
    }

    /// Restore packages before building.
    pub fn with_restore_packages(mut self, restore: bool) -> Self {
        self.restore_packages = restore;
        self
    }

    /// What is built.
    pub fn request(&self) -> &BuildRequest {
        &self.request
    }

    /// Record a build report and map it to an outcome.
    fn conclude(&self, core: &TaskCore, step: &str, report: &BuildReport) -> Outcome {
        core.write_log_block(&report.log);
        match report.result {
            ToolResult::Succeeded => Outcome::Succeeded,
            ToolResult::TimedOut => {
                core.set_failure_message(format!(
                    "{step} timed out after {} seconds",
                    self.request.timeout.as_secs()
                ));
                Outcome::Failed(Failure::BuildFailure { timed_out: true })
            }
            ToolResult::Failed | ToolResult::Crashed => {
                core.set_failure_message(format!("{step} failed"));
                Outcome::Failed(Failure::BuildFailure { timed_out: false })
            }
        }
    }
}

#[async_trait]
impl TaskBody for BuildTask {
    async fn execute(&self, core: &TaskCore) -> anyhow::Result<Outcome> {
        let resources = &self.services.resources;
        let _slot = core.acquire_concurrent(resources.desktop()).await?;

        if self.restore_packages {
            let _restore = core.acquire_exclusive(resources.package_restore()).await?;
            let report = self.services.build_tool.restore(&self.request).await?;
            let outcome = self.conclude(core, "Package restore", &report);
            if outcome != Outcome::Succeeded {
                return Ok(outcome);
            }
        }

        info!(
            task = %core.name(),
            platform = %self.request.platform,
            "building {}",
            self.request.project_path.display()
        );
        let report = self.services.build_tool.build(&self.request).await?;
        Ok(self.conclude(core, "Build", &report))
    }
}

#[async_trait]
impl Task for BuildTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    async fn run(&self) -> Phase {
        self.core.run(self).await
    }
}
