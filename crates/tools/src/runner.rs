//! Installer/runner seam for apps on devices and simulators.

use crate::process::{ProcessError, ProcessManager, ProcessSpec, ToolResult};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Where an app is installed and run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    /// Device or simulator UDID
    pub udid: String,

    /// Paired phone UDID, for watch apps
    pub companion: Option<String>,

    /// Whether the target is a simulator
    pub simulator: bool,
}

impl RunTarget {
    /// A simulator target.
    pub fn simulator(udid: impl Into<String>) -> Self {
        Self {
            udid: udid.into(),
            companion: None,
            simulator: true,
        }
    }

    /// A physical device target.
    pub fn device(udid: impl Into<String>) -> Self {
        Self {
            udid: udid.into(),
            companion: None,
            simulator: false,
        }
    }

    /// Attach a companion phone.
    pub fn with_companion(mut self, companion: Option<String>) -> Self {
        self.companion = companion;
        self
    }
}

/// Result of an install, uninstall or run.
#[derive(Debug, Clone)]
pub struct RunnerReport {
    /// Coarse result
    pub result: ToolResult,

    /// Captured output
    pub log: String,

    /// Reason shown to the user when the step failed
    pub failure_message: Option<String>,
}

impl RunnerReport {
    /// Check if the step succeeded.
    pub fn succeeded(&self) -> bool {
        self.result == ToolResult::Succeeded
    }
}

/// Installs, runs and removes apps.
#[async_trait]
pub trait AppRunner: Send + Sync {
    /// Install an app bundle.
    async fn install(&self, target: &RunTarget, app_path: &Path)
        -> Result<RunnerReport, ProcessError>;

    /// Remove an installed app.
    async fn uninstall(
        &self,
        target: &RunTarget,
        bundle_identifier: &str,
    ) -> Result<RunnerReport, ProcessError>;

    /// Launch the app and wait for it to exit.
    async fn run(
        &self,
        target: &RunTarget,
        app_path: &Path,
        bundle_identifier: &str,
    ) -> Result<RunnerReport, ProcessError>;
}

/// [`AppRunner`] driving an `mlaunch`-style command line tool.
pub struct CommandAppRunner {
    processes: Arc<dyn ProcessManager>,
    program: String,
    install_timeout: Duration,
    run_timeout: Duration,
}

impl CommandAppRunner {
    /// Create a runner.
    pub fn new(
        processes: Arc<dyn ProcessManager>,
        program: impl Into<String>,
        install_timeout: Duration,
        run_timeout: Duration,
    ) -> Self {
        Self {
            processes,
            program: program.into(),
            install_timeout,
            run_timeout,
        }
    }

    async fn invoke(
        &self,
        step: &str,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<RunnerReport, ProcessError> {
        let spec = ProcessSpec::new(&self.program)
            .with_args(args)
            .with_timeout(timeout);
        info!(command = %spec.command_line(), "{step}");
        let output = self.processes.execute(&spec).await?;
        let result = output.result();
        let failure_message = match result {
            ToolResult::Succeeded => None,
            ToolResult::TimedOut => Some(format!(
                "{step} timed out after {} seconds",
                timeout.as_secs()
            )),
            ToolResult::Crashed => Some(format!("{step} crashed")),
            ToolResult::Failed => Some(format!(
                "{step} failed with exit code {}",
                output.exit_code.unwrap_or(-1)
            )),
        };
        Ok(RunnerReport {
            result,
            log: output.combined(),
            failure_message,
        })
    }
}

fn device_args(target: &RunTarget) -> Vec<String> {
    let mut args = if target.simulator {
        vec!["--device".to_string(), format!(":v2:udid={}", target.udid)]
    } else {
        vec!["--devname".to_string(), target.udid.clone()]
    };
    if let Some(companion) = &target.companion {
        args.push("--companion".to_string());
        args.push(companion.clone());
    }
    args
}

#[async_trait]
impl AppRunner for CommandAppRunner {
    async fn install(
        &self,
        target: &RunTarget,
        app_path: &Path,
    ) -> Result<RunnerReport, ProcessError> {
        let flag = if target.simulator { "--installsim" } else { "--installdev" };
        let mut args = vec![flag.to_string(), app_path.to_string_lossy().to_string()];
        args.extend(device_args(target));
        self.invoke("install", args, self.install_timeout).await
    }

    async fn uninstall(
        &self,
        target: &RunTarget,
        bundle_identifier: &str,
    ) -> Result<RunnerReport, ProcessError> {
        let flag = if target.simulator { "--uninstallsim" } else { "--uninstalldevbundleid" };
        let mut args = vec![flag.to_string(), bundle_identifier.to_string()];
        args.extend(device_args(target));
        self.invoke("uninstall", args, self.install_timeout).await
    }

    async fn run(
        &self,
        target: &RunTarget,
        app_path: &Path,
        bundle_identifier: &str,
    ) -> Result<RunnerReport, ProcessError> {
        let mut args = if target.simulator {
            vec!["--launchsim".to_string(), app_path.to_string_lossy().to_string()]
        } else {
            vec!["--launchdev".to_string(), app_path.to_string_lossy().to_string()]
        };
        args.push("--bundle-id".to_string());
        args.push(bundle_identifier.to_string());
        args.push("--wait-for-exit".to_string());
        args.extend(device_args(target));
        self.invoke("run", args, self.run_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOutput;
    use std::sync::Mutex;

    struct Scripted {
        output: ProcessOutput,
        lines: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProcessManager for Scripted {
        async fn execute(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
            self.lines.lock().unwrap().push(spec.command_line());
            Ok(self.output.clone())
        }
    }

    fn runner(output: ProcessOutput) -> (Arc<Scripted>, CommandAppRunner) {
        let scripted = Arc::new(Scripted {
            output,
            lines: Mutex::new(Vec::new()),
        });
        let runner = CommandAppRunner::new(
            scripted.clone(),
            "mlaunch",
            Duration::from_secs(60),
            Duration::from_secs(300),
        );
        (scripted, runner)
    }

    #[tokio::test]
    async fn test_watch_run_passes_companion() {
        let (scripted, runner) = runner(ProcessOutput::success(""));
        let target = RunTarget::device("WATCH").with_companion(Some("PHONE".into()));
        let report = runner
            .run(&target, Path::new("App.app"), "com.example.app")
            .await
            .unwrap();
        assert!(report.succeeded());
        assert_eq!(
            scripted.lines.lock().unwrap()[0],
            "mlaunch --launchdev App.app --bundle-id com.example.app --wait-for-exit --devname WATCH --companion PHONE"
        );
    }

    #[tokio::test]
    async fn test_failure_message_names_exit_code() {
        let (_, runner) = runner(ProcessOutput::failure(2, "no such app"));
        let report = runner
            .install(&RunTarget::simulator("SIM"), Path::new("App.app"))
            .await
            .unwrap();
        assert_eq!(report.result, ToolResult::Failed);
        assert_eq!(
            report.failure_message.as_deref(),
            Some("install failed with exit code 2")
        );
    }
}
