//! Build tool seam.

use crate::process::{ProcessError, ProcessManager, ProcessSpec, ToolResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// What to build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Project file or directory
    pub project_path: PathBuf,

    /// Build configuration (Debug, Release)
    pub configuration: String,

    /// Build platform (iphonesimulator, iphoneos, macosx)
    pub platform: String,

    /// Timeout for the whole invocation
    pub timeout: Duration,
}

/// Result of a build or restore invocation.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Coarse result
    pub result: ToolResult,

    /// Captured build log
    pub log: String,
}

/// Builds test projects.
#[async_trait]
pub trait BuildTool: Send + Sync {
    /// Restore the project's package dependencies.
    async fn restore(&self, request: &BuildRequest) -> Result<BuildReport, ProcessError>;

    /// Build the project.
    async fn build(&self, request: &BuildRequest) -> Result<BuildReport, ProcessError>;
}

/// Builds by running an executable with templated arguments.
///
/// Arguments may contain `{project}`, `{configuration}` and `{platform}`.
pub struct CommandBuildTool {
    processes: Arc<dyn ProcessManager>,
    program: String,
    build_args: Vec<String>,
    restore_args: Vec<String>,
}

impl CommandBuildTool {
    /// Create a build tool running `program`.
    pub fn new(processes: Arc<dyn ProcessManager>, program: impl Into<String>) -> Self {
        Self {
            processes,
            program: program.into(),
            build_args: default_build_args(),
            restore_args: default_restore_args(),
        }
    }

    /// Replace the build argument template.
    pub fn with_build_args(mut self, args: Vec<String>) -> Self {
        self.build_args = args;
        self
    }

    /// Replace the restore argument template.
    pub fn with_restore_args(mut self, args: Vec<String>) -> Self {
        self.restore_args = args;
        self
    }

    async fn invoke(
        &self,
        template: &[String],
        request: &BuildRequest,
    ) -> Result<BuildReport, ProcessError> {
        let spec = ProcessSpec::new(&self.program)
            .with_args(expand(template, request))
            .with_timeout(request.timeout);
        info!(command = %spec.command_line(), "invoking build tool");

        let output = self.processes.execute(&spec).await?;
        let mut log = output.combined();
        if output.timed_out {
            log.push_str(&format!(
                "\nBuild timed out after {} seconds.",
                request.timeout.as_secs()
            ));
        }
        Ok(BuildReport {
            result: output.result(),
            log,
        })
    }
}

#[async_trait]
impl BuildTool for CommandBuildTool {
    async fn restore(&self, request: &BuildRequest) -> Result<BuildReport, ProcessError> {
        self.invoke(&self.restore_args, request).await
    }

    async fn build(&self, request: &BuildRequest) -> Result<BuildReport, ProcessError> {
        self.invoke(&self.build_args, request).await
    }
}

/// Default `xcodebuild`-style build arguments.
pub fn default_build_args() -> Vec<String> {
    [
        "-project",
        "{project}",
        "-configuration",
        "{configuration}",
        "-sdk",
        "{platform}",
        "build",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Default package restore arguments.
pub fn default_restore_args() -> Vec<String> {
    ["-resolvePackageDependencies", "-project", "{project}"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn expand(template: &[String], request: &BuildRequest) -> Vec<String> {
    let project = request.project_path.to_string_lossy();
    template
        .iter()
        .map(|arg| {
            arg.replace("{project}", &project)
                .replace("{configuration}", &request.configuration)
                .replace("{platform}", &request.platform)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOutput;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        specs: Mutex<Vec<ProcessSpec>>,
        timed_out: bool,
    }

    #[async_trait]
    impl ProcessManager for Recorder {
        async fn execute(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
            self.specs.lock().unwrap().push(spec.clone());
            if self.timed_out {
                Ok(ProcessOutput::timeout(spec.timeout))
            } else {
                Ok(ProcessOutput::success("** BUILD SUCCEEDED **"))
            }
        }
    }

    fn request() -> BuildRequest {
        BuildRequest {
            project_path: PathBuf::from("tests/Foo.xcodeproj"),
            configuration: "Debug".into(),
            platform: "iphonesimulator".into(),
            timeout: Duration::from_secs(90),
        }
    }

    #[tokio::test]
    async fn test_arguments_are_expanded() {
        let recorder = Arc::new(Recorder::default());
        let tool = CommandBuildTool::new(recorder.clone(), "xcodebuild");
        let report = tool.build(&request()).await.unwrap();
        assert_eq!(report.result, ToolResult::Succeeded);

        let specs = recorder.specs.lock().unwrap();
        assert_eq!(
            specs[0].command_line(),
            "xcodebuild -project tests/Foo.xcodeproj -configuration Debug -sdk iphonesimulator build"
        );
        assert_eq!(specs[0].timeout, Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_timeout_is_reported_in_log() {
        let recorder = Arc::new(Recorder {
            timed_out: true,
            ..Default::default()
        });
        let tool = CommandBuildTool::new(recorder, "xcodebuild");
        let report = tool.build(&request()).await.unwrap();
        assert_eq!(report.result, ToolResult::TimedOut);
        assert!(report.log.contains("90 seconds"));
    }
}
