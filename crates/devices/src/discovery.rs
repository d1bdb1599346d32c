//! The external listing tool.

use crate::error::CatalogError;
use async_trait::async_trait;
use simlane_tools::{ProcessError, ProcessManager, ProcessOutput, ProcessSpec};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Enumerates simulators and devices into an XML file.
#[async_trait]
pub trait DiscoveryTool: Send + Sync {
    /// Write the simulator listing to `output`.
    async fn list_simulators(&self, output: &Path) -> Result<ProcessOutput, ProcessError>;

    /// Write the physical device listing to `output`.
    async fn list_devices(&self, output: &Path) -> Result<ProcessOutput, ProcessError>;
}

/// [`DiscoveryTool`] backed by an `mlaunch`-style executable.
pub struct CommandDiscoveryTool {
    processes: Arc<dyn ProcessManager>,
    program: String,
    timeout: Duration,
}

impl CommandDiscoveryTool {
    /// Create a discovery tool running `program`.
    pub fn new(processes: Arc<dyn ProcessManager>, program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            processes,
            program: program.into(),
            timeout,
        }
    }

    async fn list(&self, flag: &str, output: &Path) -> Result<ProcessOutput, ProcessError> {
        let spec = ProcessSpec::new(&self.program)
            .with_args([
                flag.to_string(),
                output.to_string_lossy().to_string(),
                "--output-format".to_string(),
                "xml".to_string(),
            ])
            .with_timeout(self.timeout);
        self.processes.execute(&spec).await
    }
}

#[async_trait]
impl DiscoveryTool for CommandDiscoveryTool {
    async fn list_simulators(&self, output: &Path) -> Result<ProcessOutput, ProcessError> {
        self.list("--listsim", output).await
    }

    async fn list_devices(&self, output: &Path) -> Result<ProcessOutput, ProcessError> {
        self.list("--listdev", output).await
    }
}

/// Result of the last listing, kept by a catalog's load gate.
#[derive(Debug, Default)]
pub(crate) struct LoadState {
    loaded: bool,
    failure: Option<String>,
}

impl LoadState {
    /// The previous result, if a listing already ran.
    pub(crate) fn cached(&self, what: &'static str) -> Option<Result<(), CatalogError>> {
        if !self.loaded {
            return None;
        }
        Some(match &self.failure {
            Some(reason) => Err(CatalogError::LoadFailed {
                what,
                reason: reason.clone(),
            }),
            None => Ok(()),
        })
    }

    pub(crate) fn record<T>(&mut self, result: &Result<T, CatalogError>) {
        self.loaded = true;
        self.failure = result.as_ref().err().map(ToString::to_string);
    }
}

/// Human readable reason for a failed listing.
pub(crate) fn failure_reason(output: &ProcessOutput) -> String {
    if output.timed_out {
        return format!("timed out after {} seconds", output.duration.as_secs());
    }
    let text = output.combined();
    let text = text.trim();
    match output.exit_code {
        Some(code) if text.is_empty() => format!("exit code {code}"),
        Some(code) => format!("exit code {code}: {text}"),
        None => format!("terminated abnormally: {text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProcessManager for Recorder {
        async fn execute(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
            self.lines.lock().unwrap().push(spec.command_line());
            Ok(ProcessOutput::success(""))
        }
    }

    #[tokio::test]
    async fn test_listing_arguments() {
        let recorder = Arc::new(Recorder::default());
        let tool = CommandDiscoveryTool::new(recorder.clone(), "mlaunch", Duration::from_secs(60));
        tool.list_simulators(Path::new("/tmp/sims.xml")).await.unwrap();
        tool.list_devices(Path::new("/tmp/devs.xml")).await.unwrap();

        let lines = recorder.lines.lock().unwrap();
        assert_eq!(lines[0], "mlaunch --listsim /tmp/sims.xml --output-format xml");
        assert_eq!(lines[1], "mlaunch --listdev /tmp/devs.xml --output-format xml");
    }

    #[test]
    fn test_failure_reason() {
        assert_eq!(
            failure_reason(&ProcessOutput::failure(2, "boom\n")),
            "exit code 2: boom"
        );
        assert_eq!(
            failure_reason(&ProcessOutput::timeout(Duration::from_secs(120))),
            "timed out after 120 seconds"
        );
    }
}
