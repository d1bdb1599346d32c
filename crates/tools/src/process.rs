//! Child process execution with a hard timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors from launching a process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child failed
    #[error("I/O error while running {program}: {source}")]
    Io {
        /// Program being awaited
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// A process to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Executable
    pub program: String,

    /// Command arguments
    pub args: Vec<String>,

    /// Extra environment variables
    pub env: HashMap<String, String>,

    /// Working directory
    pub cwd: Option<PathBuf>,

    /// Killed once this elapses
    pub timeout: Duration,
}

impl ProcessSpec {
    /// Create a spec with a default timeout of ten minutes.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            timeout: Duration::from_secs(600),
        }
    }

    /// Append arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Coarse result of an external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolResult {
    /// Exit code 0
    Succeeded,
    /// Non-zero exit with a clean shutdown
    Failed,
    /// Killed by a signal
    Crashed,
    /// Killed because the timeout elapsed
    TimedOut,
}

/// What a finished (or killed) process left behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,

    /// Terminating signal, if any
    pub signal: Option<i32>,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Wall-clock time
    pub duration: Duration,

    /// Whether the process was killed at its timeout
    pub timed_out: bool,
}

impl ProcessOutput {
    /// A successful run printing `stdout`.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            signal: None,
            stdout: stdout.into(),
            stderr: String::new(),
            duration: Duration::ZERO,
            timed_out: false,
        }
    }

    /// A run exiting with `code` and printing `stderr`.
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            signal: None,
            stdout: String::new(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
            timed_out: false,
        }
    }

    /// A run killed at its timeout.
    pub fn timeout(duration: Duration) -> Self {
        Self {
            exit_code: None,
            signal: None,
            stdout: String::new(),
            stderr: String::new(),
            duration,
            timed_out: true,
        }
    }

    /// Check if the process exited with code 0.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Classify the run.
    ///
    /// Exit codes above 128 are treated as a signal death reported by a shell.
    pub fn result(&self) -> ToolResult {
        if self.timed_out {
            return ToolResult::TimedOut;
        }
        match (self.exit_code, self.signal) {
            (Some(0), _) => ToolResult::Succeeded,
            (_, Some(_)) => ToolResult::Crashed,
            (Some(code), None) if code > 128 => ToolResult::Crashed,
            _ => ToolResult::Failed,
        }
    }

    /// Standard output followed by standard error.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Runs external processes.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Run a process to completion or until its timeout elapses.
    ///
    /// A timeout is not an error: it is reported through
    /// [`ProcessOutput::timed_out`].
    async fn execute(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError>;
}

/// Runs processes on the host with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessManager;

#[async_trait]
impl ProcessManager for SystemProcessManager {
    async fn execute(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
        let start = Instant::now();
        debug!(command = %spec.command_line(), timeout = ?spec.timeout, "spawning");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // Dropping the wait future drops the child, which kills it.
        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ProcessError::Io {
                program: spec.program.clone(),
                source,
            })?,
            Err(_) => {
                warn!(command = %spec.command_line(), timeout = ?spec.timeout, "process timed out");
                return Ok(ProcessOutput::timeout(start.elapsed()));
            }
        };

        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&output.status);
        #[cfg(not(unix))]
        let signal = None;

        let result = ProcessOutput {
            exit_code: output.status.code(),
            signal,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
            timed_out: false,
        };
        debug!(
            program = %spec.program,
            exit_code = ?result.exit_code,
            duration = ?result.duration,
            "process finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_classification() {
        assert_eq!(ProcessOutput::success("").result(), ToolResult::Succeeded);
        assert_eq!(ProcessOutput::failure(1, "").result(), ToolResult::Failed);
        assert_eq!(ProcessOutput::failure(134, "").result(), ToolResult::Crashed);
        assert_eq!(
            ProcessOutput::timeout(Duration::from_secs(1)).result(),
            ToolResult::TimedOut
        );
    }

    #[test]
    fn test_combined_output() {
        let mut output = ProcessOutput::failure(1, "boom");
        output.stdout = "building\n".into();
        assert_eq!(output.combined(), "building\nboom");
        assert_eq!(ProcessOutput::failure(1, "boom").combined(), "boom");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_process_captures_output() {
        let spec = ProcessSpec::new("sh").with_args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = SystemProcessManager.execute(&spec).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.result(), ToolResult::Failed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_process_times_out() {
        let spec = ProcessSpec::new("sleep")
            .with_args(["5"])
            .with_timeout(Duration::from_millis(100));
        let output = SystemProcessManager.execute(&spec).await.unwrap();
        assert!(output.timed_out);
        assert!(output.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let spec = ProcessSpec::new("simlane-definitely-not-a-program");
        let err = SystemProcessManager.execute(&spec).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
