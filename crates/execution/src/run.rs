//! Build followed by a device-bound execution step.

use crate::build::BuildTask;
use crate::error::TaskError;
use crate::task::{Task, TaskBody, TaskCore};
use async_trait::async_trait;
use simlane_core::{Failure, Outcome, Phase};
use std::sync::Arc;

/// The execution half of a [`RunTask`].
#[async_trait]
pub trait RunStep: Send + Sync {
    /// Run the built product, updating `core` as it progresses.
    async fn execute(&self, core: &TaskCore) -> anyhow::Result<Outcome>;
}

/// Builds (through a possibly shared [`BuildTask`]) and then runs a step.
///
/// While the build is in progress the task reports the build's state as
/// `Building`, so a reader only looking at run tasks sees
/// `Building → Built → Running → Finished`.
pub struct RunTask<S> {
    core: TaskCore,
    build: Arc<BuildTask>,
    build_only: bool,
    step: S,
}

impl<S: RunStep> RunTask<S> {
    /// Create a run task.
    pub fn new(core: TaskCore, build: Arc<BuildTask>, step: S) -> Self {
        Self {
            core,
            build,
            build_only: false,
            step,
        }
    }

    /// Stop after building.
    pub fn with_build_only(mut self, build_only: bool) -> Self {
        self.build_only = build_only;
        self
    }

    /// The build this task depends on.
    pub fn build(&self) -> &Arc<BuildTask> {
        &self.build
    }

    /// The execution step.
    pub fn step(&self) -> &S {
        &self.step
    }

    /// Run the build (once), returning `Built` or a terminal build failure.
    ///
    /// A build failure is copied into this task's failure message.
    pub async fn build_async(&self) -> Phase {
        let built = self.build.run().await;
        let failure = match built.outcome() {
            Some(Outcome::Succeeded) => return Phase::Built,
            Some(Outcome::Ignored) => return Phase::Finished(Outcome::Ignored),
            Some(Outcome::Failed(Failure::BuildFailure { timed_out })) => {
                Failure::BuildFailure { timed_out }
            }
            _ => Failure::BuildFailure { timed_out: false },
        };
        let message = self
            .build
            .core()
            .failure_message()
            .unwrap_or_else(|| format!("Build {}", built.label()));
        self.core.set_failure_message(message);
        Phase::failed(failure)
    }
}

#[async_trait]
impl<S: RunStep> TaskBody for RunTask<S> {
    async fn execute(&self, core: &TaskCore) -> anyhow::Result<Outcome> {
        match self.build_async().await {
            Phase::Built => core.set_phase(Phase::Built),
            Phase::Finished(outcome) => return Ok(outcome),
            other => anyhow::bail!("build ended in unexpected state {other}"),
        }
        if self.build_only {
            return Ok(Outcome::Succeeded);
        }
        core.set_phase(Phase::Running { waiting: false });
        self.step.execute(core).await
    }
}

#[async_trait]
impl<S: RunStep + 'static> Task for RunTask<S> {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn phase(&self) -> Phase {
        let build = self.build.phase();
        if build.is_in_progress() {
            return Phase::Building {
                waiting: build.is_waiting(),
            };
        }
        self.core.phase()
    }

    async fn run(&self) -> Phase {
        self.core.run(self).await;
        self.phase()
    }

    /// Resets the task, and its build unless another task is building it.
    fn reset(&self) -> Result<(), TaskError> {
        let rebuild = !self.build.phase().is_in_progress();
        self.core.can_reset()?;
        if rebuild {
            self.build.core().can_reset()?;
        }
        self.core.reset()?;
        if rebuild {
            self.build.reset()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::tests::{services_with, FakeBuild};
    use simlane_tools::{BuildRequest, ToolResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingStep {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl RunStep for CountingStep {
        async fn execute(&self, _core: &TaskCore) -> anyhow::Result<Outcome> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(Outcome::Succeeded)
        }
    }

    fn run_task(result: ToolResult) -> (RunTask<CountingStep>, Arc<FakeBuild>) {
        let tool = Arc::new(FakeBuild::new(result));
        let services = services_with(Arc::clone(&tool), 1);
        let build = Arc::new(BuildTask::new(
            TaskCore::new("build"),
            services,
            BuildRequest {
                project_path: "app.xcodeproj".into(),
                configuration: "Debug".into(),
                platform: "iphoneos".into(),
                timeout: Duration::from_secs(300),
            },
        ));
        let task = RunTask::new(TaskCore::new("run"), build, CountingStep::default());
        (task, tool)
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_mirrors_build_then_run() {
        let (task, _) = run_task(ToolResult::Succeeded);
        let task = Arc::new(task);
        let runner = {
            let task = Arc::clone(&task);
            tokio::spawn(async move { task.run().await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(task.phase(), Phase::Building { waiting: false });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(task.phase(), Phase::Running { waiting: false });

        assert!(runner.await.unwrap().is_succeeded());
        assert_eq!(task.step().runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_failure_skips_step() {
        let (task, _) = run_task(ToolResult::TimedOut);
        let phase = task.run().await;
        assert_eq!(phase.failure(), Some(Failure::BuildFailure { timed_out: true }));
        assert_eq!(task.step().runs.load(Ordering::SeqCst), 0);
        assert!(task.core().failure_message().unwrap().contains("300 seconds"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_only_stops_after_build() {
        let (task, _) = run_task(ToolResult::Succeeded);
        let task = task.with_build_only(true);
        assert!(task.run().await.is_succeeded());
        assert_eq!(task.step().runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_rebuilds() {
        let (task, tool) = run_task(ToolResult::Succeeded);
        task.run().await;
        task.run().await;
        assert_eq!(tool.builds.load(Ordering::SeqCst), 1);

        task.reset().unwrap();
        assert_eq!(task.phase(), Phase::NotStarted);
        assert_eq!(task.build().phase(), Phase::NotStarted);
        task.run().await;
        assert_eq!(tool.builds.load(Ordering::SeqCst), 2);
        assert_eq!(task.step().runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_is_refused_as_a_whole_while_build_is_locked() {
        let (task, tool) = run_task(ToolResult::Succeeded);
        assert!(task.run().await.is_succeeded());

        let build_lock = task.build().core().lock_run().await;
        assert_eq!(
            task.reset(),
            Err(TaskError::InProgress(task.build().core().id()))
        );
        assert!(task.phase().is_succeeded());
        assert!(task.core().duration() > Duration::ZERO);
        drop(build_lock);

        task.reset().unwrap();
        task.run().await;
        assert_eq!(tool.builds.load(Ordering::SeqCst), 2);
    }
}
