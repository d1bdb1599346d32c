//! Task lifecycle shared by every unit of work.
//!
//! A task runs in a fixed order:
//!
//! ```text
//! dependency → initial → resource check → start timer → body → completed → Finished
//! ```
//!
//! A failed resource check finishes the task without starting its timer. Any
//! error or panic raised by the body becomes `HarnessException`; nothing
//! escapes the task.

use crate::error::TaskError;
use crate::stopwatch::Stopwatch;
use crate::summary::TaskReport;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use simlane_core::{Failure, Outcome, Phase, TaskId, TaskLog};
use simlane_resource::{AcquiredResource, ResourceError, ResourceGroup, ResourcePool};
use simlane_tools::ResourceCheck;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// An awaitable precondition that may be shared by several tasks.
///
/// Resolving to `Err` fails the waiting task with the given message.
pub type Precondition = Shared<BoxFuture<'static, Result<(), String>>>;

/// Wrap a future as a [`Precondition`].
pub fn precondition<F>(future: F) -> Precondition
where
    F: Future<Output = Result<(), String>> + Send + 'static,
{
    future.boxed().shared()
}

/// The work a task performs between starting its timer and finishing.
#[async_trait]
pub trait TaskBody: Send + Sync {
    /// Perform the work, updating `core` as it progresses.
    async fn execute(&self, core: &TaskCore) -> anyhow::Result<Outcome>;
}

/// A schedulable task, as seen by the scheduler and reporters.
#[async_trait]
pub trait Task: Send + Sync {
    /// Shared state of the task.
    fn core(&self) -> &TaskCore;

    /// Externally visible state.
    fn phase(&self) -> Phase {
        self.core().phase()
    }

    /// Run the task; running a finished task returns its outcome again.
    async fn run(&self) -> Phase;

    /// Return the task to `NotStarted`.
    fn reset(&self) -> Result<(), TaskError> {
        self.core().reset()
    }

    /// Toggle `Ignored`; only allowed before the task starts.
    fn set_ignored(&self, ignored: bool) -> Result<(), TaskError> {
        self.core().set_ignored(ignored)
    }

    /// Tasks executed as part of this one.
    fn members(&self) -> Vec<Arc<dyn Task>> {
        Vec::new()
    }

    /// Snapshot for reporting.
    fn report(&self) -> TaskReport {
        TaskReport::new(self.core(), self.phase(), self.members())
    }
}

struct CoreState {
    phase: Phase,
    failure_message: Option<String>,
    log: TaskLog,
    duration: Stopwatch,
    waiting: Stopwatch,
    group: Option<watch::Receiver<Option<Outcome>>>,
}

/// State machine, timers and log of one task.
pub struct TaskCore {
    id: TaskId,
    name: String,
    mode: String,
    variation: String,
    known_failure: Option<String>,
    dependency: Option<Precondition>,
    initial: Option<Precondition>,
    completed: Option<Precondition>,
    check: Option<Arc<dyn ResourceCheck>>,
    state: Mutex<CoreState>,
    run_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("phase", &self.phase())
            .finish()
    }
}

impl TaskCore {
    /// Create a task in `NotStarted`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            mode: String::new(),
            variation: String::new(),
            known_failure: None,
            dependency: None,
            initial: None,
            completed: None,
            check: None,
            state: Mutex::new(CoreState {
                phase: Phase::NotStarted,
                failure_message: None,
                log: TaskLog::new(),
                duration: Stopwatch::default(),
                waiting: Stopwatch::default(),
                group: None,
            }),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Set the mode label (e.g. the test target).
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Set the variation label.
    pub fn with_variation(mut self, variation: impl Into<String>) -> Self {
        self.variation = variation.into();
        self
    }

    /// Annotate the task as a known failure.
    pub fn with_known_failure(mut self, note: Option<String>) -> Self {
        self.known_failure = note;
        self
    }

    /// Await `dependency` before starting.
    pub fn with_dependency(mut self, dependency: Precondition) -> Self {
        self.dependency = Some(dependency);
        self
    }

    /// Await `initial` (after the dependency) before starting.
    pub fn with_initial(mut self, initial: Precondition) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Await `completed` after the body, before finishing.
    pub fn with_completed(mut self, completed: Precondition) -> Self {
        self.completed = Some(completed);
        self
    }

    /// Verify `check` before starting the timer.
    pub fn with_check(mut self, check: Option<Arc<dyn ResourceCheck>>) -> Self {
        self.check = check;
        self
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Task id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mode label.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Variation label.
    pub fn variation(&self) -> &str {
        &self.variation
    }

    /// Triage note, if this is a known failure.
    pub fn known_failure(&self) -> Option<&str> {
        self.known_failure.as_deref()
    }

    /// Current phase.
    ///
    /// A task that belongs to a group reports the group's outcome once the
    /// group published one, unless the task itself was ignored.
    pub fn phase(&self) -> Phase {
        let mut state = self.lock();
        let published = state
            .group
            .as_ref()
            .and_then(|group| *group.borrow());
        if let Some(outcome) = published {
            if !state.phase.is_ignored() {
                state.phase = Phase::Finished(outcome);
            }
        }
        state.phase
    }

    /// Reason shown to the user for a failure.
    pub fn failure_message(&self) -> Option<String> {
        self.lock().failure_message.clone()
    }

    /// Time spent working, excluding waits.
    pub fn duration(&self) -> Duration {
        self.lock().duration.elapsed()
    }

    /// Time spent waiting on resources.
    pub fn waiting_duration(&self) -> Duration {
        self.lock().waiting.elapsed()
    }

    /// Copy of the task log.
    pub fn log(&self) -> TaskLog {
        self.lock().log.clone()
    }

    /// Append a line to the task log.
    pub fn write_log(&self, message: impl Into<String>) {
        self.lock().log.write(message);
    }

    /// Append captured tool output to the task log.
    pub fn write_log_block(&self, block: &str) {
        self.lock().log.write_block(block);
    }

    /// Record the reason for a failure.
    pub fn set_failure_message(&self, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.lock();
        state.log.write(format!("Failure: {message}"));
        state.failure_message = Some(message);
    }

    /// Move to an in-progress phase.
    pub fn set_phase(&self, phase: Phase) {
        let mut state = self.lock();
        debug!(task = %self.name, from = %state.phase, to = %phase, "phase");
        state.phase = phase;
    }

    /// Follow the outcome published by a group.
    pub fn join_group(&self, group: watch::Receiver<Option<Outcome>>) {
        self.lock().group = Some(group);
    }

    /// Toggle `Ignored`.
    pub fn set_ignored(&self, ignored: bool) -> Result<(), TaskError> {
        let mut state = self.lock();
        match (ignored, state.phase) {
            (true, Phase::NotStarted) => state.phase = Phase::Finished(Outcome::Ignored),
            (false, Phase::Finished(Outcome::Ignored)) => state.phase = Phase::NotStarted,
            (true, Phase::Finished(Outcome::Ignored)) | (false, Phase::NotStarted) => {}
            _ => return Err(TaskError::NotStarted(self.id)),
        }
        info!(task = %self.name, ignored, "ignore toggled");
        Ok(())
    }

    /// Whether [`TaskCore::reset`] would currently be accepted.
    pub fn can_reset(&self) -> Result<(), TaskError> {
        let Ok(_running) = self.run_lock.try_lock() else {
            return Err(TaskError::InProgress(self.id));
        };
        if self.lock().phase.is_in_progress() {
            return Err(TaskError::InProgress(self.id));
        }
        Ok(())
    }

    /// Return to `NotStarted`, clearing timers, log, failure message and group
    /// membership.
    pub fn reset(&self) -> Result<(), TaskError> {
        let Ok(_running) = self.run_lock.try_lock() else {
            return Err(TaskError::InProgress(self.id));
        };
        let mut state = self.lock();
        if state.phase.is_in_progress() {
            return Err(TaskError::InProgress(self.id));
        }
        state.phase = Phase::NotStarted;
        state.failure_message = None;
        state.log.clear();
        state.duration.reset();
        state.waiting.reset();
        state.group = None;
        info!(task = %self.name, "reset");
        Ok(())
    }

    /// Hold the run lock; nobody can run or reset the task meanwhile.
    pub async fn lock_run(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.run_lock.lock().await
    }

    /// Run the full lifecycle with `body`.
    pub async fn run(&self, body: &(dyn TaskBody + '_)) -> Phase {
        let _running = self.run_lock.lock().await;
        if let Some(finished) = self.enter().await {
            return finished;
        }
        let outcome = self.guarded(body.execute(self)).await;
        self.leave(outcome).await
    }

    /// Start the lifecycle: preconditions, resource check and timer.
    ///
    /// Returns the final phase if the task is already finished or could not
    /// start. The caller must hold the run lock.
    pub(crate) async fn enter(&self) -> Option<Phase> {
        let phase = self.phase();
        if phase.is_finished() {
            return Some(phase);
        }
        self.set_phase(Phase::Building { waiting: false });
        self.write_log("Started");

        for (label, precondition) in [("Dependency", &self.dependency), ("Initial task", &self.initial)] {
            if let Some(precondition) = precondition {
                if let Err(reason) = precondition.clone().await {
                    self.set_failure_message(format!("{label} failed: {reason}"));
                    return Some(self.finish(Outcome::Failed(Failure::Failed)));
                }
            }
        }

        if let Some(check) = &self.check {
            if let Err(e) = check.verify().await {
                self.set_failure_message(e.to_string());
                return Some(self.finish(Outcome::Failed(Failure::Failed)));
            }
        }

        self.lock().duration.start();
        None
    }

    /// Await `work`, turning errors and panics into `HarnessException`.
    pub(crate) async fn guarded<F>(&self, work: F) -> Outcome
    where
        F: Future<Output = anyhow::Result<Outcome>>,
    {
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(task = %self.name, "harness exception: {e:#}");
                self.set_failure_message(format!("Harness exception: {e:#}"));
                Outcome::Failed(Failure::HarnessException)
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(task = %self.name, "harness exception (panic): {reason}");
                self.set_failure_message(format!("Harness exception: {reason}"));
                Outcome::Failed(Failure::HarnessException)
            }
        }
    }

    /// Await the completion task and finish.
    pub(crate) async fn leave(&self, outcome: Outcome) -> Phase {
        let mut outcome = outcome;
        if let Some(completed) = &self.completed {
            if let Err(reason) = completed.clone().await {
                self.write_log(format!("Completed task failed: {reason}"));
                if outcome == Outcome::Succeeded {
                    self.set_failure_message(format!("Completed task failed: {reason}"));
                    outcome = Outcome::Failed(Failure::Failed);
                }
            }
        }
        self.finish(outcome)
    }

    fn finish(&self, outcome: Outcome) -> Phase {
        let mut state = self.lock();
        state.duration.stop();
        state.waiting.stop();
        state.phase = Phase::Finished(outcome);
        let line = format!("Finished: {}", state.phase);
        state.log.write(line);
        info!(
            task = %self.name,
            result = %state.phase,
            duration = ?state.duration.elapsed(),
            waiting = ?state.waiting.elapsed(),
            "task finished"
        );
        state.phase
    }

    fn begin_waiting(&self, resource: &str) -> WaitingGuard<'_> {
        let mut state = self.lock();
        state.phase = state.phase.with_waiting(true);
        let resumed = state.duration.is_running();
        state.duration.stop();
        state.waiting.start();
        state.log.write(format!("Waiting for {resource}"));
        debug!(task = %self.name, resource, "waiting");
        WaitingGuard {
            core: self,
            resumed,
        }
    }

    /// Acquire a concurrent token, marking the task as waiting while suspended.
    pub async fn acquire_concurrent(&self, pool: &ResourcePool) -> Result<AcquiredResource, ResourceError> {
        if let Some(token) = pool.try_acquire_concurrent() {
            return Ok(token);
        }
        let _waiting = self.begin_waiting(pool.name());
        pool.acquire_concurrent().await
    }

    /// Acquire an exclusive token, marking the task as waiting while suspended.
    pub async fn acquire_exclusive(&self, pool: &ResourcePool) -> Result<AcquiredResource, ResourceError> {
        if let Some(token) = pool.try_acquire_exclusive() {
            return Ok(token);
        }
        let _waiting = self.begin_waiting(pool.name());
        pool.acquire_exclusive().await
    }

    /// Acquire any member of `group`, marking the task as waiting while suspended.
    pub async fn acquire_any(
        &self,
        group: &ResourceGroup,
    ) -> Result<(usize, AcquiredResource), ResourceError> {
        if let Some(won) = group.try_acquire_any_concurrent() {
            return Ok(won);
        }
        let _waiting = self.begin_waiting("any device");
        group.acquire_any_concurrent().await
    }
}

/// Switches the task back from waiting to working when dropped.
struct WaitingGuard<'a> {
    core: &'a TaskCore,
    resumed: bool,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.core.lock();
        state.phase = state.phase.with_waiting(false);
        state.waiting.stop();
        if self.resumed {
            state.duration.start();
        }
    }
}
