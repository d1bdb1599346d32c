//! Top-level driver: builds the task graph and runs it.

use crate::aggregated::AggregatedSimulatorTask;
use crate::build::BuildTask;
use crate::config::{HarnessConfig, ProjectConfig};
use crate::error::TaskError;
use crate::run::RunTask;
use crate::services::Services;
use crate::summary::{RunSummary, TaskReport};
use crate::task::{Task, TaskCore};
use crate::xi::{AppBundle, MacRun, RunXiTask, XiRun};
use futures::future::join_all;
use simlane_core::{Device, SimulatorDevice, TaskId, TestTarget};
use simlane_tools::BuildRequest;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns every task of a run.
///
/// Device discovery starts in the background when the run starts; tasks that
/// need devices wait for it themselves.
pub struct Scheduler {
    services: Arc<Services>,
    tasks: Vec<Arc<dyn Task>>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            tasks: Vec::new(),
        }
    }

    /// Shared services.
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Add a top-level task.
    pub fn add(&mut self, task: Arc<dyn Task>) {
        self.tasks.push(task);
    }

    /// Top-level tasks.
    pub fn tasks(&self) -> &[Arc<dyn Task>] {
        &self.tasks
    }

    /// Create tasks for every configured project.
    ///
    /// One build is created per project and build platform and shared by the
    /// run tasks using it. Simulator tasks are grouped per target into an
    /// [`AggregatedSimulatorTask`].
    pub fn populate(&mut self, config: &HarnessConfig) -> Result<(), TaskError> {
        let mut builds: HashMap<(usize, &'static str), Arc<BuildTask>> = HashMap::new();
        let mut simulator_groups: BTreeMap<TestTarget, Vec<Arc<RunXiTask<SimulatorDevice>>>> =
            BTreeMap::new();

        for (index, project) in config.projects.iter().enumerate() {
            for &target in &project.targets {
                let build = builds
                    .entry((index, target.build_platform()))
                    .or_insert_with(|| self.build_task(project, target))
                    .clone();
                let core = self.run_core(project, target);
                let app = AppBundle {
                    bundle_identifier: project.bundle_identifier.clone(),
                    app_path: project.app_path.clone(),
                };

                let task: Arc<dyn Task> = if target.is_simulator() {
                    let step = XiRun::<SimulatorDevice>::new(app, target, Arc::clone(&self.services));
                    let task = Arc::new(
                        RunTask::new(core, build, step).with_build_only(project.build_only),
                    );
                    simulator_groups.entry(target).or_default().push(Arc::clone(&task));
                    task
                } else if target.is_device() {
                    let step = XiRun::<Device>::new(app, target, Arc::clone(&self.services));
                    let task = Arc::new(
                        RunTask::new(core, build, step).with_build_only(project.build_only),
                    );
                    self.tasks.push(task.clone());
                    task
                } else {
                    let step = MacRun::new(&project.app_path, Arc::clone(&self.services));
                    let task = Arc::new(
                        RunTask::new(core, build, step).with_build_only(project.build_only),
                    );
                    self.tasks.push(task.clone());
                    task
                };
                if project.ignored {
                    task.set_ignored(true)?;
                }
                debug!(task = %task.core().name(), "task created");
            }
        }

        for (target, members) in simulator_groups {
            let core = TaskCore::new(format!("{target} simulator group")).with_mode(target.as_str());
            let group =
                AggregatedSimulatorTask::new(core, target, Arc::clone(&self.services), members);
            self.tasks.push(Arc::new(group));
        }
        info!(tasks = self.tasks.len(), builds = builds.len(), "populated");
        Ok(())
    }

    fn build_task(&self, project: &ProjectConfig, target: TestTarget) -> Arc<BuildTask> {
        let request = BuildRequest {
            project_path: project.path.clone(),
            configuration: project.configuration.clone(),
            platform: target.build_platform().to_string(),
            timeout: self.services.timeouts.build(),
        };
        let core = TaskCore::new(format!("Build {} ({})", project.name, target.build_platform()))
            .with_mode(target.build_platform())
            .with_variation(&project.variation)
            .with_check(self.services.check.clone());
        Arc::new(
            BuildTask::new(core, Arc::clone(&self.services), request)
                .with_restore_packages(project.restore_packages),
        )
    }

    fn run_core(&self, project: &ProjectConfig, target: TestTarget) -> TaskCore {
        TaskCore::new(format!("{} ({target})", project.name))
            .with_mode(target.as_str())
            .with_variation(&project.variation)
            .with_known_failure(project.known_failure.clone())
            .with_check(self.services.check.clone())
    }

    /// Run every task not yet finished and summarize.
    ///
    /// Finished tasks keep their outcome; reset them to run them again.
    pub async fn run(&self) -> RunSummary {
        let catalog = Arc::clone(&self.services.catalog);
        let discovery = tokio::spawn(async move {
            if let Err(e) = catalog.load(false).await {
                warn!("device discovery failed: {e}");
            }
        });

        info!(tasks = self.tasks.len(), "starting run");
        join_all(self.tasks.iter().map(|task| task.run())).await;

        if let Err(e) = discovery.await {
            warn!("device discovery aborted: {e}");
        }
        let summary = self.summary();
        info!("run finished: {summary}");
        summary
    }

    /// Find a task (top-level or grouped) by id.
    pub fn find(&self, id: TaskId) -> Option<Arc<dyn Task>> {
        fn search(tasks: &[Arc<dyn Task>], id: TaskId) -> Option<Arc<dyn Task>> {
            for task in tasks {
                if task.core().id() == id {
                    return Some(Arc::clone(task));
                }
                if let Some(found) = search(&task.members(), id) {
                    return Some(found);
                }
            }
            None
        }
        search(&self.tasks, id)
    }

    /// Toggle `Ignored` on a task that has not started.
    pub fn set_ignored(&self, id: TaskId, ignored: bool) -> Result<(), TaskError> {
        self.find(id).ok_or(TaskError::NotFound(id))?.set_ignored(ignored)
    }

    /// Return a task that is not running to `NotStarted`.
    ///
    /// Grouped tasks only run through their group, so resetting one resets
    /// the whole group.
    pub fn reset(&self, id: TaskId) -> Result<(), TaskError> {
        if let Some(group) = self.group_of(id) {
            return group.reset();
        }
        self.find(id).ok_or(TaskError::NotFound(id))?.reset()
    }

    fn group_of(&self, id: TaskId) -> Option<&Arc<dyn Task>> {
        self.tasks.iter().find(|task| {
            task.members()
                .iter()
                .any(|member| member.core().id() == id)
        })
    }

    /// Snapshot of every top-level task.
    pub fn report(&self) -> Vec<TaskReport> {
        self.tasks.iter().map(|task| task.report()).collect()
    }

    /// Counts over the current state.
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_reports(self.report())
    }
}
