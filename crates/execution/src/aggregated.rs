//! Simulator tasks that share one simulator session.
//!
//! Booting and shutting down a simulator is expensive, so every run task
//! targeting the same simulator is grouped:
//!
//! ```text
//! build all (parallel) → desktop (exclusive) → select simulator → prepare once
//!     → run each member (serial) → teardown once → publish outcome
//! ```

use crate::error::TaskError;
use crate::services::Services;
use crate::task::{Task, TaskBody, TaskCore};
use crate::xi::{prepare_simulator, teardown_simulator, RunXiTask};
use async_trait::async_trait;
use futures::future::join_all;
use simlane_core::{Failure, Outcome, Phase, SimulatorDevice, TestTarget};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

type Member = Arc<RunXiTask<SimulatorDevice>>;

/// Runs a group of simulator tasks in one simulator session.
///
/// Once finished, the group's outcome is published to every member, which
/// then reports it instead of its own (ignored members stay ignored).
pub struct AggregatedSimulatorTask {
    core: TaskCore,
    target: TestTarget,
    services: Arc<Services>,
    members: Vec<Member>,
    outcome: watch::Sender<Option<Outcome>>,
}

impl AggregatedSimulatorTask {
    /// Group `members`, which all run on a `target` simulator.
    pub fn new(
        core: TaskCore,
        target: TestTarget,
        services: Arc<Services>,
        members: Vec<Member>,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        for member in &members {
            member.core().join_group(outcome.subscribe());
        }
        Self {
            core,
            target,
            services,
            members,
            outcome,
        }
    }

    /// Grouped tasks.
    pub fn grouped(&self) -> &[Member] {
        &self.members
    }

    /// Start a member's lifecycle and build it. Returns whether it built.
    async fn build_member(member: &Member) -> bool {
        let core = member.core();
        if core.enter().await.is_some() {
            return false;
        }
        match member.build_async().await {
            Phase::Built => {
                core.set_phase(Phase::Built);
                true
            }
            phase => {
                let outcome = phase
                    .outcome()
                    .unwrap_or(Outcome::Failed(Failure::HarnessException));
                core.leave(outcome).await;
                false
            }
        }
    }

    async fn finish_members(survivors: &[&Member], outcome: Outcome, message: &str) {
        for member in survivors {
            member.core().set_failure_message(message);
            member.core().leave(outcome).await;
        }
    }
}

#[async_trait]
impl TaskBody for AggregatedSimulatorTask {
    async fn execute(&self, core: &TaskCore) -> anyhow::Result<Outcome> {
        let active: Vec<&Member> = self
            .members
            .iter()
            .filter(|member| !member.phase().is_ignored())
            .collect();
        if active.is_empty() {
            return Ok(Outcome::Ignored);
        }

        // Members are only ever run through the group.
        let _running = join_all(active.iter().map(|member| member.core().lock_run())).await;

        let built = join_all(active.iter().map(|member| Self::build_member(member))).await;
        let survivors: Vec<&Member> = active
            .iter()
            .zip(built)
            .filter_map(|(member, built)| built.then_some(*member))
            .collect();
        if survivors.is_empty() {
            core.set_failure_message("No task in the group built successfully.");
            return Ok(Outcome::Failed(Failure::Failed));
        }

        core.set_phase(Phase::Running { waiting: false });
        let _desktop = core
            .acquire_exclusive(self.services.resources.desktop())
            .await?;

        let selection = match self
            .services
            .catalog
            .simulators()
            .find_simulators(self.target)
            .await
        {
            Ok(selection) => selection,
            Err(e) => {
                let message = format!("No applicable simulators found: {e}");
                Self::finish_members(&survivors, Outcome::DeviceNotFound, &message).await;
                core.set_failure_message(message);
                return Ok(Outcome::DeviceNotFound);
            }
        };
        info!(
            task = %core.name(),
            udid = %selection.device.udid,
            members = survivors.len(),
            "running group"
        );

        let bundles: Vec<&str> = survivors
            .iter()
            .map(|member| member.step().app().bundle_identifier.as_str())
            .collect();
        let prepared = prepare_simulator(core, &self.services, &selection, &bundles).await;

        match &prepared {
            Ok(()) => {
                for member in &survivors {
                    let member_core = member.core();
                    member_core.set_phase(Phase::Running { waiting: false });
                    let outcome = member_core
                        .guarded(member.step().run_on(member_core, &selection))
                        .await;
                    member_core.leave(outcome).await;
                }
            }
            Err(e) => {
                let message = format!("Simulator preparation failed: {e:#}");
                Self::finish_members(
                    &survivors,
                    Outcome::Failed(Failure::HarnessException),
                    &message,
                )
                .await;
            }
        }
        teardown_simulator(core, &self.services, &selection).await;
        prepared?;

        let failed = active
            .iter()
            .filter(|member| member.phase().is_failed())
            .count();
        if failed > 0 {
            core.set_failure_message(format!("{failed} of {} tasks failed", active.len()));
            return Ok(Outcome::Failed(Failure::Failed));
        }
        Ok(Outcome::Succeeded)
    }
}

#[async_trait]
impl Task for AggregatedSimulatorTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    async fn run(&self) -> Phase {
        let phase = self.core.run(self).await;
        if let Some(outcome) = phase.outcome() {
            self.outcome.send_replace(Some(outcome));
        }
        phase
    }

    /// Resets the group and every member, and re-attaches the members.
    fn reset(&self) -> Result<(), TaskError> {
        self.core.can_reset()?;
        for member in &self.members {
            member.core().can_reset()?;
        }
        self.core.reset()?;
        self.outcome.send_replace(None);
        for member in &self.members {
            member.reset()?;
            member.core().join_group(self.outcome.subscribe());
        }
        Ok(())
    }

    fn set_ignored(&self, ignored: bool) -> Result<(), TaskError> {
        self.core.set_ignored(ignored)?;
        for member in &self.members {
            member.set_ignored(ignored)?;
        }
        Ok(())
    }

    fn members(&self) -> Vec<Arc<dyn Task>> {
        self.members
            .iter()
            .map(|member| Arc::clone(member) as Arc<dyn Task>)
            .collect()
    }
}
