//! Read-only reporting of task state.

use crate::task::{Task, TaskCore};
use serde::Serialize;
use simlane_core::{Outcome, Phase, TaskId};
use std::sync::Arc;

/// What an external reporter may see of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    /// Stable id
    pub id: TaskId,
    /// Name
    pub name: String,
    /// Mode label
    pub mode: String,
    /// Variation label
    pub variation: String,
    /// Current state
    pub phase: Phase,
    /// Human readable state
    pub state: &'static str,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    /// Triage note for a known failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_failure: Option<String>,
    /// Working time in seconds
    pub duration_secs: f64,
    /// Waiting time in seconds
    pub waiting_secs: f64,
    /// Tasks run as part of this one
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<TaskReport>,
}

impl TaskReport {
    /// Snapshot a task.
    pub fn new(core: &TaskCore, phase: Phase, members: Vec<Arc<dyn Task>>) -> Self {
        Self {
            id: core.id(),
            name: core.name().to_string(),
            mode: core.mode().to_string(),
            variation: core.variation().to_string(),
            phase,
            state: phase.label(),
            failure_message: core.failure_message(),
            known_failure: core.known_failure().map(str::to_string),
            duration_secs: core.duration().as_secs_f64(),
            waiting_secs: core.waiting_duration().as_secs_f64(),
            members: members.iter().map(|member| member.report()).collect(),
        }
    }

    /// This report and every member report, depth first.
    pub fn flatten(&self) -> Vec<&TaskReport> {
        let mut all = vec![self];
        for member in &self.members {
            all.extend(member.flatten());
        }
        all
    }

    fn leaves(&self) -> Vec<&TaskReport> {
        if self.members.is_empty() {
            return vec![self];
        }
        self.members.iter().flat_map(TaskReport::leaves).collect()
    }
}

/// Aggregate counts over every leaf task of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Leaf tasks
    pub total: usize,
    /// Succeeded
    pub succeeded: usize,
    /// Failed of any kind
    pub failed: usize,
    /// Failed with a known failure annotation (included in `failed`)
    pub known_failures: usize,
    /// No device found
    pub device_not_found: usize,
    /// Ignored
    pub ignored: usize,
    /// Not finished
    pub unfinished: usize,
    /// Per task reports
    pub tasks: Vec<TaskReport>,
}

impl RunSummary {
    /// Summarize top-level task reports.
    pub fn from_reports(tasks: Vec<TaskReport>) -> Self {
        let mut summary = Self::default();
        for leaf in tasks.iter().flat_map(TaskReport::leaves) {
            summary.total += 1;
            match leaf.phase.outcome() {
                Some(Outcome::Succeeded) => summary.succeeded += 1,
                Some(Outcome::Failed(_)) => {
                    summary.failed += 1;
                    if leaf.known_failure.is_some() {
                        summary.known_failures += 1;
                    }
                }
                Some(Outcome::DeviceNotFound) => summary.device_not_found += 1,
                Some(Outcome::Ignored) => summary.ignored += 1,
                None => summary.unfinished += 1,
            }
        }
        summary.tasks = tasks;
        summary
    }

    /// Whether any non-ignored task failed or found no device.
    pub fn is_failure(&self) -> bool {
        self.failed > 0 || self.device_not_found > 0
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        if self.is_failure() {
            1
        } else {
            0
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tasks: {} succeeded, {} failed ({} known), {} device not found, {} ignored",
            self.total,
            self.succeeded,
            self.failed,
            self.known_failures,
            self.device_not_found,
            self.ignored
        )?;
        if self.unfinished > 0 {
            write!(f, ", {} unfinished", self.unfinished)?;
        }
        Ok(())
    }
}
