//! Run and execution state types.

use crate::error::{Error, Result};
use crate::ids::{JobId, RunId};
use crate::workflow::{StepDefinition, TriggerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Cancellation-group key: at most one active run per key at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub git_ref: String,
    pub workflow: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.workflow, self.git_ref)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub kind: TriggerKind,
    pub git_ref: String,
    pub git_sha: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// One execution of the whole orchestration, triggered by one event.
/// Owns its job instances and their step results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub workflow_name: String,
    pub trigger: TriggerInfo,
    pub jobs: Vec<JobInstance>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(workflow_name: impl Into<String>, trigger: TriggerInfo) -> Self {
        Self {
            id: RunId::new(),
            workflow_name: workflow_name.into(),
            trigger,
            jobs: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            git_ref: self.trigger.git_ref.clone(),
            workflow: self.workflow_name.clone(),
        }
    }

    pub fn job(&self, id: JobId) -> Option<&JobInstance> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn job_mut(&mut self, id: JobId) -> Option<&mut JobInstance> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn instances_of(&self, template: &str) -> impl Iterator<Item = &JobInstance> {
        self.jobs.iter().filter(move |j| j.template == template)
    }

    /// True when every instance of `template` reports `Succeeded`.
    pub fn template_succeeded(&self, template: &str) -> bool {
        let mut any = false;
        for job in self.instances_of(template) {
            any = true;
            if job.status != JobStatus::Succeeded {
                return false;
            }
        }
        any
    }

    /// Terminal when all job instances reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.jobs.iter().all(|j| j.status.is_terminal())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled
        )
    }

    /// Legal transitions: Pending -> Running -> {Succeeded|Failed},
    /// any non-terminal state -> {Cancelled|Skipped}. Terminal states
    /// are final.
    pub fn can_transition(&self, to: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(
                to,
                JobStatus::Running | JobStatus::Cancelled | JobStatus::Skipped
            ),
            JobStatus::Running => matches!(
                to,
                JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
            ),
            _ => false,
        }
    }
}

/// One concrete, matrix-expanded execution of a job template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: JobId,
    pub template: String,
    pub display_name: String,
    /// Axis assignment in declaration order.
    pub matrix: Vec<(String, String)>,
    /// Steps with the axis assignment already substituted in.
    pub steps: Vec<StepDefinition>,
    pub status: JobStatus,
    pub fail_fast: bool,
    pub results: Vec<StepResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobInstance {
    pub fn new(
        template: impl Into<String>,
        matrix: Vec<(String, String)>,
        steps: Vec<StepDefinition>,
        fail_fast: bool,
    ) -> Self {
        let template = template.into();
        let display_name = if matrix.is_empty() {
            template.clone()
        } else {
            let parts: Vec<String> = matrix.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("{} ({})", template, parts.join(", "))
        };
        Self {
            id: JobId::new(),
            template,
            display_name,
            matrix,
            steps,
            status: JobStatus::Pending,
            fail_fast,
            results: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn matrix_map(&self) -> HashMap<String, String> {
        self.matrix.iter().cloned().collect()
    }

    /// Guarded status transition; records timestamps on the way through.
    pub fn transition(&mut self, to: JobStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        if to == JobStatus::Running {
            self.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status = to;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub output: Vec<String>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped,
            exit_code: None,
            output: Vec::new(),
            duration_ms: 0,
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// A newer run in the same cancellation group took over.
    Superseded,
    /// A fail-fast sibling in the same matrix expansion failed.
    FailFast,
    UserRequested,
}
