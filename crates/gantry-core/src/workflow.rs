//! Workflow definition types.
//!
//! These types represent the user-authored workflow YAML configuration:
//! a named pipeline made of job templates, each an ordered list of steps
//! with optional matrix axes, upstream dependencies, and run conditions.

use crate::condition::Condition;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    /// Process-wide environment surface, visible to every step of every
    /// job instance (e.g. CARGO_TERM_COLOR).
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Path filters for pull-request triggers. A pull request starts a
    /// run only when its changed paths intersect this set.
    #[serde(default)]
    pub pull_request_paths: Vec<String>,
    pub jobs: Vec<JobTemplate>,
}

impl WorkflowDefinition {
    /// Look up a job template by name.
    pub fn job(&self, name: &str) -> Option<&JobTemplate> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Validate internal consistency: unique job names, `needs` edges
    /// pointing at declared jobs, and exactly one action per step.
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            return Err(Error::InvalidWorkflow("workflow has no jobs".into()));
        }
        let mut seen = Vec::new();
        for job in &self.jobs {
            if seen.contains(&&job.name) {
                return Err(Error::InvalidWorkflow(format!(
                    "duplicate job name: {}",
                    job.name
                )));
            }
            seen.push(&job.name);
        }
        for job in &self.jobs {
            for needed in &job.needs {
                if self.job(needed).is_none() {
                    return Err(Error::InvalidWorkflow(format!(
                        "job {} needs unknown job {}",
                        job.name, needed
                    )));
                }
                if needed == &job.name {
                    return Err(Error::InvalidWorkflow(format!(
                        "job {} needs itself",
                        job.name
                    )));
                }
            }
            for step in &job.steps {
                match (&step.run, &step.uses) {
                    (Some(_), Some(_)) => {
                        return Err(Error::InvalidWorkflow(format!(
                            "step {} declares both run and uses",
                            step.name
                        )));
                    }
                    (None, None) => {
                        return Err(Error::InvalidWorkflow(format!(
                            "step {} declares neither run nor uses",
                            step.name
                        )));
                    }
                    _ => {}
                }
            }
            if let Some(matrix) = &job.matrix {
                for axis in &matrix.axes {
                    if axis.values.is_empty() {
                        return Err(Error::InvalidWorkflow(format!(
                            "matrix axis {} of job {} has no values",
                            axis.name, job.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// The kind of event that triggered (or may trigger) a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Tag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Runner selection, parameterized over matrix axes
    /// (e.g. `${{ matrix.os }}`).
    #[serde(default)]
    pub runs_on: Option<String>,
    /// Upstream jobs whose every instance must succeed before this job
    /// is evaluated. A flat set; no transitive resolution.
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    pub steps: Vec<StepDefinition>,
    /// Marks this template as the release gate and configures which
    /// artifacts it bundles.
    #[serde(default)]
    pub release: Option<ReleaseConfig>,
}

impl JobTemplate {
    /// Gated jobs run after the un-gated wave completes.
    pub fn is_gated(&self) -> bool {
        !self.needs.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    /// Literal command executed in a shell-like environment.
    #[serde(default)]
    pub run: Option<String>,
    /// Reference to a reusable action with a version pin and parameters.
    #[serde(default)]
    pub uses: Option<ActionReference>,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReference {
    pub action: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub with: HashMap<String, String>,
}

impl ActionReference {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.with.get(key).map(String::as_str)
    }
}

/// Matrix axes are declared as an ordered list so expansion order is
/// deterministic; never rely on map iteration order here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub axes: Vec<MatrixAxis>,
    /// When true, one failing instance cancels its not-yet-terminal
    /// siblings. Off by default: one OS failing never aborts the other.
    #[serde(default)]
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Glob pattern selecting the artifacts to attach.
    pub artifacts: String,
    /// Ref prefix stripped to produce the release identifier.
    #[serde(default = "default_tag_prefix")]
    pub tag_prefix: String,
}

fn default_tag_prefix() -> String {
    "refs/tags/".to_string()
}
