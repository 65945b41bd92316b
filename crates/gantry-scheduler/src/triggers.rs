//! Trigger evaluation.
//!
//! Decides whether an incoming repository event produces a pipeline run
//! at all. Push and tag events always qualify; pull request events are
//! filtered against the workflow's path patterns so documentation-only
//! changes never spin up a run.

use chrono::Utc;
use gantry_core::patterns::any_match;
use gantry_core::run::TriggerInfo;
use gantry_core::workflow::{TriggerKind, WorkflowDefinition};

/// An incoming repository event, before any run exists for it.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    /// Fully qualified ref, e.g. `refs/heads/main` or `refs/tags/v1.2.0`.
    pub git_ref: String,
    pub git_sha: Option<String>,
    /// Paths touched by the change. Only consulted for pull requests.
    pub changed_paths: Vec<String>,
}

impl TriggerEvent {
    pub fn push(git_ref: impl Into<String>, git_sha: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Push,
            git_ref: git_ref.into(),
            git_sha: Some(git_sha.into()),
            changed_paths: Vec::new(),
        }
    }

    pub fn tag(git_ref: impl Into<String>, git_sha: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Tag,
            git_ref: git_ref.into(),
            git_sha: Some(git_sha.into()),
            changed_paths: Vec::new(),
        }
    }

    pub fn pull_request(
        git_ref: impl Into<String>,
        git_sha: impl Into<String>,
        changed_paths: Vec<String>,
    ) -> Self {
        Self {
            kind: TriggerKind::PullRequest,
            git_ref: git_ref.into(),
            git_sha: Some(git_sha.into()),
            changed_paths,
        }
    }

    pub fn trigger_info(&self) -> TriggerInfo {
        TriggerInfo {
            kind: self.kind,
            git_ref: self.git_ref.clone(),
            git_sha: self.git_sha.clone(),
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    /// Whether this event produces a run for the given workflow.
    pub fn should_run(&self, workflow: &WorkflowDefinition, event: &TriggerEvent) -> bool {
        match event.kind {
            TriggerKind::Push | TriggerKind::Tag => true,
            TriggerKind::PullRequest => {
                // No filter configured means every pull request runs.
                if workflow.pull_request_paths.is_empty() {
                    return true;
                }
                event
                    .changed_paths
                    .iter()
                    .any(|path| any_match(&workflow.pull_request_paths, path))
            }
        }
    }
}
