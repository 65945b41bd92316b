//! Lifecycle events emitted by the orchestrator.

use crate::ids::{ArtifactId, JobId, RunId};
use crate::run::{CancelReason, JobStatus, StepStatus};
use crate::workflow::TriggerKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All events in the Gantry system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Run lifecycle
    RunQueued(RunQueuedPayload),
    RunCompleted(RunCompletedPayload),
    RunCancelled(RunCancelledPayload),

    // Job lifecycle
    JobStarted(JobStartedPayload),
    JobCompleted(JobCompletedPayload),

    // Step lifecycle
    StepCompleted(StepCompletedPayload),

    // Matrix
    MatrixExpanded(MatrixExpandedPayload),

    // Artifact exchange
    ArtifactPublished(ArtifactPublishedPayload),

    // Cache
    CacheHit(CachePayload),
    CacheMiss(CachePayload),

    // Release gate
    ReleasePublished(ReleasePublishedPayload),
    ReleaseSkipped(ReleaseSkippedPayload),
}

impl Event {
    /// Returns the dotted subject for this event.
    pub fn subject(&self) -> String {
        match self {
            Event::RunQueued(p) => format!("run.queued.{}", p.run_id),
            Event::RunCompleted(p) => format!("run.completed.{}", p.run_id),
            Event::RunCancelled(p) => format!("run.cancelled.{}", p.run_id),
            Event::JobStarted(p) => format!("run.{}.job.{}.started", p.run_id, p.job_id),
            Event::JobCompleted(p) => format!("run.{}.job.{}.completed", p.run_id, p.job_id),
            Event::StepCompleted(p) => {
                format!("run.{}.job.{}.step.completed", p.run_id, p.job_id)
            }
            Event::MatrixExpanded(p) => format!("run.{}.matrix.{}", p.run_id, p.template),
            Event::ArtifactPublished(p) => format!("run.{}.artifact.published", p.run_id),
            Event::CacheHit(p) => format!("run.{}.cache.hit", p.run_id),
            Event::CacheMiss(p) => format!("run.{}.cache.miss", p.run_id),
            Event::ReleasePublished(p) => format!("run.{}.release.published", p.run_id),
            Event::ReleaseSkipped(p) => format!("run.{}.release.skipped", p.run_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunQueuedPayload {
    pub run_id: RunId,
    pub workflow_name: String,
    pub trigger: TriggerKind,
    pub git_ref: String,
    pub git_sha: Option<String>,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub workflow_name: String,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub jobs_skipped: usize,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCancelledPayload {
    pub run_id: RunId,
    pub reason: CancelReason,
    pub superseded_by: Option<RunId>,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStartedPayload {
    pub run_id: RunId,
    pub job_id: JobId,
    pub display_name: String,
    pub step_count: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompletedPayload {
    pub run_id: RunId,
    pub job_id: JobId,
    pub display_name: String,
    pub status: JobStatus,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedPayload {
    pub run_id: RunId,
    pub job_id: JobId,
    pub step_name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixExpandedPayload {
    pub run_id: RunId,
    pub template: String,
    pub instance_count: usize,
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPublishedPayload {
    pub run_id: RunId,
    pub artifact_id: ArtifactId,
    pub name: String,
    pub size_bytes: u64,
    pub produced_by: JobId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePayload {
    pub run_id: RunId,
    pub job_id: JobId,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasePublishedPayload {
    pub run_id: RunId,
    pub tag: String,
    pub artifact_count: usize,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSkippedPayload {
    pub run_id: RunId,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_shapes() {
        let run_id = RunId::new();
        let event = Event::RunQueued(RunQueuedPayload {
            run_id,
            workflow_name: "rust".to_string(),
            trigger: TriggerKind::Push,
            git_ref: "refs/heads/main".to_string(),
            git_sha: None,
            queued_at: Utc::now(),
        });
        assert_eq!(event.subject(), format!("run.queued.{}", run_id));
    }

    #[test]
    fn test_event_roundtrip() {
        let event = Event::ReleasePublished(ReleasePublishedPayload {
            run_id: RunId::new(),
            tag: "v1.0.0".to_string(),
            artifact_count: 2,
            published_at: Utc::now(),
        });
        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.subject(), event.subject());
    }
}
