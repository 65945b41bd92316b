//! The release gate.
//!
//! A release job is instantiated for every run but only evaluates when
//! its predicate holds: the triggering ref matches the tag pattern and
//! every instance of each upstream `needs` job succeeded. Otherwise it is
//! skipped, never failed. When it does evaluate, it fetches the expected
//! artifacts and performs the one all-or-nothing external effect in the
//! system: either a release is published or it is not.

use gantry_artifacts::ArtifactStore;
use gantry_core::Error;
use gantry_core::condition::ConditionContext;
use gantry_core::events::{Event, ReleasePublishedPayload, ReleaseSkippedPayload};
use gantry_core::ports::{EventSink, ReleaseAsset, ReleasePublisher};
use gantry_core::run::{JobStatus, PipelineRun};
use gantry_core::workflow::{JobTemplate, ReleaseConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// `Pending -> {Skipped | Evaluating} -> {Published | Failed}`.
/// `Evaluating` is transient; an outcome is always one of the other
/// four.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Skipped,
    Evaluating,
    Published,
    Failed,
}

#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub state: GateState,
    pub detail: Option<String>,
}

impl GateOutcome {
    fn skipped(detail: impl Into<String>) -> Self {
        Self {
            state: GateState::Skipped,
            detail: Some(detail.into()),
        }
    }

    fn failed(detail: impl Into<String>) -> Self {
        Self {
            state: GateState::Failed,
            detail: Some(detail.into()),
        }
    }

    /// The job status recorded for the release job instance.
    pub fn job_status(&self) -> JobStatus {
        match self.state {
            GateState::Published => JobStatus::Succeeded,
            GateState::Failed => JobStatus::Failed,
            _ => JobStatus::Skipped,
        }
    }
}

pub struct ReleaseGate {
    artifacts: Arc<ArtifactStore>,
    publisher: Arc<dyn ReleasePublisher>,
    events: Arc<dyn EventSink>,
}

impl ReleaseGate {
    pub fn new(
        artifacts: Arc<ArtifactStore>,
        publisher: Arc<dyn ReleasePublisher>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            artifacts,
            publisher,
            events,
        }
    }

    /// Evaluate the gate for one run. `expected` is the number of
    /// artifacts the upstream matrix is expected to have published.
    pub async fn evaluate(
        &self,
        run: &PipelineRun,
        template: &JobTemplate,
        release: &ReleaseConfig,
        expected: usize,
    ) -> GateOutcome {
        // Predicate: run condition holds and every upstream instance
        // succeeded. A failed build marks the release "never evaluated",
        // not "failed".
        let matrix = HashMap::new();
        if let Some(condition) = &template.condition {
            let ctx = ConditionContext {
                event: run.trigger.kind,
                git_ref: &run.trigger.git_ref,
                matrix: &matrix,
            };
            if !condition.evaluate(&ctx) {
                return self
                    .skip(run, format!("ref {} is not a release ref", run.trigger.git_ref))
                    .await;
            }
        }
        for needed in &template.needs {
            if !run.template_succeeded(needed) {
                return self
                    .skip(run, format!("upstream job {} did not fully succeed", needed))
                    .await;
            }
        }

        tracing::debug!(run = %run.id, pattern = %release.artifacts, "release gate evaluating");

        let entries = match self.artifacts.fetch(run.id, &release.artifacts).await {
            Ok(entries) => entries,
            Err(Error::ArtifactNotFound(_)) => {
                return GateOutcome::failed(
                    Error::MissingArtifacts {
                        expected,
                        found: 0,
                    }
                    .to_string(),
                );
            }
            Err(e) => return GateOutcome::failed(e.to_string()),
        };
        if entries.len() < expected {
            return GateOutcome::failed(
                Error::MissingArtifacts {
                    expected,
                    found: entries.len(),
                }
                .to_string(),
            );
        }

        let tag = run
            .trigger
            .git_ref
            .strip_prefix(&release.tag_prefix)
            .unwrap_or(&run.trigger.git_ref)
            .to_string();
        let assets: Vec<ReleaseAsset> = entries
            .iter()
            .map(|e| ReleaseAsset {
                name: e.name.clone(),
                payload: e.payload.clone(),
            })
            .collect();

        match self.publisher.create_release(&tag, &assets).await {
            Ok(()) => {
                self.publish(Event::ReleasePublished(ReleasePublishedPayload {
                    run_id: run.id,
                    tag: tag.clone(),
                    artifact_count: assets.len(),
                    published_at: chrono::Utc::now(),
                }))
                .await;
                tracing::info!(run = %run.id, tag = %tag, artifacts = assets.len(), "release published");
                GateOutcome {
                    state: GateState::Published,
                    detail: Some(tag),
                }
            }
            Err(e) => GateOutcome::failed(e.to_string()),
        }
    }

    async fn skip(&self, run: &PipelineRun, reason: String) -> GateOutcome {
        self.publish(Event::ReleaseSkipped(ReleaseSkippedPayload {
            run_id: run.id,
            reason: reason.clone(),
        }))
        .await;
        tracing::debug!(run = %run.id, reason = %reason, "release gate skipped");
        GateOutcome::skipped(reason)
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.events.publish(event).await {
            tracing::warn!(error = %e, "event sink rejected event");
        }
    }
}
