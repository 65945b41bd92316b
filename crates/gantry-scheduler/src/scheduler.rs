//! Run orchestration.
//!
//! Drives one pipeline run end to end: trigger evaluation, admission
//! into the concurrency group, matrix expansion, parallel execution of
//! the un-gated wave, then gated jobs and the release gate once every
//! upstream instance is terminal.

use crate::concurrency::ConcurrencyGovernor;
use crate::matrix::MatrixExpander;
use crate::triggers::{TriggerEvaluator, TriggerEvent};
use chrono::Utc;
use gantry_core::Result;
use gantry_core::condition::ConditionContext;
use gantry_core::events::{
    Event, MatrixExpandedPayload, RunCancelledPayload, RunCompletedPayload, RunQueuedPayload,
};
use gantry_core::ids::RunId;
use gantry_core::ports::ReleasePublisher;
use gantry_core::run::{CancelReason, JobInstance, JobStatus, PipelineRun};
use gantry_core::workflow::{JobTemplate, WorkflowDefinition};
use gantry_runner::{Cancellation, ExecutorContext, GateState, ReleaseGate, run_job};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Terminal summary of one run, for callers that report to a human.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    /// Run this one cancelled on admission, if any.
    pub superseded: Option<RunId>,
    pub jobs: Vec<JobReport>,
    pub release: Option<GateState>,
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub template: String,
    pub display_name: String,
    pub status: JobStatus,
}

impl RunReport {
    /// A run succeeds when no job failed or was cancelled and the
    /// release gate, if it evaluated, published.
    pub fn success(&self) -> bool {
        let jobs_ok = self
            .jobs
            .iter()
            .all(|j| matches!(j.status, JobStatus::Succeeded | JobStatus::Skipped));
        jobs_ok && self.release != Some(GateState::Failed)
    }
}

pub struct Scheduler {
    workflow: WorkflowDefinition,
    evaluator: TriggerEvaluator,
    expander: MatrixExpander,
    governor: Arc<ConcurrencyGovernor>,
    ctx: ExecutorContext,
    publisher: Arc<dyn ReleasePublisher>,
}

impl Scheduler {
    pub fn new(
        workflow: WorkflowDefinition,
        governor: Arc<ConcurrencyGovernor>,
        ctx: ExecutorContext,
        publisher: Arc<dyn ReleasePublisher>,
    ) -> Result<Self> {
        workflow.validate()?;
        Ok(Self {
            workflow,
            evaluator: TriggerEvaluator,
            expander: MatrixExpander,
            governor,
            ctx,
            publisher,
        })
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        &self.workflow
    }

    /// Handle one repository event. Returns `None` when the trigger
    /// filter rejects it, otherwise drives a run to completion and
    /// returns its report.
    pub async fn handle_event(&self, event: TriggerEvent) -> Result<Option<RunReport>> {
        if !self.evaluator.should_run(&self.workflow, &event) {
            tracing::debug!(git_ref = %event.git_ref, "trigger rejected by path filter");
            return Ok(None);
        }

        let mut run = PipelineRun::new(self.workflow.name.clone(), event.trigger_info());
        let group = run.group_key();
        let (cancel_rx, superseded) = self.governor.admit(group.clone(), run.id).await;

        self.publish(Event::RunQueued(RunQueuedPayload {
            run_id: run.id,
            workflow_name: run.workflow_name.clone(),
            trigger: run.trigger.kind,
            git_ref: run.trigger.git_ref.clone(),
            git_sha: run.trigger.git_sha.clone(),
            queued_at: run.created_at,
        }))
        .await;
        if let Some(old) = superseded {
            self.publish(Event::RunCancelled(RunCancelledPayload {
                run_id: old,
                reason: CancelReason::Superseded,
                superseded_by: Some(run.id),
                cancelled_at: Utc::now(),
            }))
            .await;
        }
        tracing::info!(run = %run.id, group = %group, "run queued");

        self.run_wave(&mut run, &cancel_rx).await;
        let release = self.run_gated(&mut run, &cancel_rx).await;

        run.completed_at = Some(Utc::now());
        self.governor.release(&group, run.id).await;

        let (succeeded, failed, skipped) = run.jobs.iter().fold((0, 0, 0), |acc, j| match j.status {
            JobStatus::Succeeded => (acc.0 + 1, acc.1, acc.2),
            JobStatus::Failed | JobStatus::Cancelled => (acc.0, acc.1 + 1, acc.2),
            _ => (acc.0, acc.1, acc.2 + 1),
        });
        self.publish(Event::RunCompleted(RunCompletedPayload {
            run_id: run.id,
            workflow_name: run.workflow_name.clone(),
            jobs_succeeded: succeeded,
            jobs_failed: failed,
            jobs_skipped: skipped,
            completed_at: Utc::now(),
        }))
        .await;
        tracing::info!(run = %run.id, succeeded, failed, skipped, "run completed");

        Ok(Some(RunReport {
            run_id: run.id,
            superseded,
            jobs: run
                .jobs
                .iter()
                .map(|j| JobReport {
                    template: j.template.clone(),
                    display_name: j.display_name.clone(),
                    status: j.status,
                })
                .collect(),
            release,
        }))
    }

    /// Execute every un-gated template's instances in parallel.
    async fn run_wave(&self, run: &mut PipelineRun, cancel_rx: &watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();
        // One fail-fast channel per expansion; a failing instance only
        // ever cancels its own siblings.
        let mut fail_fast_txs: HashMap<String, watch::Sender<bool>> = HashMap::new();

        for template in self.workflow.jobs.iter().filter(|t| !t.is_gated()) {
            let instances =
                self.expander
                    .expand(template, &self.workflow.env, &run.trigger.git_ref);

            if !self.template_condition_holds(template, run) {
                for mut instance in instances {
                    let _ = instance.transition(JobStatus::Skipped);
                    run.jobs.push(instance);
                }
                continue;
            }

            if template.matrix.is_some() {
                self.publish(Event::MatrixExpanded(MatrixExpandedPayload {
                    run_id: run.id,
                    template: template.name.clone(),
                    instance_count: instances.len(),
                    fail_fast: template.matrix.as_ref().is_some_and(|m| m.fail_fast),
                }))
                .await;
            }

            let fail_fast = instances.iter().any(|i| i.fail_fast);
            let ff_rx = fail_fast.then(|| {
                let (tx, rx) = watch::channel(false);
                fail_fast_txs.insert(template.name.clone(), tx);
                rx
            });

            for instance in instances {
                let mut cancel = Cancellation::new(cancel_rx.clone());
                if let Some(rx) = &ff_rx {
                    cancel = cancel.with(rx.clone());
                }
                let ctx = self.ctx.clone();
                let run_id = run.id;
                let trigger = run.trigger.clone();
                tasks.spawn(async move { run_job(&ctx, run_id, &trigger, instance, cancel).await });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(instance) => {
                    if instance.status == JobStatus::Failed
                        && instance.fail_fast
                        && let Some(tx) = fail_fast_txs.get(&instance.template)
                    {
                        let _ = tx.send(true);
                    }
                    run.jobs.push(instance);
                }
                Err(e) => {
                    tracing::error!(run = %run.id, error = %e, "executor task panicked");
                }
            }
        }
    }

    /// Execute gated templates once the un-gated wave is terminal. The
    /// release gate gets its own state machine; other gated jobs run
    /// when every upstream instance succeeded and are skipped otherwise.
    /// Gated jobs stay on the run's cancel signal, so a superseded run
    /// still terminates here.
    async fn run_gated(
        &self,
        run: &mut PipelineRun,
        cancel_rx: &watch::Receiver<bool>,
    ) -> Option<GateState> {
        let mut release_state = None;

        for template in self.workflow.jobs.iter().filter(|t| t.is_gated()) {
            if let Some(release) = &template.release {
                let gate = ReleaseGate::new(
                    self.ctx.artifacts.clone(),
                    self.publisher.clone(),
                    self.ctx.events.clone(),
                );
                // Only upstream jobs that actually upload contribute to
                // the expected artifact count.
                let expected: usize = template
                    .needs
                    .iter()
                    .filter(|needed| {
                        self.workflow
                            .job(needed)
                            .is_some_and(template_uploads_artifacts)
                    })
                    .map(|needed| run.instances_of(needed).count())
                    .sum();
                let outcome = gate.evaluate(run, template, release, expected).await;

                let mut instance =
                    JobInstance::new(template.name.clone(), Vec::new(), Vec::new(), false);
                record_outcome(&mut instance, outcome.job_status());
                run.jobs.push(instance);
                release_state = Some(outcome.state);
                continue;
            }

            let upstream_ok = template.needs.iter().all(|n| run.template_succeeded(n));
            if !upstream_ok || !self.template_condition_holds(template, run) {
                let mut instance =
                    JobInstance::new(template.name.clone(), Vec::new(), Vec::new(), false);
                let _ = instance.transition(JobStatus::Skipped);
                run.jobs.push(instance);
                continue;
            }

            let mut tasks = JoinSet::new();
            for instance in
                self.expander
                    .expand(template, &self.workflow.env, &run.trigger.git_ref)
            {
                let ctx = self.ctx.clone();
                let run_id = run.id;
                let trigger = run.trigger.clone();
                let cancel = Cancellation::new(cancel_rx.clone());
                tasks.spawn(async move { run_job(&ctx, run_id, &trigger, instance, cancel).await });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(instance) => run.jobs.push(instance),
                    Err(e) => {
                        tracing::error!(run = %run.id, error = %e, "executor task panicked");
                    }
                }
            }
        }

        release_state
    }

    fn template_condition_holds(&self, template: &JobTemplate, run: &PipelineRun) -> bool {
        let matrix = HashMap::new();
        template.condition.as_ref().is_none_or(|condition| {
            condition.evaluate(&ConditionContext {
                event: run.trigger.kind,
                git_ref: &run.trigger.git_ref,
                matrix: &matrix,
            })
        })
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.ctx.events.publish(event).await {
            tracing::warn!(error = %e, "event sink rejected event");
        }
    }
}

/// Whether any step of the template uploads an artifact.
fn template_uploads_artifacts(template: &JobTemplate) -> bool {
    template
        .steps
        .iter()
        .any(|step| step.uses.as_ref().is_some_and(|u| u.action == "upload-artifact"))
}

/// Drive a freshly built placeholder instance straight to a terminal
/// state through the legal transition path.
fn record_outcome(instance: &mut JobInstance, status: JobStatus) {
    match status {
        JobStatus::Succeeded | JobStatus::Failed => {
            let _ = instance.transition(JobStatus::Running);
            let _ = instance.transition(status);
        }
        _ => {
            let _ = instance.transition(status);
        }
    }
}
