//! The job executor.
//!
//! Runs the steps of one job instance strictly in declared order on a
//! single logical worker. Step guards are evaluated against typed run
//! state before execution; a skipped step counts as a no-op success. The
//! first failing step aborts the remaining steps and fails the job
//! without rolling back earlier steps' effects. Cancellation is observed
//! at a checkpoint between steps and raced against in-flight action
//! invocations.

use gantry_artifacts::ArtifactStore;
use gantry_core::condition::ConditionContext;
use gantry_core::events::{
    CachePayload, Event, JobCompletedPayload, JobStartedPayload, StepCompletedPayload,
};
use gantry_core::ids::{JobId, RunId};
use gantry_core::interpolation::InterpolationContext;
use gantry_core::ports::{ActionRunner, CacheProvider, EventSink, StepInvocation};
use gantry_core::run::{JobInstance, JobStatus, StepResult, StepStatus, TriggerInfo};
use gantry_core::workflow::{ActionReference, StepDefinition};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared services every job executor borrows: the artifact exchange,
/// the dependency cache, the external action runner, the event sink, and
/// the process-wide environment surface.
#[derive(Clone)]
pub struct ExecutorContext {
    pub artifacts: Arc<ArtifactStore>,
    pub cache: Arc<dyn CacheProvider>,
    pub runner: Arc<dyn ActionRunner>,
    pub events: Arc<dyn EventSink>,
    pub workspace: PathBuf,
    pub env: HashMap<String, String>,
}

/// Merged cancellation signal. A job can be cancelled by the concurrency
/// governor (run superseded) or by a fail-fast sibling; either source
/// flips a watch channel and the executor stops at the next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    receivers: Vec<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A signal that never fires.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self {
            receivers: vec![rx],
        }
    }

    pub fn with(mut self, rx: watch::Receiver<bool>) -> Self {
        self.receivers.push(rx);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.receivers.iter().any(|rx| *rx.borrow())
    }

    /// Resolves when any source signals cancellation; pending forever
    /// otherwise.
    pub async fn cancelled(&self) {
        if self.receivers.is_empty() {
            std::future::pending::<()>().await;
        }
        let futures = self
            .receivers
            .iter()
            .map(|rx| {
                let mut rx = rx.clone();
                Box::pin(async move {
                    loop {
                        if *rx.borrow() {
                            return;
                        }
                        if rx.changed().await.is_err() {
                            // Sender gone; this source can never fire.
                            std::future::pending::<()>().await;
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        futures::future::select_all(futures).await;
    }
}

/// Execute one job instance to a terminal state and return it with its
/// step results recorded.
pub async fn run_job(
    ctx: &ExecutorContext,
    run_id: RunId,
    trigger: &TriggerInfo,
    mut job: JobInstance,
    cancel: Cancellation,
) -> JobInstance {
    if cancel.is_cancelled() {
        let _ = job.transition(JobStatus::Cancelled);
        return job;
    }
    if job.transition(JobStatus::Running).is_err() {
        // Already driven to a terminal state (e.g. cancelled before
        // a worker picked it up).
        return job;
    }

    publish(
        ctx,
        Event::JobStarted(JobStartedPayload {
            run_id,
            job_id: job.id,
            display_name: job.display_name.clone(),
            step_count: job.steps.len(),
            started_at: chrono::Utc::now(),
        }),
    )
    .await;
    tracing::info!(run = %run_id, job = %job.display_name, "job started");

    let matrix = job.matrix_map();
    let steps = job.steps.clone();

    for step in &steps {
        if cancel.is_cancelled() {
            let _ = job.transition(JobStatus::Cancelled);
            break;
        }

        // Step guard: false means skip, which counts as a no-op success.
        if let Some(condition) = &step.condition {
            let cctx = ConditionContext {
                event: trigger.kind,
                git_ref: &trigger.git_ref,
                matrix: &matrix,
            };
            if !condition.evaluate(&cctx) {
                let result = StepResult::skipped(&step.name);
                emit_step(ctx, run_id, job.id, &result).await;
                job.results.push(result);
                continue;
            }
        }

        let result = execute_step(ctx, run_id, job.id, trigger, &matrix, step, &cancel).await;
        emit_step(ctx, run_id, job.id, &result).await;
        let status = result.status;
        job.results.push(result);

        match status {
            StepStatus::Cancelled => {
                let _ = job.transition(JobStatus::Cancelled);
                break;
            }
            StepStatus::Failed if !step.continue_on_error => {
                let _ = job.transition(JobStatus::Failed);
                break;
            }
            _ => {}
        }
    }

    if job.status == JobStatus::Running {
        let _ = job.transition(JobStatus::Succeeded);
    }

    let duration_ms = job
        .started_at
        .zip(job.completed_at)
        .map(|(s, e)| (e - s).num_milliseconds().max(0) as u64)
        .unwrap_or(0);
    publish(
        ctx,
        Event::JobCompleted(JobCompletedPayload {
            run_id,
            job_id: job.id,
            display_name: job.display_name.clone(),
            status: job.status,
            duration_ms,
            completed_at: chrono::Utc::now(),
        }),
    )
    .await;
    tracing::info!(run = %run_id, job = %job.display_name, status = ?job.status, "job completed");

    job
}

async fn execute_step(
    ctx: &ExecutorContext,
    run_id: RunId,
    job_id: JobId,
    trigger: &TriggerInfo,
    matrix: &HashMap<String, String>,
    step: &StepDefinition,
    cancel: &Cancellation,
) -> StepResult {
    let started = std::time::Instant::now();

    let mut interp = InterpolationContext::new();
    interp.env = ctx.env.clone();
    interp.matrix = matrix.clone();
    interp.git_ref = trigger.git_ref.clone();

    let mut env = ctx.env.clone();
    for (k, v) in &step.env {
        env.insert(k.clone(), interp.interpolate(v));
    }

    // Built-in control actions are handled by the executor itself; only
    // opaque toolchain steps go through the action runner port.
    if let Some(action) = &step.uses {
        let resolved = resolve_action(action, &interp);
        match resolved.action.as_str() {
            "checkout" => {
                return finish(
                    step,
                    StepStatus::Succeeded,
                    Some(0),
                    vec![format!(
                        "checked out {}",
                        trigger.git_sha.as_deref().unwrap_or(&trigger.git_ref)
                    )],
                    started,
                );
            }
            "cache-restore" => {
                return cache_restore(ctx, run_id, job_id, step, &resolved, started).await;
            }
            "cache-save" => {
                return cache_save(ctx, step, &resolved, started).await;
            }
            "upload-artifact" => {
                return upload_artifact(ctx, run_id, job_id, step, &resolved, started).await;
            }
            "download-artifact" => {
                return download_artifact(ctx, run_id, step, &resolved, started).await;
            }
            _ => {
                let invocation = StepInvocation {
                    job_id,
                    step_name: step.name.clone(),
                    command: None,
                    action: Some(resolved),
                    env,
                    workspace: ctx.workspace.clone(),
                };
                return invoke(ctx, step, invocation, cancel, started).await;
            }
        }
    }

    let command = step.run.as_ref().map(|c| interp.interpolate(c));
    let invocation = StepInvocation {
        job_id,
        step_name: step.name.clone(),
        command,
        action: None,
        env,
        workspace: ctx.workspace.clone(),
    };
    invoke(ctx, step, invocation, cancel, started).await
}

/// Invoke the external action, racing it against cancellation so an
/// in-flight step is interrupted at this suspension point.
async fn invoke(
    ctx: &ExecutorContext,
    step: &StepDefinition,
    invocation: StepInvocation,
    cancel: &Cancellation,
    started: std::time::Instant,
) -> StepResult {
    let outcome = tokio::select! {
        res = ctx.runner.invoke(&invocation) => Some(res),
        _ = cancel.cancelled() => None,
    };

    match outcome {
        None => finish(step, StepStatus::Cancelled, None, Vec::new(), started),
        Some(Ok(out)) => {
            let status = if out.success {
                StepStatus::Succeeded
            } else {
                StepStatus::Failed
            };
            finish(step, status, Some(out.exit_code), out.output, started)
        }
        Some(Err(e)) => finish(
            step,
            StepStatus::Failed,
            Some(-1),
            vec![e.to_string()],
            started,
        ),
    }
}

fn resolve_action(action: &ActionReference, interp: &InterpolationContext) -> ActionReference {
    let with = action
        .with
        .iter()
        .map(|(k, v)| (k.clone(), interp.interpolate(v)))
        .collect();
    ActionReference {
        action: action.action.clone(),
        version: action.version.clone(),
        with,
    }
}

/// Cache restore is best-effort: a miss, or even an outright provider
/// failure, degrades to a full rebuild and never fails the job.
async fn cache_restore(
    ctx: &ExecutorContext,
    run_id: RunId,
    job_id: JobId,
    step: &StepDefinition,
    action: &ActionReference,
    started: std::time::Instant,
) -> StepResult {
    let key = action.param("key").unwrap_or_default().to_string();
    let restore_keys: Vec<String> = action
        .param("restore-keys")
        .map(|s| s.lines().map(|l| l.trim().to_string()).collect())
        .unwrap_or_default();

    match ctx.cache.restore(&key, &restore_keys).await {
        Ok(Some(restored)) => {
            publish(
                ctx,
                Event::CacheHit(CachePayload {
                    run_id,
                    job_id,
                    key: restored.entry.key.clone(),
                }),
            )
            .await;
            finish(
                step,
                StepStatus::Succeeded,
                Some(0),
                vec![format!(
                    "cache restored: {} ({} bytes)",
                    restored.entry.key,
                    restored.payload.len()
                )],
                started,
            )
        }
        Ok(None) => {
            publish(ctx, Event::CacheMiss(CachePayload { run_id, job_id, key })).await;
            finish(
                step,
                StepStatus::Succeeded,
                Some(0),
                vec!["cache miss".to_string()],
                started,
            )
        }
        Err(e) => {
            tracing::warn!(step = %step.name, error = %e, "cache restore failed, continuing");
            finish(
                step,
                StepStatus::Succeeded,
                Some(0),
                vec![format!("cache restore failed: {}", e)],
                started,
            )
        }
    }
}

async fn cache_save(
    ctx: &ExecutorContext,
    step: &StepDefinition,
    action: &ActionReference,
    started: std::time::Instant,
) -> StepResult {
    let key = action.param("key").unwrap_or_default().to_string();
    let payload = action.param("paths").unwrap_or_default().as_bytes().to_vec();
    match ctx.cache.save(&key, payload).await {
        Ok(entry) => finish(
            step,
            StepStatus::Succeeded,
            Some(0),
            vec![format!("cache saved: {}", entry.key)],
            started,
        ),
        Err(e) => {
            tracing::warn!(step = %step.name, error = %e, "cache save failed, continuing");
            finish(
                step,
                StepStatus::Succeeded,
                Some(0),
                vec![format!("cache save failed: {}", e)],
                started,
            )
        }
    }
}

async fn upload_artifact(
    ctx: &ExecutorContext,
    run_id: RunId,
    job_id: JobId,
    step: &StepDefinition,
    action: &ActionReference,
    started: std::time::Instant,
) -> StepResult {
    let name = action.param("name").unwrap_or(&step.name).to_string();
    let path = action.param("path").unwrap_or_default().to_string();

    // Read the produced file when it exists; otherwise store the path
    // itself so control-plane runs stay hermetic.
    let payload = match tokio::fs::read(ctx.workspace.join(&path)).await {
        Ok(bytes) => bytes,
        Err(_) => path.clone().into_bytes(),
    };

    match ctx.artifacts.publish(run_id, name, payload, job_id).await {
        Ok(entry) => {
            publish(
                ctx,
                Event::ArtifactPublished(gantry_core::events::ArtifactPublishedPayload {
                    run_id,
                    artifact_id: entry.id,
                    name: entry.name.clone(),
                    size_bytes: entry.payload.len() as u64,
                    produced_by: job_id,
                }),
            )
            .await;
            finish(
                step,
                StepStatus::Succeeded,
                Some(0),
                vec![format!("published {}", entry.name)],
                started,
            )
        }
        Err(e) => finish(
            step,
            StepStatus::Failed,
            Some(1),
            vec![e.to_string()],
            started,
        ),
    }
}

async fn download_artifact(
    ctx: &ExecutorContext,
    run_id: RunId,
    step: &StepDefinition,
    action: &ActionReference,
    started: std::time::Instant,
) -> StepResult {
    let pattern = action.param("name").unwrap_or("*");
    match ctx.artifacts.fetch(run_id, pattern).await {
        Ok(entries) => {
            let mut output = Vec::new();
            for entry in &entries {
                let target = ctx.workspace.join(&entry.name);
                if let Some(parent) = target.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                if let Err(e) = tokio::fs::write(&target, &entry.payload).await {
                    tracing::warn!(artifact = %entry.name, error = %e, "failed to materialize artifact");
                }
                output.push(format!("fetched {}", entry.name));
            }
            finish(step, StepStatus::Succeeded, Some(0), output, started)
        }
        Err(e) => finish(
            step,
            StepStatus::Failed,
            Some(1),
            vec![e.to_string()],
            started,
        ),
    }
}

fn finish(
    step: &StepDefinition,
    status: StepStatus,
    exit_code: Option<i32>,
    output: Vec<String>,
    started: std::time::Instant,
) -> StepResult {
    StepResult {
        name: step.name.clone(),
        status,
        exit_code,
        output,
        duration_ms: started.elapsed().as_millis() as u64,
        completed_at: chrono::Utc::now(),
    }
}

async fn emit_step(ctx: &ExecutorContext, run_id: RunId, job_id: JobId, result: &StepResult) {
    publish(
        ctx,
        Event::StepCompleted(StepCompletedPayload {
            run_id,
            job_id,
            step_name: result.name.clone(),
            status: result.status,
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
        }),
    )
    .await;
}

async fn publish(ctx: &ExecutorContext, event: Event) {
    if let Err(e) = ctx.events.publish(event).await {
        tracing::warn!(error = %e, "event sink rejected event");
    }
}
