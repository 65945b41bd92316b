//! End-to-end pipeline tests: one workflow, scripted action runners,
//! scenarios driven through the scheduler from trigger to report.

use async_trait::async_trait;
use gantry_artifacts::ArtifactStore;
use gantry_core::Result;
use gantry_core::condition::Condition;
use gantry_core::events::Event;
use gantry_core::ports::{
    ActionOutcome, ActionRunner, MemoryEventSink, ReleaseAsset, ReleasePublisher, StepInvocation,
};
use gantry_core::run::JobStatus;
use gantry_core::workflow::{
    ActionReference, JobTemplate, MatrixAxis, MatrixConfig, ReleaseConfig, StepDefinition,
    TriggerKind, WorkflowDefinition,
};
use gantry_runner::{ExecutorContext, GateState};
use gantry_scheduler::{ConcurrencyGovernor, Scheduler, TriggerEvent};
use gantry_runner::cache::MemoryCacheProvider;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Succeeds everything except commands containing a configured marker,
/// and parks forever on commands containing a block marker so
/// cancellation paths can be exercised.
#[derive(Default)]
struct ScriptedRunner {
    fail_marker: Option<String>,
    block_marker: Option<String>,
    /// Markers that park exactly one matching invocation each, so a
    /// first run can get stuck where a retriggered run sails through.
    block_once: std::sync::Mutex<Vec<String>>,
    /// Number of leading invocations to park forever, for supersede
    /// scenarios where a second run must overtake a stuck first one.
    block_first: AtomicUsize,
    /// Commands containing the marker rendezvous here; only concurrent
    /// invocations can all get past it.
    barrier: Option<(String, Arc<tokio::sync::Barrier>)>,
}

#[async_trait]
impl ActionRunner for ScriptedRunner {
    async fn invoke(&self, invocation: &StepInvocation) -> Result<ActionOutcome> {
        let command = invocation.command.as_deref().unwrap_or_default();
        let blocked_slot = self
            .block_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let blocked_once = {
            let mut once = self.block_once.lock().unwrap();
            match once.iter().position(|m| command.contains(m.as_str())) {
                Some(i) => {
                    once.remove(i);
                    true
                }
                None => false,
            }
        };
        if blocked_slot
            || blocked_once
            || self.block_marker.as_ref().is_some_and(|m| command.contains(m))
        {
            std::future::pending::<()>().await;
        }
        if let Some((marker, barrier)) = &self.barrier
            && command.contains(marker.as_str())
        {
            barrier.wait().await;
        }
        if self.fail_marker.as_ref().is_some_and(|m| command.contains(m)) {
            return Ok(ActionOutcome::failed(101));
        }
        Ok(ActionOutcome::ok())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    releases: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl ReleasePublisher for RecordingPublisher {
    async fn create_release(&self, tag: &str, assets: &[ReleaseAsset]) -> Result<()> {
        let names = assets.iter().map(|a| a.name.clone()).collect();
        self.releases.lock().await.push((tag.to_string(), names));
        Ok(())
    }
}

fn run_step(name: &str, command: &str) -> StepDefinition {
    StepDefinition {
        name: name.to_string(),
        run: Some(command.to_string()),
        uses: None,
        condition: None,
        env: HashMap::new(),
        continue_on_error: false,
    }
}

fn action_step(name: &str, action: &str, with: &[(&str, &str)]) -> StepDefinition {
    StepDefinition {
        name: name.to_string(),
        run: None,
        uses: Some(ActionReference {
            action: action.to_string(),
            version: Some("v4".to_string()),
            with: with
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }),
        condition: None,
        env: HashMap::new(),
        continue_on_error: false,
    }
}

/// A workflow shaped like a typical Rust CI pipeline: a two-OS build
/// matrix that uploads per-OS binaries, an independent lint job, and a
/// tag-gated release bundling the binaries.
fn ci_workflow(fail_fast: bool) -> WorkflowDefinition {
    WorkflowDefinition {
        name: "ci".to_string(),
        env: HashMap::from([("CARGO_TERM_COLOR".to_string(), "always".to_string())]),
        pull_request_paths: vec!["**/Cargo.toml".to_string(), "Cargo.lock".to_string()],
        jobs: vec![
            JobTemplate {
                name: "build".to_string(),
                display_name: None,
                runs_on: Some("${{ matrix.os }}".to_string()),
                needs: Vec::new(),
                condition: None,
                matrix: Some(MatrixConfig {
                    axes: vec![MatrixAxis {
                        name: "os".to_string(),
                        values: vec!["macos-latest".to_string(), "windows-latest".to_string()],
                    }],
                    fail_fast,
                }),
                steps: vec![
                    action_step("checkout", "checkout", &[]),
                    action_step(
                        "restore cache",
                        "cache-restore",
                        &[("key", "cargo-${{ matrix.os }}")],
                    ),
                    run_step("build", "cargo build --release on ${{ matrix.os }}"),
                    action_step(
                        "upload binary",
                        "upload-artifact",
                        &[("name", "binary-${{ matrix.os }}"), ("path", "target/app")],
                    ),
                ],
                release: None,
            },
            JobTemplate {
                name: "clippy".to_string(),
                display_name: None,
                runs_on: Some("ubuntu-latest".to_string()),
                needs: Vec::new(),
                condition: None,
                matrix: None,
                steps: vec![
                    action_step("checkout", "checkout", &[]),
                    run_step("clippy", "cargo clippy -- -D warnings"),
                ],
                release: None,
            },
            JobTemplate {
                name: "release".to_string(),
                display_name: None,
                runs_on: Some("ubuntu-latest".to_string()),
                needs: vec!["build".to_string()],
                condition: Some(Condition::RefMatches {
                    pattern: "refs/tags/*".to_string(),
                }),
                matrix: None,
                steps: Vec::new(),
                release: Some(ReleaseConfig {
                    artifacts: "binary-*".to_string(),
                    tag_prefix: "refs/tags/".to_string(),
                }),
            },
        ],
    }
}

/// A prepare stage followed by a deploy stage that only starts once
/// prepare is green. Exercises gated jobs that are not releases.
fn staged_workflow(deploy_matrix: bool) -> WorkflowDefinition {
    WorkflowDefinition {
        name: "staged".to_string(),
        env: HashMap::new(),
        pull_request_paths: Vec::new(),
        jobs: vec![
            JobTemplate {
                name: "prepare".to_string(),
                display_name: None,
                runs_on: Some("ubuntu-latest".to_string()),
                needs: Vec::new(),
                condition: None,
                matrix: None,
                steps: vec![run_step("prepare", "prepare sources")],
                release: None,
            },
            JobTemplate {
                name: "deploy".to_string(),
                display_name: None,
                runs_on: Some("ubuntu-latest".to_string()),
                needs: vec!["prepare".to_string()],
                condition: None,
                matrix: deploy_matrix.then(|| MatrixConfig {
                    axes: vec![MatrixAxis {
                        name: "region".to_string(),
                        values: vec!["eu-west".to_string(), "us-east".to_string()],
                    }],
                    fail_fast: false,
                }),
                steps: vec![run_step("deploy", "deploy to ${{ matrix.region }}")],
                release: None,
            },
        ],
    }
}

struct Harness {
    scheduler: Arc<Scheduler>,
    events: Arc<MemoryEventSink>,
    publisher: Arc<RecordingPublisher>,
}

fn harness(workflow: WorkflowDefinition, runner: Arc<ScriptedRunner>) -> Harness {
    let events = Arc::new(MemoryEventSink::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let ctx = ExecutorContext {
        artifacts: Arc::new(ArtifactStore::new()),
        cache: Arc::new(MemoryCacheProvider::new()),
        runner,
        events: events.clone(),
        workspace: std::env::temp_dir(),
        env: HashMap::new(),
    };
    let scheduler = Scheduler::new(
        workflow,
        Arc::new(ConcurrencyGovernor::new()),
        ctx,
        publisher.clone(),
    )
    .unwrap();
    Harness {
        scheduler: Arc::new(scheduler),
        events,
        publisher,
    }
}

fn statuses(report: &gantry_scheduler::RunReport, template: &str) -> Vec<JobStatus> {
    report
        .jobs
        .iter()
        .filter(|j| j.template == template)
        .map(|j| j.status)
        .collect()
}

#[tokio::test]
async fn test_tag_push_builds_and_publishes_release() {
    let h = harness(ci_workflow(false), Arc::new(ScriptedRunner::default()));

    let report = h
        .scheduler
        .handle_event(TriggerEvent::tag("refs/tags/v1.0.0", "abc123"))
        .await
        .unwrap()
        .expect("tag push should produce a run");

    assert!(report.success());
    assert_eq!(statuses(&report, "build"), vec![JobStatus::Succeeded; 2]);
    assert_eq!(statuses(&report, "clippy"), vec![JobStatus::Succeeded]);
    assert_eq!(report.release, Some(GateState::Published));

    let releases = h.publisher.releases.lock().await;
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].0, "v1.0.0");
    let mut names = releases[0].1.clone();
    names.sort();
    assert_eq!(names, vec!["binary-macos-latest", "binary-windows-latest"]);
}

#[tokio::test]
async fn test_failing_windows_build_leaves_macos_alone_and_skips_release() {
    let runner = Arc::new(ScriptedRunner {
        fail_marker: Some("windows-latest".to_string()),
        ..Default::default()
    });
    let h = harness(ci_workflow(false), runner);

    let report = h
        .scheduler
        .handle_event(TriggerEvent::tag("refs/tags/v1.0.0", "abc123"))
        .await
        .unwrap()
        .unwrap();

    assert!(!report.success());
    let mut build = statuses(&report, "build");
    build.sort_by_key(|s| format!("{:?}", s));
    assert_eq!(build, vec![JobStatus::Failed, JobStatus::Succeeded]);
    // The lint job is independent of the matrix.
    assert_eq!(statuses(&report, "clippy"), vec![JobStatus::Succeeded]);
    // Upstream failure means the gate never evaluates.
    assert_eq!(report.release, Some(GateState::Skipped));
    assert!(h.publisher.releases.lock().await.is_empty());

    let failed = report
        .jobs
        .iter()
        .find(|j| j.status == JobStatus::Failed)
        .unwrap();
    assert!(failed.display_name.contains("windows-latest"));
}

#[tokio::test]
async fn test_fail_fast_cancels_sibling_instances() {
    let runner = Arc::new(ScriptedRunner {
        fail_marker: Some("windows-latest".to_string()),
        block_marker: Some("macos-latest".to_string()),
        ..Default::default()
    });
    let h = harness(ci_workflow(true), runner);

    let report = h
        .scheduler
        .handle_event(TriggerEvent::push("refs/heads/main", "abc123"))
        .await
        .unwrap()
        .unwrap();

    let mut build = statuses(&report, "build");
    build.sort_by_key(|s| format!("{:?}", s));
    assert_eq!(build, vec![JobStatus::Cancelled, JobStatus::Failed]);
}

#[tokio::test]
async fn test_newer_push_supersedes_inflight_run() {
    // The first run's three runner invocations (two builds, one lint)
    // park forever; the second run's invocations go through.
    let runner = Arc::new(ScriptedRunner {
        block_first: AtomicUsize::new(3),
        ..Default::default()
    });
    let h = harness(ci_workflow(false), runner);

    let first = tokio::spawn({
        let scheduler = h.scheduler.clone();
        async move {
            scheduler
                .handle_event(TriggerEvent::push("refs/heads/main", "aaa111"))
                .await
        }
    });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let second = h
        .scheduler
        .handle_event(TriggerEvent::push("refs/heads/main", "bbb222"))
        .await
        .unwrap()
        .unwrap();
    let first = first.await.unwrap().unwrap().unwrap();

    assert_eq!(second.superseded, Some(first.run_id));
    assert!(second.success());
    assert!(
        first
            .jobs
            .iter()
            .filter(|j| j.template != "release")
            .all(|j| j.status == JobStatus::Cancelled),
        "superseded run's jobs should be cancelled, got {:?}",
        first.jobs
    );
    assert_eq!(first.release, Some(GateState::Skipped));

    let events = h.events.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        Event::RunCancelled(p) if p.run_id == first.run_id && p.superseded_by == Some(second.run_id)
    )));
}

#[tokio::test]
async fn test_docs_only_pull_request_produces_no_run() {
    let h = harness(ci_workflow(false), Arc::new(ScriptedRunner::default()));

    let report = h
        .scheduler
        .handle_event(TriggerEvent::pull_request(
            "refs/pull/7/head",
            "abc123",
            vec!["README.md".to_string()],
        ))
        .await
        .unwrap();

    assert!(report.is_none());
    assert!(h.events.events().await.is_empty());
}

#[tokio::test]
async fn test_manifest_pull_request_runs_but_never_releases() {
    let h = harness(ci_workflow(false), Arc::new(ScriptedRunner::default()));

    let report = h
        .scheduler
        .handle_event(TriggerEvent::pull_request(
            "refs/pull/7/head",
            "abc123",
            vec!["crates/core/Cargo.toml".to_string()],
        ))
        .await
        .unwrap()
        .unwrap();

    assert!(report.success());
    assert_eq!(report.release, Some(GateState::Skipped));
    assert!(h.publisher.releases.lock().await.is_empty());
}

#[tokio::test]
async fn test_branch_push_runs_but_never_releases() {
    let h = harness(ci_workflow(false), Arc::new(ScriptedRunner::default()));

    let report = h
        .scheduler
        .handle_event(TriggerEvent::push("refs/heads/main", "abc123"))
        .await
        .unwrap()
        .unwrap();

    assert!(report.success());
    assert_eq!(statuses(&report, "build"), vec![JobStatus::Succeeded; 2]);
    assert_eq!(report.release, Some(GateState::Skipped));
    assert!(h.publisher.releases.lock().await.is_empty());

    let events = h.events.events().await;
    assert!(events.iter().any(|e| matches!(e, Event::ReleaseSkipped(_))));
    assert!(!events.iter().any(|e| matches!(e, Event::ReleasePublished(_))));
}

#[tokio::test]
async fn test_superseded_run_cancels_parked_gated_job() {
    // The first run's deploy parks inside the runner; a newer push must
    // still drive that run to a terminal state.
    let runner = Arc::new(ScriptedRunner {
        block_once: std::sync::Mutex::new(vec!["deploy to".to_string()]),
        ..Default::default()
    });
    let h = harness(staged_workflow(false), runner);

    let first = tokio::spawn({
        let scheduler = h.scheduler.clone();
        async move {
            scheduler
                .handle_event(TriggerEvent::push("refs/heads/main", "aaa111"))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = h
        .scheduler
        .handle_event(TriggerEvent::push("refs/heads/main", "bbb222"))
        .await
        .unwrap()
        .unwrap();
    assert!(second.success());

    let first = tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .expect("superseding push should unpark the stuck deploy")
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(second.superseded, Some(first.run_id));
    assert_eq!(statuses(&first, "prepare"), vec![JobStatus::Succeeded]);
    assert_eq!(statuses(&first, "deploy"), vec![JobStatus::Cancelled]);
}

#[tokio::test]
async fn test_gated_matrix_instances_run_concurrently() {
    // Both deploy instances meet at a rendezvous only concurrent
    // execution can clear.
    let runner = Arc::new(ScriptedRunner {
        barrier: Some(("deploy to".to_string(), Arc::new(tokio::sync::Barrier::new(2)))),
        ..Default::default()
    });
    let h = harness(staged_workflow(true), runner);

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        h.scheduler
            .handle_event(TriggerEvent::push("refs/heads/main", "abc123")),
    )
    .await
    .expect("deploy instances must run in parallel to clear the rendezvous")
    .unwrap()
    .unwrap();

    assert!(report.success());
    assert_eq!(statuses(&report, "deploy"), vec![JobStatus::Succeeded; 2]);
}

#[tokio::test]
async fn test_release_counts_artifacts_only_from_uploading_needs() {
    // clippy uploads nothing, so depending on it must not inflate the
    // number of artifacts the gate expects.
    let mut workflow = ci_workflow(false);
    let release = workflow
        .jobs
        .iter_mut()
        .find(|t| t.name == "release")
        .unwrap();
    release.needs = vec!["build".to_string(), "clippy".to_string()];
    let h = harness(workflow, Arc::new(ScriptedRunner::default()));

    let report = h
        .scheduler
        .handle_event(TriggerEvent::tag("refs/tags/v2.0.0", "abc123"))
        .await
        .unwrap()
        .unwrap();

    assert!(report.success());
    assert_eq!(report.release, Some(GateState::Published));
    let releases = h.publisher.releases.lock().await;
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].1.len(), 2);
}

#[tokio::test]
async fn test_skipped_matrix_template_emits_no_expansion_event() {
    let mut workflow = ci_workflow(false);
    let build = workflow.jobs.iter_mut().find(|t| t.name == "build").unwrap();
    build.condition = Some(Condition::EventIs {
        event: TriggerKind::Tag,
    });
    let h = harness(workflow, Arc::new(ScriptedRunner::default()));

    let report = h
        .scheduler
        .handle_event(TriggerEvent::push("refs/heads/main", "abc123"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(statuses(&report, "build"), vec![JobStatus::Skipped; 2]);
    let events = h.events.events().await;
    assert!(!events.iter().any(|e| matches!(e, Event::MatrixExpanded(_))));
}
