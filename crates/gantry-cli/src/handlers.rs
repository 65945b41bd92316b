//! Command handlers.

use crate::commands::EventKind;
use console::style;
use gantry_artifacts::ArtifactStore;
use gantry_core::ports::{ReleaseAsset, ReleasePublisher, TracingEventSink};
use gantry_core::run::JobStatus;
use gantry_core::workflow::WorkflowDefinition;
use gantry_runner::cache::MemoryCacheProvider;
use gantry_runner::{ExecutorContext, GateState, ShellRunner};
use gantry_scheduler::{ConcurrencyGovernor, RunReport, Scheduler, TriggerEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Initialize a new workflow file.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new("gantry.yaml");

    if path.exists() {
        println!("{} gantry.yaml already exists", style("!").yellow());
        return Ok(());
    }

    let template = r#"name: ci
env:
  CARGO_TERM_COLOR: always

pull_request_paths:
  - "**/Cargo.toml"
  - Cargo.lock

jobs:
  - name: build
    matrix:
      axes:
        - name: os
          values: [macos-latest, windows-latest]
    steps:
      - name: checkout
        uses:
          action: checkout
      - name: build
        run: cargo build --release
      - name: upload binary
        uses:
          action: upload-artifact
          with:
            name: binary-${{ matrix.os }}
            path: target/release/app

  - name: release
    needs: [build]
    condition:
      kind: ref_matches
      pattern: "refs/tags/*"
    steps: []
    release:
      artifacts: "binary-*"
"#;

    std::fs::write(path, template)?;
    println!("{} Created gantry.yaml", style("✓").green());
    Ok(())
}

/// Validate a workflow definition.
pub async fn validate(path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let workflow = load_workflow(path)?;
    workflow.validate()?;

    println!(
        "{} Workflow \"{}\" is valid",
        style("✓").green(),
        workflow.name
    );
    println!("  Jobs: {}", workflow.jobs.len());
    for job in &workflow.jobs {
        let instances = job
            .matrix
            .as_ref()
            .map(|m| m.axes.iter().map(|a| a.values.len().max(1)).product())
            .unwrap_or(1usize);
        println!("    - {} ({} instances)", job.name, instances);
    }
    Ok(())
}

/// Run a workflow for one simulated repository event.
pub async fn run(
    path: Option<&str>,
    event: EventKind,
    git_ref: String,
    sha: String,
    changed_paths: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let workflow = load_workflow(path)?;
    let env = workflow.env.clone();

    let ctx = ExecutorContext {
        artifacts: Arc::new(ArtifactStore::new()),
        cache: Arc::new(MemoryCacheProvider::new()),
        runner: Arc::new(ShellRunner::new()),
        events: Arc::new(TracingEventSink),
        workspace: std::env::current_dir()?,
        env,
    };
    let publisher = Arc::new(DirReleasePublisher {
        root: PathBuf::from(".gantry/releases"),
    });
    let scheduler = Scheduler::new(workflow, Arc::new(ConcurrencyGovernor::new()), ctx, publisher)?;

    let event = match event {
        EventKind::Push => TriggerEvent::push(git_ref, sha),
        EventKind::Tag => TriggerEvent::tag(git_ref, sha),
        EventKind::PullRequest => TriggerEvent::pull_request(git_ref, sha, changed_paths),
    };

    match scheduler.handle_event(event).await? {
        None => {
            println!(
                "{} No run: the trigger did not match the workflow's path filter",
                style("-").dim()
            );
            Ok(())
        }
        Some(report) => {
            print_report(&report);
            if !report.success() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Standard locations consulted when no explicit path is given.
const WORKFLOW_LOCATIONS: &[&str] = &[
    "gantry.yaml",
    "gantry.yml",
    ".gantry/workflow.yaml",
    ".gantry/workflow.yml",
];

fn find_workflow_file() -> Result<PathBuf, Box<dyn std::error::Error>> {
    for candidate in WORKFLOW_LOCATIONS {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }
    Err(format!(
        "no workflow file found; looked for {}",
        WORKFLOW_LOCATIONS.join(", ")
    )
    .into())
}

fn load_workflow(path: Option<&str>) -> Result<WorkflowDefinition, Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => PathBuf::from(p),
        None => find_workflow_file()?,
    };
    let content = std::fs::read_to_string(&path)?;
    let workflow: WorkflowDefinition = serde_yaml::from_str(&content)?;
    Ok(workflow)
}

fn print_report(report: &RunReport) {
    println!("Run {}", style(report.run_id).bold());
    if let Some(old) = report.superseded {
        println!("  superseded {}", style(old).dim());
    }
    for job in &report.jobs {
        let marker = match job.status {
            JobStatus::Succeeded => style("✓").green(),
            JobStatus::Failed | JobStatus::Cancelled => style("✗").red(),
            _ => style("-").dim(),
        };
        println!("  {} {} [{:?}]", marker, job.display_name, job.status);
    }
    match report.release {
        Some(GateState::Published) => println!("{} Release published", style("✓").green()),
        Some(GateState::Failed) => println!("{} Release failed", style("✗").red()),
        _ => {}
    }
    if report.success() {
        println!("{} Run succeeded", style("✓").green());
    } else {
        println!("{} Run failed", style("✗").red());
    }
}

/// Publishes releases onto the local filesystem, one directory per tag.
pub(crate) struct DirReleasePublisher {
    pub(crate) root: PathBuf,
}

#[async_trait::async_trait]
impl ReleasePublisher for DirReleasePublisher {
    async fn create_release(
        &self,
        tag: &str,
        assets: &[ReleaseAsset],
    ) -> gantry_core::Result<()> {
        let dir = self.root.join(tag);
        tokio::fs::create_dir_all(&dir).await?;
        for asset in assets {
            tokio::fs::write(dir.join(&asset.name), &asset.payload).await?;
        }
        tracing::info!(tag = %tag, assets = assets.len(), dir = %dir.display(), "release written");
        Ok(())
    }
}
