//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the orchestration core and
//! the opaque external collaborators: the toolchain invoked by steps, the
//! release-publishing backend, the dependency cache, and whatever is
//! consuming lifecycle events.

use crate::error::Result;
use crate::events::Event;
use crate::ids::JobId;
use crate::workflow::ActionReference;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;

/// A resolved, ready-to-invoke step: either a literal command or an
/// external action reference, plus the environment visible to it.
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub job_id: JobId,
    pub step_name: String,
    pub command: Option<String>,
    pub action: Option<ActionReference>,
    pub env: HashMap<String, String>,
    pub workspace: PathBuf,
}

/// Observed result of an external invocation: exit signal plus captured
/// output. Both command and action steps report through this uniformly.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub output: Vec<String>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            exit_code: 0,
            output: Vec::new(),
        }
    }

    pub fn failed(exit_code: i32) -> Self {
        Self {
            success: false,
            exit_code,
            output: Vec::new(),
        }
    }
}

/// Executes opaque toolchain steps on behalf of the job executor.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Invoke, observe exit status, capture output.
    async fn invoke(&self, invocation: &StepInvocation) -> Result<ActionOutcome>;
}

/// An artifact payload handed to the release sink.
#[derive(Debug, Clone)]
pub struct ReleaseAsset {
    pub name: String,
    pub payload: Vec<u8>,
}

/// External release-publishing service.
#[async_trait]
pub trait ReleasePublisher: Send + Sync {
    async fn create_release(&self, tag: &str, assets: &[ReleaseAsset]) -> Result<()>;
}

/// Metadata for a stored cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// A restored cache entry: the metadata plus the stored payload.
#[derive(Debug, Clone)]
pub struct CacheRestore {
    pub entry: CacheEntry,
    pub payload: Vec<u8>,
}

/// Dependency cache, read-shared by all job instances of a run.
/// Restore and save are best-effort; saves resolve concurrent writers by
/// last-writer-wins.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Try the exact key, then each restore key as a prefix.
    async fn restore(&self, key: &str, restore_keys: &[String]) -> Result<Option<CacheRestore>>;

    async fn save(&self, key: &str, payload: Vec<u8>) -> Result<CacheEntry>;
}

/// Sink for lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;
}

/// Event sink that records events in memory; used by tests and the CLI
/// report.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().await)
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: Event) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Event sink that logs subjects through `tracing`.
#[derive(Debug, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: Event) -> Result<()> {
        tracing::info!(subject = %event.subject(), "event");
        Ok(())
    }
}
