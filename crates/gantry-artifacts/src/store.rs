//! The artifact exchange: a named key-value store scoped to one pipeline
//! run. Build jobs publish named blobs; downstream jobs retrieve them by
//! glob pattern. Names are write-once within a run; artifacts have no
//! cross-run visibility.

use chrono::{DateTime, Utc};
use gantry_core::ids::{ArtifactId, JobId, RunId};
use gantry_core::patterns::glob_match;
use gantry_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub id: ArtifactId,
    pub run_id: RunId,
    pub name: String,
    pub payload: Vec<u8>,
    pub produced_by: JobId,
    pub created_at: DateTime<Utc>,
}

/// In-memory artifact exchange. Sibling job instances publish distinct
/// names concurrently; the write lock plus the write-once check make that
/// safe without coordination between producers.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    entries: RwLock<HashMap<RunId, Vec<ArtifactEntry>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a named blob for a run. Fails with `DuplicateArtifact` if
    /// the name already exists for that run; the first payload is kept.
    pub async fn publish(
        &self,
        run_id: RunId,
        name: impl Into<String>,
        payload: Vec<u8>,
        produced_by: JobId,
    ) -> Result<ArtifactEntry> {
        let name = name.into();
        let mut entries = self.entries.write().await;
        let run_entries = entries.entry(run_id).or_default();
        if run_entries.iter().any(|e| e.name == name) {
            return Err(Error::DuplicateArtifact(name));
        }
        let entry = ArtifactEntry {
            id: ArtifactId::new(),
            run_id,
            name,
            payload,
            produced_by,
            created_at: Utc::now(),
        };
        tracing::debug!(run = %run_id, artifact = %entry.name, bytes = entry.payload.len(), "artifact published");
        run_entries.push(entry.clone());
        Ok(entry)
    }

    /// Fetch all entries of a run whose name matches `pattern`, in
    /// publish order. Zero matches is `ArtifactNotFound`.
    pub async fn fetch(&self, run_id: RunId, pattern: &str) -> Result<Vec<ArtifactEntry>> {
        let entries = self.entries.read().await;
        let matched: Vec<ArtifactEntry> = entries
            .get(&run_id)
            .map(|run_entries| {
                run_entries
                    .iter()
                    .filter(|e| glob_match(pattern, &e.name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if matched.is_empty() {
            return Err(Error::ArtifactNotFound(pattern.to_string()));
        }
        Ok(matched)
    }

    /// Number of artifacts published for a run.
    pub async fn count(&self, run_id: RunId) -> usize {
        self.entries
            .read()
            .await
            .get(&run_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
