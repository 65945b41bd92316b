//! The concurrency governor.
//!
//! At most one run per concurrency group (ref plus workflow) is active
//! at a time. Admitting a new run flips the previous holder's cancel
//! channel; its executors observe the flip at their next checkpoint.
//! Runs on different refs never interfere.

use gantry_core::ids::RunId;
use gantry_core::run::GroupKey;
use std::collections::HashMap;
use tokio::sync::{Mutex, watch};

struct ActiveRun {
    run_id: RunId,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
pub struct ConcurrencyGovernor {
    active: Mutex<HashMap<GroupKey, ActiveRun>>,
}

impl ConcurrencyGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a run into its group. Returns the cancel receiver the run's
    /// executors must watch and, when a previous run held the group, the
    /// id of the run that was just superseded.
    pub async fn admit(&self, key: GroupKey, run_id: RunId) -> (watch::Receiver<bool>, Option<RunId>) {
        let (tx, rx) = watch::channel(false);
        let mut active = self.active.lock().await;
        let superseded = active
            .insert(key.clone(), ActiveRun { run_id, cancel: tx })
            .map(|previous| {
                // The previous holder keeps running until its executors
                // hit a cancellation checkpoint.
                let _ = previous.cancel.send(true);
                tracing::info!(
                    group = %key,
                    superseded = %previous.run_id,
                    by = %run_id,
                    "run superseded"
                );
                previous.run_id
            });
        (rx, superseded)
    }

    /// Release the group when a run reaches a terminal state. A stale
    /// release from a superseded run leaves the current holder in place.
    pub async fn release(&self, key: &GroupKey, run_id: RunId) {
        let mut active = self.active.lock().await;
        if active.get(key).is_some_and(|held| held.run_id == run_id) {
            active.remove(key);
        }
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
