//! Write-once, per-run artifact exchange for Gantry.

pub mod store;

pub use store::{ArtifactEntry, ArtifactStore};
