//! Error types for Gantry.

use crate::run::JobStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Workflow errors
    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    // Run errors
    #[error("Invalid job status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Run cancelled: {reason}")]
    RunCancelled { reason: String },

    // Step errors
    #[error("Step failed with exit code {exit_code}: {message}")]
    StepFailed { exit_code: i32, message: String },

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    // Artifact exchange errors
    #[error("Artifact already published: {0}")]
    DuplicateArtifact(String),

    #[error("No artifacts matching: {0}")]
    ArtifactNotFound(String),

    #[error("Expected {expected} artifacts, found {found}")]
    MissingArtifacts { expected: usize, found: usize },

    // Cache errors
    #[error("Cache miss for key: {0}")]
    CacheMiss(String),

    #[error("Cache save failed: {0}")]
    CacheSaveFailed(String),

    // Release errors
    #[error("Release publish failed: {0}")]
    PublishFailed(String),

    // Infrastructure errors
    #[error("Event sink error: {0}")]
    EventSink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
