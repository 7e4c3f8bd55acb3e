//! Durable keyed storage of task and stage records
//!
//! The task store is the sole writer of stage records: the orchestrator and
//! the API server mutate task state only through it. Records are held in
//! memory behind a `RwLock` and persisted as a single JSON index under the
//! outputs root; per-stage artifacts live in each task's output directory.
//!
//! On process startup [`TaskStore::reconcile`] runs a one-time sweep that
//! drops task records whose artifacts vanished, marks stages left
//! `in_progress` by a dead process as interrupted, and deletes orphaned
//! artifact directories and uploads.

use thiserror::Error;

pub mod dedup;
mod reconcile;
mod task_store;

pub use reconcile::ReconcileReport;
pub use task_store::TaskStore;

use lecture_common::PipelineError;

/// Task store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Stage order violation: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => PipelineError::NotFound(id),
            StoreError::Conflict(msg) => PipelineError::InvalidState(msg),
            StoreError::Io(e) => PipelineError::Storage(e.to_string()),
            StoreError::Serialization(e) => PipelineError::Storage(e.to_string()),
        }
    }
}
