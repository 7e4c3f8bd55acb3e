//! Common types and utilities for the lecture video processing pipeline
//!
//! Shared across the task store, orchestrator, stage workers and API server:
//! - The fixed 7-stage table and per-stage/per-task status machines
//! - Persisted task and stage record types
//! - Subtitle, section and lecture document types
//! - The pipeline error taxonomy
//! - Environment-backed configuration

use thiserror::Error;

pub mod config;
pub mod lecture;
pub mod stage;
pub mod task;

pub use config::{AppConfig, InferenceConfig, LlmConfig, PipelineConfig, StorageConfig};
pub use lecture::{Lecture, LectureMetadata, Section, SubtitleEntry, WordTimestamp};
pub use stage::Stage;
pub use task::{
    HistoryEntry, HistoryPage, ProgressEvent, StageRecord, StageStatus, Task, TaskStatus,
};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid task state: {0}")]
    InvalidState(String),

    #[error("Invalid stage selection: {0}")]
    InvalidStageSelection(String),

    #[error("Task already running: {0}")]
    ConcurrencyConflict(String),

    #[error("Stage execution failed: {0}")]
    StageExecution(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
