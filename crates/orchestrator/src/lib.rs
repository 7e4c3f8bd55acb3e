//! Lecture Pipeline Orchestrator
//!
//! Sequences the seven processing stages of a lecture video task, enforces
//! single-flight per task and global exclusivity over the shared inference
//! resource, and broadcasts every stage transition to live subscribers.
//!
//! Stage work itself is behind the [`StageExecutor`] trait so the state
//! machine can be exercised without media tools or model backends.

mod executor;
mod pipeline;
mod progress;

pub use executor::{StageContext, StageExecutor, StageOutcome};
pub use pipeline::PipelineOrchestrator;
pub use progress::{snapshot_event, ProgressHub};
