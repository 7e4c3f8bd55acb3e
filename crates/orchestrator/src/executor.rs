//! Stage execution seam between the orchestrator and the workers

use std::path::PathBuf;

use async_trait::async_trait;

use lecture_common::{Result, Stage};

/// Everything a worker needs to execute one stage of one task
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Task identifier
    pub task_id: String,
    /// Stage to execute
    pub stage: Stage,
    /// The uploaded video file
    pub video_path: PathBuf,
    /// Task output directory; intermediate results go in `intermediate/`
    pub output_dir: PathBuf,
    /// Recognition hotwords
    pub hotwords: Vec<String>,
    /// Path of the previous stage's result file, `None` for stage 1
    pub previous_result: Option<PathBuf>,
    /// Video duration in seconds, if already known
    pub duration: Option<f64>,
}

/// Result of a successful stage execution
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Name of the result file written under `intermediate/`
    pub result_file: String,
    /// Video duration, reported by audio extraction
    pub duration: Option<f64>,
    /// Lecture title, reported by the final stage
    pub lecture_title: Option<String>,
}

impl StageOutcome {
    /// An outcome carrying only the result file name
    #[must_use]
    pub fn new(result_file: String) -> Self {
        Self {
            result_file,
            duration: None,
            lecture_title: None,
        }
    }
}

/// Executes individual pipeline stages
///
/// The orchestrator owns sequencing, state writes, and resource gating;
/// implementations only do the stage's work and report the artifact written.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Execute `ctx.stage`, writing its result file under
    /// `ctx.output_dir/intermediate/` and returning its name
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome>;
}
