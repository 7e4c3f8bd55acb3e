//! Task and stage record types persisted by the task store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::stage::Stage;

/// Status of a single stage of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started (or was reset for reprocessing)
    Pending,
    /// Stage is currently executing
    InProgress,
    /// Stage completed and its result file exists
    Completed,
    /// Stage failed; `error` carries the reason
    Failed,
}

/// Overall status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Uploaded, not yet started
    Pending,
    /// An execution is active for this task
    Processing,
    /// All 7 stages completed
    Completed,
    /// A stage failed and the run halted
    Failed,
}

/// Persisted status and result of one stage of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// 1-based position in the pipeline (fixed)
    pub stage_id: u32,
    /// Stable stage name
    pub stage_name: String,
    /// Human-readable label for display
    pub stage_label: String,
    /// Current stage status
    pub status: StageStatus,
    /// When the stage last entered `in_progress`
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage last completed or failed
    pub completed_at: Option<DateTime<Utc>>,
    /// Artifact file name, set iff status is `completed`
    pub result_file: Option<String>,
    /// Failure reason, set iff status is `failed`
    pub error: Option<String>,
}

impl StageRecord {
    /// Create a fresh pending record for a stage
    #[must_use]
    pub fn new(stage: Stage) -> Self {
        Self {
            stage_id: stage.id(),
            stage_name: stage.name().to_string(),
            stage_label: stage.label().to_string(),
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            result_file: None,
            error: None,
        }
    }

    /// Reset the record back to pending, clearing timestamps and results
    pub fn reset(&mut self) {
        self.status = StageStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.result_file = None;
        self.error = None;
    }
}

/// One end-to-end video processing job with a stable identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque unique task identifier
    pub task_id: String,
    /// Original video file name (with disambiguation suffix)
    pub video_name: String,
    /// Location of the uploaded video file
    pub video_path: PathBuf,
    /// Directory holding all artifacts produced for this task
    pub output_dir: PathBuf,
    /// Caller-supplied recognition hotwords
    pub hotwords: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time; strictly increases on every stage write
    pub updated_at: DateTime<Utc>,
    /// Video duration in seconds, known once audio extraction completes
    pub duration: Option<f64>,
    /// Overall task status
    pub overall_status: TaskStatus,
    /// Title of the generated lecture notes, set when stage 7 completes
    pub lecture_title: Option<String>,
    /// The 7 stage records, in pipeline order
    pub stages: Vec<StageRecord>,
}

impl Task {
    /// Create a new pending task with all stages pending
    #[must_use]
    pub fn new(
        task_id: String,
        video_name: String,
        video_path: PathBuf,
        output_dir: PathBuf,
        hotwords: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            video_name,
            video_path,
            output_dir,
            hotwords,
            created_at: now,
            updated_at: now,
            duration: None,
            overall_status: TaskStatus::Pending,
            lecture_title: None,
            stages: Stage::ALL.iter().map(|s| StageRecord::new(*s)).collect(),
        }
    }

    /// Get the record for a stage
    #[must_use]
    pub fn stage(&self, stage: Stage) -> &StageRecord {
        &self.stages[(stage.id() - 1) as usize]
    }

    /// Get the mutable record for a stage
    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageRecord {
        &mut self.stages[(stage.id() - 1) as usize]
    }

    /// Whether reprocessing may start at `stage`: stage 1 is always
    /// reachable, later stages require every earlier stage to be completed
    #[must_use]
    pub fn can_start_from(&self, stage: Stage) -> bool {
        self.stages
            .iter()
            .take((stage.id() - 1) as usize)
            .all(|s| s.status == StageStatus::Completed)
    }

    /// Reset stage records from `stage` through the end of the pipeline
    pub fn reset_from(&mut self, stage: Stage) {
        for record in self.stages.iter_mut().skip((stage.id() - 1) as usize) {
            record.reset();
        }
    }

    /// Whether all 7 stages are completed
    #[must_use]
    pub fn all_stages_completed(&self) -> bool {
        self.stages
            .iter()
            .all(|s| s.status == StageStatus::Completed)
    }

    /// The first stage that is not completed, if any
    #[must_use]
    pub fn current_stage(&self) -> Option<Stage> {
        self.stages
            .iter()
            .find(|s| s.status != StageStatus::Completed)
            .and_then(|s| Stage::from_id(s.stage_id))
    }

    /// Base name for artifact files, derived from the video file stem
    #[must_use]
    pub fn artifact_stem(&self) -> String {
        self.video_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.task_id.clone())
    }

    /// Directory holding per-stage intermediate result files
    #[must_use]
    pub fn intermediate_dir(&self) -> PathBuf {
        self.output_dir.join("intermediate")
    }
}

/// Read projection of a task used for history listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Task identifier
    pub id: String,
    /// Original video file name
    pub video_name: String,
    /// Title of the generated lecture notes
    pub lecture_title: Option<String>,
    /// Video duration in seconds
    pub duration: Option<f64>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Artifact directory
    pub output_dir: PathBuf,
    /// Overall task status
    pub status: TaskStatus,
}

impl From<&Task> for HistoryEntry {
    fn from(task: &Task) -> Self {
        Self {
            id: task.task_id.clone(),
            video_name: task.video_name.clone(),
            lecture_title: task.lecture_title.clone(),
            duration: task.duration,
            created_at: task.created_at,
            output_dir: task.output_dir.clone(),
            status: task.overall_status,
        }
    }
}

/// A page of history entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Entries in this page, newest first
    pub items: Vec<HistoryEntry>,
    /// Total number of tasks in the store
    pub total: usize,
}

/// Ephemeral progress notification delivered to live subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Task identifier
    pub task_id: String,
    /// Currently active stage name (or `done` after the final stage)
    pub stage: String,
    /// Sub-stage progress, 0-100
    pub progress: u8,
    /// Human-readable progress message
    pub message: String,
    /// Full ordered snapshot of all stage records at emission time
    pub stages: Vec<StageRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task::new(
            "task-1".to_string(),
            "intro.mp4".to_string(),
            PathBuf::from("/data/uploads/intro_task-1.mp4"),
            PathBuf::from("/data/outputs/intro_task-1"),
            vec![],
        )
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = sample_task();
        assert_eq!(task.overall_status, TaskStatus::Pending);
        assert_eq!(task.stages.len(), 7);
        assert!(task
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Pending));
        assert_eq!(task.current_stage(), Some(Stage::ExtractAudio));
    }

    #[test]
    fn test_can_start_from_requires_completed_prefix() {
        let mut task = sample_task();
        assert!(task.can_start_from(Stage::ExtractAudio));
        assert!(!task.can_start_from(Stage::Asr));

        task.stage_mut(Stage::ExtractAudio).status = StageStatus::Completed;
        assert!(task.can_start_from(Stage::Asr));
        assert!(!task.can_start_from(Stage::TextCorrect));

        // A failed stage blocks everything after it
        task.stage_mut(Stage::Asr).status = StageStatus::Failed;
        assert!(task.can_start_from(Stage::Asr));
        assert!(!task.can_start_from(Stage::TextCorrect));
    }

    #[test]
    fn test_reset_from_preserves_earlier_stages() {
        let mut task = sample_task();
        for stage in Stage::ALL {
            let record = task.stage_mut(stage);
            record.status = StageStatus::Completed;
            record.result_file = Some(stage.result_file_name());
            record.completed_at = Some(Utc::now());
        }

        task.reset_from(Stage::Align);

        for stage in [Stage::ExtractAudio, Stage::Asr, Stage::TextCorrect] {
            assert_eq!(task.stage(stage).status, StageStatus::Completed);
            assert!(task.stage(stage).result_file.is_some());
        }
        for stage in [
            Stage::Align,
            Stage::Subtitle,
            Stage::SectionSplit,
            Stage::LectureGen,
        ] {
            let record = task.stage(stage);
            assert_eq!(record.status, StageStatus::Pending);
            assert!(record.result_file.is_none());
            assert!(record.started_at.is_none());
            assert!(record.completed_at.is_none());
            assert!(record.error.is_none());
        }
    }

    #[test]
    fn test_all_stages_completed() {
        let mut task = sample_task();
        assert!(!task.all_stages_completed());
        for stage in Stage::ALL {
            task.stage_mut(stage).status = StageStatus::Completed;
        }
        assert!(task.all_stages_completed());
        assert_eq!(task.current_stage(), None);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&StageStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"processing\""
        );
    }

    #[test]
    fn test_artifact_stem() {
        let task = sample_task();
        assert_eq!(task.artifact_stem(), "intro_task-1");
    }
}
