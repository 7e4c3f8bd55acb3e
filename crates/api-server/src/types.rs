//! API request and response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lecture_common::{HistoryEntry, Lecture, StageRecord, SubtitleEntry, TaskStatus};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response for upload/start/reprocess requests
#[derive(Debug, Serialize, Deserialize)]
pub struct VideoProcessResponse {
    pub task_id: String,
    pub status: String,
    pub message: String,
}

/// One prior task matching an uploaded filename
#[derive(Debug, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub id: String,
    pub video_name: String,
    pub lecture_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub duration: Option<f64>,
}

impl From<&HistoryEntry> for DuplicateEntry {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            id: entry.id.clone(),
            video_name: entry.video_name.clone(),
            lecture_title: entry.lecture_title.clone(),
            created_at: entry.created_at,
            duration: entry.duration,
        }
    }
}

/// Duplicate check result
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckDuplicateResponse {
    pub has_duplicate: bool,
    pub duplicates: Vec<DuplicateEntry>,
}

/// Reprocess request body
#[derive(Debug, Deserialize)]
pub struct ReprocessRequest {
    /// Stage name to restart from
    pub start_stage: String,
    /// Replacement hotwords; omitted reuses the stored list
    #[serde(default)]
    pub hotwords: Option<Vec<String>>,
}

/// Condensed task status
#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    /// First stage that is not completed, if any
    pub current_stage: Option<String>,
    pub duration: Option<f64>,
    pub stages: Vec<StageRecord>,
}

/// Completed task result: parsed subtitles plus the lecture document
#[derive(Debug, Serialize)]
pub struct TaskResultResponse {
    pub task_id: String,
    pub video_path: String,
    pub video_name: Option<String>,
    pub duration: Option<f64>,
    pub subtitles: Vec<SubtitleEntry>,
    pub lecture: Lecture,
}

/// Subtitle-only projection of a completed task
#[derive(Debug, Serialize)]
pub struct SubtitlesResponse {
    pub subtitles: Vec<SubtitleEntry>,
}

/// History deletion acknowledgement
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub task_id: String,
}

/// Non-sensitive configuration echo
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub inference_endpoint: String,
    pub language: String,
    pub llm_model: String,
    pub max_concurrent_tasks: usize,
    pub hotwords_from_filename: bool,
}

/// History listing query parameters
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// History deletion query parameters
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default = "default_true")]
    pub delete_files: bool,
}

fn default_true() -> bool {
    true
}

/// Duplicate check query parameters
#[derive(Debug, Deserialize)]
pub struct DuplicateQuery {
    pub filename: String,
}
