//! HTTP request handlers for the video pipeline API

use std::path::Path as FsPath;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::{info, warn};
use uuid::Uuid;

use lecture_common::{Lecture, PipelineError, Stage, SubtitleEntry, Task, TaskStatus};
use lecture_workers::subtitle::parse_srt;

use crate::export::{lecture_to_markdown, lecture_to_word_document};
use crate::types::{
    CheckDuplicateResponse, ConfigResponse, DeleteQuery, DeleteResponse, DuplicateEntry,
    DuplicateQuery, HealthResponse, HistoryQuery, ReprocessRequest, SubtitlesResponse,
    TaskResultResponse, TaskStatusResponse, VideoProcessResponse,
};
use crate::ApiState;

/// Video container formats accepted for upload
const ALLOWED_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm"];

type HandlerError = (StatusCode, String);

/// Map pipeline errors onto HTTP status codes
fn error_response(err: PipelineError) -> HandlerError {
    let status = match &err {
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::InvalidState(_) | PipelineError::InvalidStageSelection(_) => {
            StatusCode::BAD_REQUEST
        }
        PipelineError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn bad_request(message: impl Into<String>) -> HandlerError {
    (StatusCode::BAD_REQUEST, message.into())
}

fn not_found(message: impl Into<String>) -> HandlerError {
    (StatusCode::NOT_FOUND, message.into())
}

/// Health check
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Non-sensitive configuration echo
pub async fn get_app_config(State(state): State<ApiState>) -> impl IntoResponse {
    Json(ConfigResponse {
        inference_endpoint: state.config.inference.endpoint.clone(),
        language: state.config.inference.language.clone(),
        llm_model: state.config.llm.model.clone(),
        max_concurrent_tasks: state.config.pipeline.max_concurrent_tasks,
        hotwords_from_filename: state.config.inference.hotwords_from_filename,
    })
}

/// Check whether a filename matches prior tasks
pub async fn check_duplicate(
    State(state): State<ApiState>,
    Query(query): Query<DuplicateQuery>,
) -> impl IntoResponse {
    let duplicates: Vec<DuplicateEntry> = state
        .store
        .find_duplicates(&query.filename)
        .await
        .iter()
        .map(DuplicateEntry::from)
        .collect();
    Json(CheckDuplicateResponse {
        has_duplicate: !duplicates.is_empty(),
        duplicates,
    })
}

/// Upload a video and create a pending task, without starting it
///
/// With `overwrite_task_id` the prior task's record and artifacts are
/// deleted and its id is reused.
pub async fn upload_video(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<Json<VideoProcessResponse>, HandlerError> {
    let mut file_name: Option<String> = None;
    let mut file_data: Option<Vec<u8>> = None;
    let mut overwrite_task_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read upload: {e}")))?;
                file_data = Some(bytes.to_vec());
            }
            Some("overwrite_task_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid overwrite_task_id: {e}")))?;
                if !value.trim().is_empty() {
                    overwrite_task_id = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let file_name = file_name.ok_or_else(|| bad_request("missing file field"))?;
    let file_data = file_data.ok_or_else(|| bad_request("missing file field"))?;

    let extension = FsPath::new(&file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(bad_request(format!(
            "unsupported file format: .{extension}, supported: {}",
            ALLOWED_EXTENSIONS.map(|e| format!(".{e}")).join(", ")
        )));
    }

    let task_id = match overwrite_task_id {
        Some(prior_id) => {
            // Reuse the id: drop the prior record and artifacts first
            state
                .store
                .get(&prior_id)
                .await
                .map_err(|e| error_response(e.into()))?;
            state
                .store
                .delete(&prior_id, true)
                .await
                .map_err(|e| error_response(e.into()))?;
            info!("Overwriting prior task {}", prior_id);
            prior_id
        }
        None => Uuid::new_v4().to_string(),
    };

    let stem = FsPath::new(&file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let stored_name = format!("{stem}_{task_id}.{extension}");
    let video_path = state.config.storage.upload_dir.join(&stored_name);

    tokio::fs::create_dir_all(&state.config.storage.upload_dir)
        .await
        .map_err(|e| error_response(e.into()))?;
    tokio::fs::write(&video_path, &file_data)
        .await
        .map_err(|e| error_response(e.into()))?;
    info!("Uploaded video stored at {}", video_path.display());

    let output_dir = state.store.output_dir_for(&video_path);
    let task = Task::new(
        task_id.clone(),
        stored_name,
        video_path,
        output_dir,
        Vec::new(),
    );
    state
        .store
        .create(task)
        .await
        .map_err(|e| error_response(e.into()))?;

    Ok(Json(VideoProcessResponse {
        task_id,
        status: "pending".to_string(),
        message: "video uploaded, awaiting processing".to_string(),
    }))
}

/// Parse a newline-separated hotword list
fn parse_hotwords(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Start processing an uploaded task from stage 1
pub async fn start_processing(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<VideoProcessResponse>, HandlerError> {
    let mut hotwords: Option<Vec<String>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("hotwords") {
            let raw = field
                .text()
                .await
                .map_err(|e| bad_request(format!("invalid hotwords field: {e}")))?;
            let parsed = parse_hotwords(&raw);
            if !parsed.is_empty() {
                info!("User hotwords for {}: {:?}", task_id, parsed);
                hotwords = Some(parsed);
            }
        }
    }

    state
        .orchestrator
        .start_task(&task_id, hotwords)
        .await
        .map_err(error_response)?;

    Ok(Json(VideoProcessResponse {
        task_id,
        status: "processing".to_string(),
        message: "processing started".to_string(),
    }))
}

/// Re-run the pipeline from a chosen stage
pub async fn reprocess_video(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
    Json(request): Json<ReprocessRequest>,
) -> Result<Json<VideoProcessResponse>, HandlerError> {
    let stage = Stage::from_name(&request.start_stage).ok_or_else(|| {
        bad_request(format!("unknown stage name: {}", request.start_stage))
    })?;

    state
        .orchestrator
        .reprocess_task(&task_id, stage, request.hotwords)
        .await
        .map_err(error_response)?;

    Ok(Json(VideoProcessResponse {
        task_id,
        status: "processing".to_string(),
        message: format!("reprocessing from stage {}", stage.name()),
    }))
}

/// Condensed task status
pub async fn get_task_status(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, HandlerError> {
    let task = state
        .store
        .get(&task_id)
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(Json(TaskStatusResponse {
        task_id: task.task_id.clone(),
        status: task.overall_status,
        current_stage: task.current_stage().map(|s| s.name().to_string()),
        duration: task.duration,
        stages: task.stages,
    }))
}

/// Full task snapshot with all stage records
pub async fn get_pipeline_state(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, HandlerError> {
    let task = state
        .store
        .get(&task_id)
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(Json(task))
}

/// Raw intermediate result of one stage
pub async fn get_stage_result(
    State(state): State<ApiState>,
    Path((task_id, stage_name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let stage = Stage::from_name(&stage_name)
        .ok_or_else(|| bad_request(format!("unknown stage name: {stage_name}")))?;
    let task = state
        .store
        .get(&task_id)
        .await
        .map_err(|e| error_response(e.into()))?;

    let path = task.intermediate_dir().join(stage.result_file_name());
    let data = tokio::fs::read(&path)
        .await
        .map_err(|_| not_found(format!("no result for stage {stage_name}")))?;
    let value = serde_json::from_slice(&data).map_err(|e| error_response(e.into()))?;
    Ok(Json(value))
}

async fn require_completed(state: &ApiState, task_id: &str) -> Result<Task, HandlerError> {
    let task = state
        .store
        .get(task_id)
        .await
        .map_err(|e| error_response(e.into()))?;
    if task.overall_status != TaskStatus::Completed {
        return Err(bad_request(format!(
            "task not completed yet, current status: {:?}",
            task.overall_status
        )));
    }
    Ok(task)
}

pub(crate) async fn load_task_subtitles(task: &Task) -> Result<Vec<SubtitleEntry>, HandlerError> {
    let srt_path = task
        .output_dir
        .join(format!("{}.srt", task.artifact_stem()));
    let content = tokio::fs::read_to_string(&srt_path).await.map_err(|e| {
        warn!("Subtitle file {} unreadable: {}", srt_path.display(), e);
        not_found("subtitle file is missing")
    })?;
    Ok(parse_srt(&content))
}

pub(crate) async fn load_task_lecture(task: &Task) -> Result<Lecture, HandlerError> {
    let lecture_path = task
        .output_dir
        .join(format!("{}.json", task.artifact_stem()));
    let data = tokio::fs::read(&lecture_path).await.map_err(|e| {
        warn!("Lecture file {} unreadable: {}", lecture_path.display(), e);
        not_found("lecture file is missing")
    })?;
    serde_json::from_slice(&data).map_err(|e| error_response(e.into()))
}

/// Parsed subtitles plus lecture document of a completed task
pub async fn get_task_result(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResultResponse>, HandlerError> {
    let task = require_completed(&state, &task_id).await?;
    let subtitles = load_task_subtitles(&task).await?;
    let lecture = load_task_lecture(&task).await?;
    Ok(Json(TaskResultResponse {
        task_id,
        video_path: task.video_path.to_string_lossy().into_owned(),
        video_name: Some(task.video_name),
        duration: task.duration,
        subtitles,
        lecture,
    }))
}

/// Subtitles of a completed task
pub async fn get_subtitles(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<SubtitlesResponse>, HandlerError> {
    let task = require_completed(&state, &task_id).await?;
    let subtitles = load_task_subtitles(&task).await?;
    Ok(Json(SubtitlesResponse { subtitles }))
}

/// Lecture document of a completed task
pub async fn get_lecture(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<Lecture>, HandlerError> {
    let task = require_completed(&state, &task_id).await?;
    let lecture = load_task_lecture(&task).await?;
    Ok(Json(lecture))
}

/// Paged history listing, newest first
pub async fn get_history(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    Json(state.store.history(query.limit, query.offset).await)
}

/// Single history entry
pub async fn get_history_item(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let task = state
        .store
        .get(&task_id)
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(Json(lecture_common::HistoryEntry::from(&task)))
}

/// Load a prior task's subtitles and lecture for display
pub async fn load_history_result(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResultResponse>, HandlerError> {
    let task = require_completed(&state, &task_id).await?;
    let subtitles = load_task_subtitles(&task).await?;
    let lecture = load_task_lecture(&task).await?;
    Ok(Json(TaskResultResponse {
        task_id,
        video_path: task.video_path.to_string_lossy().into_owned(),
        video_name: Some(task.video_name),
        duration: task.duration,
        subtitles,
        lecture,
    }))
}

/// Delete a task record and, unless suppressed, its files
pub async fn delete_history(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<DeleteResponse>, HandlerError> {
    state
        .store
        .delete(&task_id, query.delete_files)
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(Json(DeleteResponse {
        message: "deleted".to_string(),
        task_id,
    }))
}

/// Export the lecture as a Markdown download
pub async fn export_markdown(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let task = require_completed(&state, &task_id).await?;
    let lecture = load_task_lecture(&task).await?;
    let markdown = lecture_to_markdown(&lecture);

    Ok((
        [
            (
                header::CONTENT_TYPE,
                "text/markdown; charset=utf-8".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.md\"", lecture.title),
            ),
        ],
        markdown,
    ))
}

/// Export the lecture as a Word-compatible download
pub async fn export_word(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let task = require_completed(&state, &task_id).await?;
    let lecture = load_task_lecture(&task).await?;
    let document = lecture_to_word_document(&lecture);

    Ok((
        [
            (header::CONTENT_TYPE, "application/msword".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.doc\"", lecture.title),
            ),
        ],
        document,
    ))
}
