//! Per-stage intermediate result files
//!
//! Every stage persists its result as JSON under the task's
//! `intermediate/` directory so any later stage (or a reprocess run) can
//! pick up from there without recomputing earlier work.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use lecture_common::{Section, Stage, SubtitleEntry, WordTimestamp};

use crate::inference::TranscriptSegment;
use crate::{WorkerError, WorkerResult};

/// Stage 1: extracted audio track and probed duration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractAudioResult {
    pub audio_path: PathBuf,
    pub duration: f64,
}

/// Stage 2: raw transcription and the hotwords it was biased with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrResult {
    pub segments: Vec<TranscriptSegment>,
    pub hotwords_used: Vec<String>,
}

/// Stage 3: corrected transcription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCorrectResult {
    pub segments: Vec<TranscriptSegment>,
}

/// Stage 4: word-level timestamps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignResult {
    pub words: Vec<WordTimestamp>,
}

/// Stage 5: subtitle entries and the rendered SRT file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleResult {
    pub srt_path: PathBuf,
    pub entries: Vec<SubtitleEntry>,
}

/// Stage 6: timed sections with raw spoken content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSplitResult {
    pub sections: Vec<Section>,
}

/// Stage 7: the generated lecture document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LectureGenResult {
    pub lecture_path: PathBuf,
    pub lecture_title: String,
}

/// Write a stage result file, returning its file name
pub async fn save<T: Serialize>(
    intermediate_dir: &Path,
    stage: Stage,
    value: &T,
) -> WorkerResult<String> {
    tokio::fs::create_dir_all(intermediate_dir).await?;
    let file_name = stage.result_file_name();
    let data = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(intermediate_dir.join(&file_name), data).await?;
    debug!("Wrote stage result {}", file_name);
    Ok(file_name)
}

/// Read a stage result file written by an earlier run
pub async fn load<T: DeserializeOwned>(
    intermediate_dir: &Path,
    stage: Stage,
) -> WorkerResult<T> {
    let path = intermediate_dir.join(stage.result_file_name());
    let data = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            WorkerError::MissingInput(format!(
                "stage result {} is missing",
                path.display()
            ))
        } else {
            WorkerError::Io(e)
        }
    })?;
    Ok(serde_json::from_slice(&data)?)
}
