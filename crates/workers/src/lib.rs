//! Default stage executor for the lecture pipeline
//!
//! Implements the seven pipeline stages against their external
//! collaborators: ffmpeg/ffprobe for media work, the inference service for
//! recognition and alignment, and an OpenAI-compatible LLM for correction,
//! section splitting, and lecture prose. The orchestrator invokes one stage
//! at a time through the [`StageExecutor`] trait.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use lecture_common::{
    AppConfig, Lecture, LectureMetadata, PipelineError, Section, Stage,
};
use lecture_orchestrator::{StageContext, StageExecutor, StageOutcome};

pub mod artifacts;
pub mod inference;
pub mod llm;
pub mod media;
pub mod subtitle;

use artifacts::{
    AlignResult, AsrResult, ExtractAudioResult, LectureGenResult, SectionSplitResult,
    SubtitleResult, TextCorrectResult,
};
use inference::{extract_keywords_from_filename, InferenceClient};
use llm::LlmClient;

/// Worker errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Media tool error: {0}")]
    Media(String),

    #[error("Inference service error: {0}")]
    Inference(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Missing stage input: {0}")]
    MissingInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

impl From<WorkerError> for PipelineError {
    fn from(err: WorkerError) -> Self {
        PipelineError::StageExecution(err.to_string())
    }
}

/// Production [`StageExecutor`] backed by the external collaborators
pub struct DefaultStageExecutor {
    inference: InferenceClient,
    llm: LlmClient,
    hotwords_from_filename: bool,
}

impl DefaultStageExecutor {
    /// Build the executor from application configuration
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        Self {
            inference: InferenceClient::new(config.inference.clone()),
            llm: LlmClient::new(config.llm.clone()),
            hotwords_from_filename: config.inference.hotwords_from_filename,
        }
    }

    async fn run(&self, ctx: &StageContext) -> WorkerResult<StageOutcome> {
        let intermediate = ctx.output_dir.join("intermediate");
        match ctx.stage {
            Stage::ExtractAudio => self.run_extract_audio(ctx, &intermediate).await,
            Stage::Asr => self.run_asr(ctx, &intermediate).await,
            Stage::TextCorrect => self.run_text_correct(ctx, &intermediate).await,
            Stage::Align => self.run_align(&intermediate).await,
            Stage::Subtitle => self.run_subtitle(ctx, &intermediate).await,
            Stage::SectionSplit => self.run_section_split(&intermediate).await,
            Stage::LectureGen => self.run_lecture_gen(ctx, &intermediate).await,
        }
    }

    async fn run_extract_audio(
        &self,
        ctx: &StageContext,
        intermediate: &Path,
    ) -> WorkerResult<StageOutcome> {
        let audio_path = ctx.output_dir.join(format!("{}.wav", video_stem(ctx)));
        media::extract_audio(&ctx.video_path, &audio_path).await?;
        let duration = media::probe_duration(&ctx.video_path).await?;

        let result = ExtractAudioResult {
            audio_path,
            duration,
        };
        let file = artifacts::save(intermediate, ctx.stage, &result).await?;
        let mut outcome = StageOutcome::new(file);
        outcome.duration = Some(duration);
        Ok(outcome)
    }

    async fn run_asr(&self, ctx: &StageContext, intermediate: &Path) -> WorkerResult<StageOutcome> {
        let audio: ExtractAudioResult = artifacts::load(intermediate, Stage::ExtractAudio).await?;
        let hotwords = self.combined_hotwords(ctx);
        let segments = self.inference.transcribe(&audio.audio_path, &hotwords).await?;

        let result = AsrResult {
            segments,
            hotwords_used: hotwords,
        };
        let file = artifacts::save(intermediate, ctx.stage, &result).await?;
        Ok(StageOutcome::new(file))
    }

    async fn run_text_correct(
        &self,
        ctx: &StageContext,
        intermediate: &Path,
    ) -> WorkerResult<StageOutcome> {
        let asr: AsrResult = artifacts::load(intermediate, Stage::Asr).await?;
        let hotwords = if asr.hotwords_used.is_empty() {
            ctx.hotwords.clone()
        } else {
            asr.hotwords_used
        };
        let segments = self.llm.correct_segments(&asr.segments, &hotwords).await;

        let result = TextCorrectResult { segments };
        let file = artifacts::save(intermediate, ctx.stage, &result).await?;
        Ok(StageOutcome::new(file))
    }

    async fn run_align(&self, intermediate: &Path) -> WorkerResult<StageOutcome> {
        let audio: ExtractAudioResult = artifacts::load(intermediate, Stage::ExtractAudio).await?;
        let corrected: TextCorrectResult =
            artifacts::load(intermediate, Stage::TextCorrect).await?;

        let text = corrected
            .segments
            .iter()
            .map(|s| s.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let words = self.inference.align(&audio.audio_path, &text).await?;
        info!("Alignment produced {} word timestamps", words.len());

        let result = AlignResult { words };
        let file = artifacts::save(intermediate, Stage::Align, &result).await?;
        Ok(StageOutcome::new(file))
    }

    async fn run_subtitle(
        &self,
        ctx: &StageContext,
        intermediate: &Path,
    ) -> WorkerResult<StageOutcome> {
        let align: AlignResult = artifacts::load(intermediate, Stage::Align).await?;
        let entries = subtitle::generate_entries(&align.words);

        let srt_path = ctx.output_dir.join(format!("{}.srt", video_stem(ctx)));
        subtitle::save_srt(&entries, &srt_path).await?;

        let result = SubtitleResult { srt_path, entries };
        let file = artifacts::save(intermediate, ctx.stage, &result).await?;
        Ok(StageOutcome::new(file))
    }

    async fn run_section_split(&self, intermediate: &Path) -> WorkerResult<StageOutcome> {
        let subtitles: SubtitleResult = artifacts::load(intermediate, Stage::Subtitle).await?;
        let info = self.llm.split_sections(&subtitles.entries).await;
        let sections = subtitle::sections_with_time(&info, &subtitles.entries);

        let result = SectionSplitResult { sections };
        let file = artifacts::save(intermediate, Stage::SectionSplit, &result).await?;
        Ok(StageOutcome::new(file))
    }

    async fn run_lecture_gen(
        &self,
        ctx: &StageContext,
        intermediate: &Path,
    ) -> WorkerResult<StageOutcome> {
        let split: SectionSplitResult =
            artifacts::load(intermediate, Stage::SectionSplit).await?;

        let mut sections = Vec::with_capacity(split.sections.len());
        for (i, section) in split.sections.iter().enumerate() {
            info!(
                "Generating notes for section {}/{}: {}",
                i + 1,
                split.sections.len(),
                section.title
            );
            let content = self
                .llm
                .generate_section_content(&section.title, &section.content)
                .await;
            sections.push(Section {
                content,
                ..section.clone()
            });
        }

        let title = lecture_title(ctx);
        let video_file = ctx
            .video_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let lecture = Lecture {
            title: title.clone(),
            sections,
            metadata: LectureMetadata {
                video_file,
                duration: ctx.duration.unwrap_or(0.0),
                created_at: Utc::now(),
            },
        };

        let lecture_path = ctx.output_dir.join(format!("{}.json", video_stem(ctx)));
        let data = serde_json::to_vec_pretty(&lecture)?;
        tokio::fs::write(&lecture_path, data).await?;
        info!("Lecture document written: {}", lecture_path.display());

        let result = LectureGenResult {
            lecture_path,
            lecture_title: title.clone(),
        };
        let file = artifacts::save(intermediate, Stage::LectureGen, &result).await?;
        let mut outcome = StageOutcome::new(file);
        outcome.lecture_title = Some(title);
        Ok(outcome)
    }

    /// Caller hotwords first, then filename-derived keywords, deduplicated
    fn combined_hotwords(&self, ctx: &StageContext) -> Vec<String> {
        let mut hotwords = ctx.hotwords.clone();
        if self.hotwords_from_filename {
            if let Some(name) = ctx.video_path.file_name() {
                for keyword in extract_keywords_from_filename(&name.to_string_lossy()) {
                    if !hotwords.contains(&keyword) {
                        hotwords.push(keyword);
                    }
                }
            }
        }
        hotwords
    }
}

#[async_trait]
impl StageExecutor for DefaultStageExecutor {
    async fn execute(&self, ctx: &StageContext) -> lecture_common::Result<StageOutcome> {
        self.run(ctx).await.map_err(Into::into)
    }
}

fn video_stem(ctx: &StageContext) -> String {
    ctx.video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| ctx.task_id.clone())
}

/// Lecture title: the video stem with the disambiguation suffix removed
fn lecture_title(ctx: &StageContext) -> String {
    let stem = video_stem(ctx);
    if let Some((head, tail)) = stem.rsplit_once('_') {
        if Uuid::parse_str(tail).is_ok() {
            return head.to_string();
        }
    }
    stem
}
