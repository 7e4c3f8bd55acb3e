//! HTTP client for the speech recognition and forced alignment service
//!
//! The inference service runs as a separate process next to this server and
//! exposes `/asr` and `/align` over JSON. Audio is referenced by path since
//! both processes share the same filesystem.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use lecture_common::{InferenceConfig, WordTimestamp};

use crate::{WorkerError, WorkerResult};

/// One transcribed span of audio with absolute times
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// 0-based segment number
    pub segment_id: u32,
    /// Segment start in seconds
    pub start_time: f64,
    /// Segment end in seconds
    pub end_time: f64,
    /// Transcribed text
    pub text: String,
}

#[derive(Serialize)]
struct AsrRequest<'a> {
    audio_path: &'a str,
    language: &'a str,
    hotwords: &'a [String],
}

#[derive(Deserialize)]
struct AsrResponse {
    segments: Vec<TranscriptSegment>,
}

#[derive(Serialize)]
struct AlignRequest<'a> {
    audio_path: &'a str,
    text: &'a str,
    language: &'a str,
}

#[derive(Deserialize)]
struct AlignResponse {
    words: Vec<WordTimestamp>,
}

/// Client for the recognition/alignment backend
#[derive(Clone)]
pub struct InferenceClient {
    client: reqwest::Client,
    config: InferenceConfig,
}

impl InferenceClient {
    /// Create a client for the configured endpoint
    #[must_use]
    pub fn new(config: InferenceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Transcribe an audio file, biasing recognition with `hotwords`
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        hotwords: &[String],
    ) -> WorkerResult<Vec<TranscriptSegment>> {
        info!(
            "Transcribing {} with {} hotwords",
            audio_path.display(),
            hotwords.len()
        );
        let request = AsrRequest {
            audio_path: &audio_path.to_string_lossy(),
            language: &self.config.language,
            hotwords,
        };
        let response: AsrResponse = self
            .post_json("asr", &request)
            .await?;
        info!("Transcription produced {} segments", response.segments.len());
        Ok(response.segments)
    }

    /// Align `text` against the audio, producing word-level timestamps
    pub async fn align(&self, audio_path: &Path, text: &str) -> WorkerResult<Vec<WordTimestamp>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            "Aligning {} characters against {}",
            text.chars().count(),
            audio_path.display()
        );
        let request = AlignRequest {
            audio_path: &audio_path.to_string_lossy(),
            text,
            language: &self.config.language,
        };
        let response: AlignResponse = self.post_json("align", &request).await?;
        Ok(response.words)
    }

    async fn post_json<Req, Resp>(&self, route: &str, request: &Req) -> WorkerResult<Resp>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/{route}", self.config.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| WorkerError::Inference(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Inference(format!(
                "{url} returned {status}: {}",
                body.trim()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| WorkerError::Inference(format!("invalid response from {url}: {e}")))
    }
}

/// Derive extra recognition hotwords from a video file name
///
/// Splits the stem on common separators and keeps tokens that look like
/// topic words, dropping numbers, hex identifiers, dates, and short codes.
#[must_use]
pub fn extract_keywords_from_filename(filename: &str) -> Vec<String> {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut keywords = Vec::new();
    for part in stem.split(|c: char| {
        matches!(c, '_' | '-' | ' ' | '.' | '(' | ')' | '[' | ']')
    }) {
        let part = part.trim();
        if part.is_empty() || !keep_keyword(part) {
            continue;
        }
        if !keywords.iter().any(|k| k == part) {
            keywords.push(part.to_string());
        }
    }
    keywords
}

/// Generic words that carry no recognition value on their own
const KEYWORD_STOPWORDS: [&str; 8] = [
    "video",
    "lecture",
    "recording",
    "course",
    "tutorial",
    "class",
    "session",
    "part",
];

fn keep_keyword(part: &str) -> bool {
    let chars: Vec<char> = part.chars().collect();
    // Pure numbers and date-ish tokens
    if chars.iter().all(|c| c.is_ascii_digit() || *c == '/' || *c == ':') {
        return false;
    }
    // Hex identifier fragments (uuid pieces and similar)
    if chars.len() >= 6 && chars.iter().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    let has_cjk = chars.iter().any(|c| ('\u{4e00}'..='\u{9fff}').contains(c));
    if has_cjk {
        return chars.len() >= 2;
    }
    if !chars.iter().all(|c| c.is_alphanumeric()) {
        return false;
    }
    // Short codes like "v1", "ep03", and generic words with an optional
    // trailing counter ("lecture03") carry no recognition value
    let alpha: String = part
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_lowercase();
    alpha.chars().count() >= 4
        && alpha.chars().all(char::is_alphabetic)
        && !KEYWORD_STOPWORDS.contains(&alpha.as_str())
}
