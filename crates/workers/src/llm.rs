//! OpenAI-compatible chat client and the LLM-backed pipeline steps
//!
//! Text correction, section splitting, and lecture prose generation all go
//! through the same chat completions endpoint. Every step degrades
//! gracefully: when the API is unconfigured or a reply cannot be parsed,
//! a deterministic local fallback keeps the pipeline moving.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use lecture_common::{LlmConfig, SubtitleEntry};

use crate::inference::TranscriptSegment;
use crate::{WorkerError, WorkerResult};

const CORRECTION_PROMPT: &str = "You are a professional transcript editor. \
Correct recognition errors in the transcript segments you are given: fix \
misrecognized words, restore proper technical terms, and normalize \
punctuation. Do not rephrase, summarize, or drop content. Reply with the \
same JSON structure you received, with only the text fields corrected.";

const SECTION_SPLIT_PROMPT: &str = "You are an educational content analyst. \
Divide the lecture transcript into coherent sections, each covering one \
topic or concept. Reply as JSON: {\"sections\": [{\"title\": ..., \
\"start_index\": ..., \"end_index\": ..., \"summary\": ...}]}. Indexes \
refer to the numbered subtitle entries (1-based). Every entry must belong \
to exactly one section, with no gaps or overlaps.";

const LECTURE_GEN_PROMPT: &str = "You are an educational content editor. \
Rewrite the spoken lecture content you are given as clear, concise written \
notes in Markdown. Remove filler words and verbal tics, keep every concept \
and fact, and do not invent information that is not in the source.";

/// Filler phrases removed by the offline fallback
const FILLER_WORDS: [&str; 6] = ["um, ", "uh, ", " um ", " uh ", "you know, ", "I mean, "];

/// One section boundary proposed by the splitter, by subtitle index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionInfo {
    pub title: String,
    pub start_index: u32,
    pub end_index: u32,
    #[serde(default)]
    pub summary: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct SectionsPayload {
    sections: Vec<SectionInfo>,
}

#[derive(Serialize, Deserialize)]
struct SegmentsPayload {
    segments: Vec<TranscriptSegment>,
}

/// Client for an OpenAI-compatible chat completions API
#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a client for the configured API
    #[must_use]
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    async fn chat(&self, system: &str, user: &str, json_reply: bool) -> WorkerResult<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let mut body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 1.0,
        });
        if json_reply {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkerError::Llm(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Llm(format!(
                "{url} returned {status}: {}",
                body.trim()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::Llm(format!("invalid chat response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| WorkerError::Llm("chat response carried no choices".to_string()))
    }

    /// Correct recognition errors in transcript segments
    ///
    /// Falls back to the uncorrected segments when the API is unconfigured
    /// or the reply does not parse; correction is an enhancement, not a
    /// required step.
    pub async fn correct_segments(
        &self,
        segments: &[TranscriptSegment],
        hotwords: &[String],
    ) -> Vec<TranscriptSegment> {
        if segments.is_empty() || !self.configured() {
            return segments.to_vec();
        }

        let payload = SegmentsPayload {
            segments: segments.to_vec(),
        };
        let payload_json = match serde_json::to_string_pretty(&payload) {
            Ok(s) => s,
            Err(_) => return segments.to_vec(),
        };
        let mut user = String::new();
        if !hotwords.is_empty() {
            user.push_str(&format!(
                "Domain terms likely to appear: {}.\n\n",
                hotwords.join(", ")
            ));
        }
        user.push_str(&format!(
            "Correct the text fields of these transcript segments:\n{payload_json}"
        ));

        match self.chat(CORRECTION_PROMPT, &user, true).await {
            Ok(reply) => match parse_corrected_segments(&reply, segments) {
                Some(corrected) => {
                    info!("Corrected {} transcript segments", corrected.len());
                    corrected
                }
                None => {
                    warn!("Correction reply did not parse, keeping original text");
                    segments.to_vec()
                }
            },
            Err(e) => {
                warn!("Text correction failed, keeping original text: {e}");
                segments.to_vec()
            }
        }
    }

    /// Divide subtitles into sections, falling back to fixed-size chunks
    pub async fn split_sections(&self, subtitles: &[SubtitleEntry]) -> Vec<SectionInfo> {
        if subtitles.is_empty() {
            return Vec::new();
        }
        if !self.configured() {
            warn!("LLM API not configured, using fixed-size section split");
            return fallback_split(subtitles);
        }

        let numbered = subtitles
            .iter()
            .map(|s| format!("[{}] {}", s.index, s.text))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!("Divide this lecture transcript into sections:\n\n{numbered}");

        match self.chat(SECTION_SPLIT_PROMPT, &user, true).await {
            Ok(reply) => match parse_sections(&reply) {
                Some(sections) if !sections.is_empty() => {
                    info!("Section split produced {} sections", sections.len());
                    sections
                }
                _ => {
                    warn!("Section split reply did not parse, using fixed-size split");
                    fallback_split(subtitles)
                }
            },
            Err(e) => {
                warn!("Section split failed, using fixed-size split: {e}");
                fallback_split(subtitles)
            }
        }
    }

    /// Rewrite one section's spoken content as written notes
    pub async fn generate_section_content(&self, title: &str, raw_content: &str) -> String {
        if !self.configured() {
            return simple_section_content(title, raw_content);
        }
        let user = format!(
            "Section title: {title}\n\nSpoken content:\n{raw_content}\n\n\
             Rewrite this as polished Markdown lecture notes."
        );
        match self.chat(LECTURE_GEN_PROMPT, &user, false).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Lecture generation failed for '{title}', using plain text: {e}");
                simple_section_content(title, raw_content)
            }
        }
    }
}

/// Strip a Markdown code fence wrapper, if present
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches('\n')
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn parse_sections(reply: &str) -> Option<Vec<SectionInfo>> {
    let payload: SectionsPayload = serde_json::from_str(strip_code_fences(reply)).ok()?;
    Some(payload.sections)
}

/// Accept a corrected reply only if it still matches the segment count
fn parse_corrected_segments(
    reply: &str,
    original: &[TranscriptSegment],
) -> Option<Vec<TranscriptSegment>> {
    let payload: SegmentsPayload = serde_json::from_str(strip_code_fences(reply)).ok()?;
    if payload.segments.len() != original.len() {
        return None;
    }
    // Keep the original timing, take only the corrected text
    Some(
        original
            .iter()
            .zip(payload.segments)
            .map(|(orig, corrected)| TranscriptSegment {
                segment_id: orig.segment_id,
                start_time: orig.start_time,
                end_time: orig.end_time,
                text: corrected.text,
            })
            .collect(),
    )
}

/// Chunk subtitles into sections of 3 to 8 entries
fn fallback_split(subtitles: &[SubtitleEntry]) -> Vec<SectionInfo> {
    let section_size = (subtitles.len() / 3).clamp(3, 8);
    let mut sections = Vec::new();
    for (i, chunk) in subtitles.chunks(section_size).enumerate() {
        let text = chunk
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let summary: String = text.chars().take(50).collect();
        sections.push(SectionInfo {
            title: format!("Section {}", i + 1),
            start_index: chunk[0].index,
            end_index: chunk[chunk.len() - 1].index,
            summary,
        });
    }
    sections
}

/// Offline cleanup: drop filler phrases and wrap in a Markdown heading
fn simple_section_content(title: &str, raw_content: &str) -> String {
    let mut content = raw_content.to_string();
    for filler in FILLER_WORDS {
        content = content.replace(filler, " ");
    }
    let content = content.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("## {title}\n\n{content}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u32, text: &str) -> SubtitleEntry {
        SubtitleEntry {
            index,
            start_time: f64::from(index),
            end_time: f64::from(index) + 1.0,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_sections_from_fenced_reply() {
        let reply = "```json\n{\"sections\": [{\"title\": \"Intro\", \
                     \"start_index\": 1, \"end_index\": 3, \"summary\": \"s\"}]}\n```";
        let sections = parse_sections(reply).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Intro");
        assert_eq!(sections[0].end_index, 3);
    }

    #[test]
    fn test_corrected_segments_keep_original_timing() {
        let original = vec![TranscriptSegment {
            segment_id: 0,
            start_time: 1.5,
            end_time: 4.0,
            text: "grate descent".to_string(),
        }];
        let reply = "{\"segments\": [{\"segment_id\": 0, \"start_time\": 0.0, \
                     \"end_time\": 0.0, \"text\": \"gradient descent\"}]}";
        let corrected = parse_corrected_segments(reply, &original).unwrap();
        assert_eq!(corrected[0].text, "gradient descent");
        assert!((corrected[0].start_time - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_corrected_segments_reject_count_mismatch() {
        let original = vec![
            TranscriptSegment {
                segment_id: 0,
                start_time: 0.0,
                end_time: 1.0,
                text: "a".to_string(),
            },
            TranscriptSegment {
                segment_id: 1,
                start_time: 1.0,
                end_time: 2.0,
                text: "b".to_string(),
            },
        ];
        let reply = "{\"segments\": [{\"segment_id\": 0, \"start_time\": 0.0, \
                     \"end_time\": 1.0, \"text\": \"a\"}]}";
        assert!(parse_corrected_segments(reply, &original).is_none());
    }

    #[test]
    fn test_fallback_split_covers_all_entries() {
        let subtitles: Vec<SubtitleEntry> =
            (1..=10).map(|i| entry(i, "text")).collect();
        let sections = fallback_split(&subtitles);
        assert!(!sections.is_empty());
        assert_eq!(sections[0].start_index, 1);
        assert_eq!(sections.last().unwrap().end_index, 10);
        // Contiguous, no gaps
        for pair in sections.windows(2) {
            assert_eq!(pair[1].start_index, pair[0].end_index + 1);
        }
    }

    #[test]
    fn test_simple_section_content_drops_fillers() {
        let content = simple_section_content("Graphs", "um, so a graph is, you know, a set of nodes");
        assert!(content.starts_with("## Graphs"));
        assert!(!content.contains("um,"));
        assert!(!content.contains("you know"));
        assert!(content.contains("a graph is"));
    }
}
