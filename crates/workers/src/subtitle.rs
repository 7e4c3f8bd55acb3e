//! Subtitle assembly from word-level timestamps and SRT formatting

use std::path::Path;

use tracing::info;

use lecture_common::{Section, SubtitleEntry, WordTimestamp};

use crate::llm::SectionInfo;
use crate::WorkerResult;

/// Maximum characters per subtitle entry
const MAX_CHARS_PER_LINE: usize = 40;
/// Maximum duration of one entry in seconds
const MAX_DURATION: f64 = 5.0;
/// Minimum accumulated length before a clause mark may split
const MIN_CLAUSE_SPLIT_LEN: usize = 15;

const SENTENCE_END_MARKS: [char; 6] = ['.', '!', '?', '。', '！', '？'];
const CLAUSE_MARKS: [char; 4] = [',', ';', '，', '；'];

/// Format seconds as an SRT timestamp (`HH:MM:SS,mmm`)
#[must_use]
pub fn format_srt_time(seconds: f64) -> String {
    let total_millis = (seconds * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

fn append_word(text: &mut String, word: &str) {
    let punctuation_only = word.chars().all(|c| !c.is_alphanumeric());
    if !text.is_empty() && !punctuation_only {
        text.push(' ');
    }
    text.push_str(word);
}

fn ends_with_any(text: &str, marks: &[char]) -> bool {
    text.chars().next_back().is_some_and(|c| marks.contains(&c))
}

/// Group word-level timestamps into subtitle entries
///
/// An entry closes at a sentence-end mark, when it exceeds the character or
/// duration limit, or at a clause mark once it has some length.
#[must_use]
pub fn generate_entries(words: &[WordTimestamp]) -> Vec<SubtitleEntry> {
    let Some(first) = words.first() else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    let mut current_text = String::new();
    let mut current_start = first.start_time;
    let mut current_end = first.end_time;
    let mut index = 1;

    for (i, word) in words.iter().enumerate() {
        append_word(&mut current_text, &word.word);
        current_end = word.end_time;

        let should_split = ends_with_any(&current_text, &SENTENCE_END_MARKS)
            || current_text.chars().count() >= MAX_CHARS_PER_LINE
            || current_end - current_start >= MAX_DURATION
            || (ends_with_any(&current_text, &CLAUSE_MARKS)
                && current_text.chars().count() >= MIN_CLAUSE_SPLIT_LEN);

        if should_split && !current_text.trim().is_empty() {
            entries.push(SubtitleEntry {
                index,
                start_time: current_start,
                end_time: current_end,
                text: current_text.trim().to_string(),
            });
            index += 1;
            current_text.clear();
            if let Some(next) = words.get(i + 1) {
                current_start = next.start_time;
            }
        }
    }

    if !current_text.trim().is_empty() {
        entries.push(SubtitleEntry {
            index,
            start_time: current_start,
            end_time: current_end,
            text: current_text.trim().to_string(),
        });
    }

    entries
}

/// Render entries as an SRT document
#[must_use]
pub fn to_srt(entries: &[SubtitleEntry]) -> String {
    let mut lines = Vec::with_capacity(entries.len() * 4);
    for entry in entries {
        lines.push(entry.index.to_string());
        lines.push(format!(
            "{} --> {}",
            format_srt_time(entry.start_time),
            format_srt_time(entry.end_time)
        ));
        lines.push(entry.text.clone());
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Write entries as an SRT file
pub async fn save_srt(entries: &[SubtitleEntry], path: &Path) -> WorkerResult<()> {
    tokio::fs::write(path, to_srt(entries)).await?;
    info!("Subtitle file written: {}", path.display());
    Ok(())
}

/// Parse an SRT document back into entries, skipping malformed blocks
#[must_use]
pub fn parse_srt(content: &str) -> Vec<SubtitleEntry> {
    let mut entries = Vec::new();
    for block in content.replace("\r\n", "\n").trim().split("\n\n") {
        let mut lines = block.trim().lines();
        let Some(index) = lines.next().and_then(|l| l.trim().parse::<u32>().ok()) else {
            continue;
        };
        let Some((start_time, end_time)) = lines.next().and_then(parse_time_line) else {
            continue;
        };
        let text = lines.collect::<Vec<_>>().join("\n");
        if text.is_empty() {
            continue;
        }
        entries.push(SubtitleEntry {
            index,
            start_time,
            end_time,
            text,
        });
    }
    entries
}

fn parse_time_line(line: &str) -> Option<(f64, f64)> {
    let (start, end) = line.split_once("-->")?;
    Some((parse_srt_time(start.trim())?, parse_srt_time(end.trim())?))
}

fn parse_srt_time(value: &str) -> Option<f64> {
    let (hms, millis) = value.split_once(',')?;
    let mut parts = hms.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    let millis: f64 = millis.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds + millis / 1000.0)
}

/// Attach start/end times from the referenced subtitle entries to section
/// split results. Sections referencing unknown indexes are skipped.
#[must_use]
pub fn sections_with_time(info: &[SectionInfo], subtitles: &[SubtitleEntry]) -> Vec<Section> {
    let mut sections = Vec::with_capacity(info.len());
    for (i, section) in info.iter().enumerate() {
        let in_range: Vec<&SubtitleEntry> = subtitles
            .iter()
            .filter(|s| s.index >= section.start_index && s.index <= section.end_index)
            .collect();
        let (Some(first), Some(last)) = (in_range.first(), in_range.last()) else {
            continue;
        };
        let content = in_range
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        sections.push(Section {
            id: (i + 1) as u32,
            title: section.title.clone(),
            start_time: first.start_time,
            end_time: last.end_time,
            content,
            summary: section.summary.clone(),
        });
    }
    sections
}
