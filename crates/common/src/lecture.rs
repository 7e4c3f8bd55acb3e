//! Subtitle and lecture document types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A word with its aligned time range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    /// Start time in seconds
    pub start_time: f64,
    /// End time in seconds
    pub end_time: f64,
}

/// One subtitle entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleEntry {
    /// 1-based entry index
    pub index: u32,
    /// Start time in seconds
    pub start_time: f64,
    /// End time in seconds
    pub end_time: f64,
    pub text: String,
}

/// One section of the generated lecture notes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// 1-based section id
    pub id: u32,
    pub title: String,
    /// Start time in seconds
    pub start_time: f64,
    /// End time in seconds
    pub end_time: f64,
    /// Markdown content
    pub content: String,
    /// Short summary
    pub summary: String,
}

/// Metadata attached to generated lecture notes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LectureMetadata {
    /// Source video file name
    pub video_file: String,
    /// Video duration in seconds
    pub duration: f64,
    pub created_at: DateTime<Utc>,
}

/// Complete generated lecture notes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lecture {
    pub title: String,
    pub sections: Vec<Section>,
    pub metadata: LectureMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lecture_serialization_round_trip() {
        let lecture = Lecture {
            title: "Linear Algebra 101".to_string(),
            sections: vec![Section {
                id: 1,
                title: "Vectors".to_string(),
                start_time: 0.0,
                end_time: 120.0,
                content: "## Vectors\n\nA vector is...".to_string(),
                summary: "Introduction to vectors".to_string(),
            }],
            metadata: LectureMetadata {
                video_file: "linear_algebra.mp4".to_string(),
                duration: 3600.0,
                created_at: Utc::now(),
            },
        };

        let json = serde_json::to_string(&lecture).unwrap();
        let parsed: Lecture = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.title, "Linear Algebra 101");
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections[0], lecture.sections[0]);
    }
}
