//! The fixed, ordered table of processing stages
//!
//! Every task passes through exactly these 7 stages in order. Stage ids are
//! 1-based and stable; artifact files and reprocess selection are keyed on them.

use serde::{Deserialize, Serialize};

/// One of the 7 fixed processing stages, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Extract the audio track from the uploaded video
    ExtractAudio,
    /// Speech recognition over the extracted audio
    Asr,
    /// LLM-based correction of the raw transcript
    TextCorrect,
    /// Forced alignment of corrected text to word timestamps
    Align,
    /// Subtitle entry generation from word timestamps
    Subtitle,
    /// LLM-based sectioning of the subtitle stream
    SectionSplit,
    /// Lecture notes generation from the sections
    LectureGen,
}

/// Number of stages in the pipeline
pub const STAGE_COUNT: usize = 7;

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; STAGE_COUNT] = [
        Stage::ExtractAudio,
        Stage::Asr,
        Stage::TextCorrect,
        Stage::Align,
        Stage::Subtitle,
        Stage::SectionSplit,
        Stage::LectureGen,
    ];

    /// 1-based position in the pipeline
    #[must_use]
    pub fn id(self) -> u32 {
        match self {
            Self::ExtractAudio => 1,
            Self::Asr => 2,
            Self::TextCorrect => 3,
            Self::Align => 4,
            Self::Subtitle => 5,
            Self::SectionSplit => 6,
            Self::LectureGen => 7,
        }
    }

    /// Stable machine-readable stage name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ExtractAudio => "extract_audio",
            Self::Asr => "asr",
            Self::TextCorrect => "text_correct",
            Self::Align => "align",
            Self::Subtitle => "subtitle",
            Self::SectionSplit => "section_split",
            Self::LectureGen => "lecture_gen",
        }
    }

    /// Human-readable label for progress display
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ExtractAudio => "Extract audio",
            Self::Asr => "Speech recognition",
            Self::TextCorrect => "Text correction",
            Self::Align => "Time alignment",
            Self::Subtitle => "Subtitle generation",
            Self::SectionSplit => "Section split",
            Self::LectureGen => "Lecture notes",
        }
    }

    /// Look up a stage by its machine name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Stage> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Look up a stage by its 1-based id
    #[must_use]
    pub fn from_id(id: u32) -> Option<Stage> {
        Self::ALL.iter().copied().find(|s| s.id() == id)
    }

    /// The stage that follows this one, if any
    #[must_use]
    pub fn next(self) -> Option<Stage> {
        Self::from_id(self.id() + 1)
    }

    /// Whether this stage needs exclusive possession of the inference backend
    #[must_use]
    pub fn requires_inference(self) -> bool {
        matches!(self, Self::Asr | Self::Align)
    }

    /// File name of the intermediate artifact this stage produces
    #[must_use]
    pub fn result_file_name(self) -> String {
        format!("stage_{}_{}.json", self.id(), self.name())
    }
}
