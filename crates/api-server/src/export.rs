//! Lecture document rendering for the export endpoints
//!
//! Markdown mirrors the on-screen structure: title, metadata block, a
//! linked table of contents, then one timed section per heading. The Word
//! export is an HTML document served with the `application/msword` type,
//! which word processors open natively.

use lecture_common::Lecture;

/// Format seconds as `MM:SS`
#[must_use]
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Section content with a duplicated leading heading removed
fn section_body<'a>(content: &'a str, title: &str) -> &'a str {
    content
        .strip_prefix(&format!("## {title}"))
        .map_or(content, str::trim_start)
}

/// Render a lecture as a standalone Markdown document
#[must_use]
pub fn lecture_to_markdown(lecture: &Lecture) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("# {}", lecture.title));
    lines.push(String::new());
    lines.push(format!("> Video file: {}", lecture.metadata.video_file));
    lines.push(format!(
        "> Duration: {:.1} minutes",
        lecture.metadata.duration / 60.0
    ));
    lines.push(format!("> Generated: {}", lecture.metadata.created_at));
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());

    lines.push("## Contents".to_string());
    lines.push(String::new());
    for section in &lecture.sections {
        lines.push(format!(
            "- [{}](#{}) ({})",
            section.title,
            section.id,
            format_time(section.start_time)
        ));
    }
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());

    for section in &lecture.sections {
        lines.push(format!("<a id='{}'></a>", section.id));
        lines.push(String::new());
        lines.push(format!("## {}. {}", section.id, section.title));
        lines.push(String::new());
        lines.push(format!(
            "*Time: {} - {}*",
            format_time(section.start_time),
            format_time(section.end_time)
        ));
        lines.push(String::new());
        lines.push(section_body(&section.content, &section.title).to_string());
        lines.push(String::new());
        lines.push("---".to_string());
        lines.push(String::new());
    }

    lines.join("\n")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render a lecture as an HTML document for the Word export
#[must_use]
pub fn lecture_to_word_document(lecture: &Lecture) -> String {
    let mut body = String::new();
    body.push_str(&format!("<h1>{}</h1>\n", escape_html(&lecture.title)));
    body.push_str(&format!(
        "<p>Video file: {}<br>Duration: {:.1} minutes<br>Generated: {}</p>\n",
        escape_html(&lecture.metadata.video_file),
        lecture.metadata.duration / 60.0,
        lecture.metadata.created_at
    ));

    body.push_str("<h2>Contents</h2>\n<ol>\n");
    for section in &lecture.sections {
        body.push_str(&format!(
            "<li>{} ({})</li>\n",
            escape_html(&section.title),
            format_time(section.start_time)
        ));
    }
    body.push_str("</ol>\n");

    for section in &lecture.sections {
        body.push_str(&format!(
            "<h2>{}. {}</h2>\n<p><i>Time: {} - {}</i></p>\n",
            section.id,
            escape_html(&section.title),
            format_time(section.start_time),
            format_time(section.end_time)
        ));
        for paragraph in section_body(&section.content, &section.title).split("\n\n") {
            let paragraph = paragraph.trim();
            if !paragraph.is_empty() {
                body.push_str(&format!("<p>{}</p>\n", escape_html(paragraph)));
            }
        }
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(&lecture.title),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lecture_common::{LectureMetadata, Section};

    fn sample_lecture() -> Lecture {
        Lecture {
            title: "Graph Theory".to_string(),
            sections: vec![
                Section {
                    id: 1,
                    title: "Basics".to_string(),
                    start_time: 0.0,
                    end_time: 125.0,
                    content: "## Basics\n\nA graph is a set of nodes and edges.".to_string(),
                    summary: "Definitions".to_string(),
                },
                Section {
                    id: 2,
                    title: "Paths".to_string(),
                    start_time: 125.0,
                    end_time: 300.0,
                    content: "A path visits nodes in order.".to_string(),
                    summary: "Paths".to_string(),
                },
            ],
            metadata: LectureMetadata {
                video_file: "graphs_abc.mp4".to_string(),
                duration: 300.0,
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "00:00");
        assert_eq!(format_time(65.0), "01:05");
        assert_eq!(format_time(3725.0), "62:05");
    }

    #[test]
    fn test_markdown_structure() {
        let md = lecture_to_markdown(&sample_lecture());
        assert!(md.starts_with("# Graph Theory"));
        assert!(md.contains("## Contents"));
        assert!(md.contains("- [Basics](#1) (00:00)"));
        assert!(md.contains("## 1. Basics"));
        assert!(md.contains("*Time: 02:05 - 05:00*"));
        // Duplicated per-section heading is stripped
        assert!(!md.contains("## Basics\n\nA graph"));
        assert!(md.contains("A graph is a set of nodes and edges."));
    }

    #[test]
    fn test_word_document_escapes_html() {
        let mut lecture = sample_lecture();
        lecture.sections[1].content = "x < y & y > z".to_string();
        let html = lecture_to_word_document(&lecture);
        assert!(html.contains("<h1>Graph Theory</h1>"));
        assert!(html.contains("x &lt; y &amp; y &gt; z"));
        assert!(html.starts_with("<!DOCTYPE html>"));
    }
}
