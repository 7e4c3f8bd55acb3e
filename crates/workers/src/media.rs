//! Audio extraction and probing via ffmpeg/ffprobe

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use crate::{WorkerError, WorkerResult};

/// Extract the audio track as 16 kHz mono 16-bit PCM WAV, the format the
/// recognition backend expects. Overwrites an existing output file.
pub async fn extract_audio(video_path: &Path, output_path: &Path) -> WorkerResult<()> {
    if !video_path.exists() {
        return Err(WorkerError::Media(format!(
            "video file does not exist: {}",
            video_path.display()
        )));
    }

    info!(
        "Extracting audio from {} to {}",
        video_path.display(),
        output_path.display()
    );
    let output = Command::new("ffmpeg")
        .arg("-i")
        .arg(video_path)
        .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1", "-y"])
        .arg(output_path)
        .output()
        .await
        .map_err(|e| WorkerError::Media(format!("failed to run ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WorkerError::Media(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    debug!("Audio extraction finished: {}", output_path.display());
    Ok(())
}

/// Video duration in seconds, via ffprobe
pub async fn probe_duration(video_path: &Path) -> WorkerResult<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(video_path)
        .output()
        .await
        .map_err(|e| WorkerError::Media(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WorkerError::Media(format!(
            "ffprobe exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let duration: f64 = stdout
        .trim()
        .parse()
        .map_err(|e| WorkerError::Media(format!("unparseable ffprobe duration: {e}")))?;
    info!("Video duration: {:.2}s", duration);
    Ok(duration)
}
