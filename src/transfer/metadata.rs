//! Video metadata probing and thumbnail selection.
//!
//! Dimensions and duration are probed with `ffprobe`; a thumbnail comes
//! from a per-user override on disk when present, otherwise from the first
//! usable frame extracted with `ffmpeg`. Probe failures degrade to zeroed
//! metadata with a warning; they never fail the job.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Dimensions and duration of a video file.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VideoMetadata {
    pub width: i32,
    pub height: i32,
    pub duration: f64,
}

/// Probes a downloaded video. Returns zeroed metadata when `ffprobe` is
/// unavailable or the file is not parseable.
pub async fn probe_video(path: &Path) -> VideoMetadata {
    match run_ffprobe(path).await {
        Ok(meta) => meta,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "video probe failed, using empty metadata");
            VideoMetadata::default()
        }
    }
}

async fn run_ffprobe(path: &Path) -> anyhow::Result<VideoMetadata> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .await?;

    if !output.status.success() {
        anyhow::bail!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    parse_probe_output(&output.stdout)
        .ok_or_else(|| anyhow::anyhow!("ffprobe output missing video stream"))
}

fn parse_probe_output(stdout: &[u8]) -> Option<VideoMetadata> {
    let parsed: serde_json::Value = serde_json::from_slice(stdout).ok()?;
    let stream = parsed.get("streams")?.as_array()?.first()?;

    let width = stream.get("width")?.as_i64()?;
    let height = stream.get("height")?.as_i64()?;
    // ffprobe reports duration as a string in the format section
    let duration = parsed
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Some(VideoMetadata {
        width: i32::try_from(width).ok()?,
        height: i32::try_from(height).ok()?,
        duration,
    })
}

/// Extracts the first usable frame of `video` into `out`. Returns the path
/// on success, `None` when `ffmpeg` is unavailable or extraction fails.
pub async fn capture_frame(video: &Path, out: &Path) -> Option<PathBuf> {
    let status = Command::new("ffmpeg")
        .args(["-v", "error", "-y", "-ss", "0"])
        .arg("-i")
        .arg(video)
        .args(["-frames:v", "1"])
        .arg(out)
        .status()
        .await;

    match status {
        Ok(status) if status.success() && out.exists() => {
            debug!(path = %out.display(), "generated thumbnail frame");
            Some(out.to_path_buf())
        }
        Ok(status) => {
            warn!(video = %video.display(), %status, "thumbnail extraction failed");
            None
        }
        Err(e) => {
            warn!(error = %e, "ffmpeg not available, skipping thumbnail");
            None
        }
    }
}

/// Per-user thumbnail override: `<dir>/<user_id>.jpg` when it exists.
#[must_use]
pub fn user_thumbnail(dir: &Path, user_id: i64) -> Option<PathBuf> {
    let path = dir.join(format!("{user_id}.jpg"));
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let stdout = br#"{
            "streams": [{"width": 1280, "height": 720}],
            "format": {"duration": "12.480000"}
        }"#;
        let meta = parse_probe_output(stdout).expect("parse");
        assert_eq!(meta.width, 1280);
        assert_eq!(meta.height, 720);
        assert!((meta.duration - 12.48).abs() < 1e-9);
    }

    #[test]
    fn test_parse_probe_output_without_stream() {
        assert!(parse_probe_output(br#"{"streams": []}"#).is_none());
        assert!(parse_probe_output(b"not json").is_none());
    }

    #[test]
    fn test_user_thumbnail_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(user_thumbnail(dir.path(), 42).is_none());

        std::fs::write(dir.path().join("42.jpg"), b"jpg").expect("write");
        assert_eq!(
            user_thumbnail(dir.path(), 42),
            Some(dir.path().join("42.jpg"))
        );
    }
}
