use std::path::Path;
use std::process::Command;

use crate::error::{GlimpseError, GlimpseResult};

/// Metadata read from a video source: natural playback duration plus the
/// pixel dimensions the re-encode surface must match.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
}

/// Read duration and dimensions from a video file via `ffprobe`. Loads only
/// metadata; the file itself is never decoded here. Fails with a decode
/// error for corrupt files or unsupported containers.
pub fn probe_video(source_path: &Path) -> GlimpseResult<VideoProbe> {
    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| GlimpseError::decode(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(GlimpseError::decode(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let probe = parse_probe_output(&out.stdout)?;
    tracing::debug!(
        path = %source_path.display(),
        duration_secs = probe.duration_secs,
        width = probe.width,
        height = probe.height,
        "probed video source"
    );
    Ok(probe)
}

fn parse_probe_output(stdout: &[u8]) -> GlimpseResult<VideoProbe> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let parsed: ProbeOut = serde_json::from_slice(stdout)
        .map_err(|e| GlimpseError::decode(format!("ffprobe json parse failed: {e}")))?;

    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| GlimpseError::decode("no video stream found"))?;
    let width = video_stream
        .width
        .ok_or_else(|| GlimpseError::decode("missing video width from ffprobe"))?;
    let height = video_stream
        .height
        .ok_or_else(|| GlimpseError::decode("missing video height from ffprobe"))?;

    let duration_secs = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GlimpseError::decode("missing or unparsable duration from ffprobe"))?;
    if !(duration_secs > 0.0) {
        return Err(GlimpseError::decode("ffprobe reported non-positive duration"));
    }

    Ok(VideoProbe {
        width,
        height,
        duration_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_ffprobe_json() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio"},
                {"codec_type": "video", "width": 1080, "height": 1920}
            ],
            "format": {"duration": "12.480000"}
        }"#;
        let probe = parse_probe_output(json).unwrap();
        assert_eq!(probe.width, 1080);
        assert_eq!(probe.height, 1920);
        assert!((probe.duration_secs - 12.48).abs() < 1e-9);
    }

    #[test]
    fn rejects_output_without_video_stream() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3.0"}}"#;
        assert!(parse_probe_output(json).is_err());
    }

    #[test]
    fn rejects_missing_or_zero_duration() {
        let json = br#"{"streams": [{"codec_type": "video", "width": 10, "height": 10}], "format": {}}"#;
        assert!(parse_probe_output(json).is_err());

        let json = br#"{"streams": [{"codec_type": "video", "width": 10, "height": 10}], "format": {"duration": "0.0"}}"#;
        assert!(parse_probe_output(json).is_err());
    }

    #[test]
    fn rejects_garbage_json() {
        assert!(parse_probe_output(b"not json").is_err());
    }
}
