// FFprobe wrapper for stream timing and media sniffing

use std::path::Path;
use serde::Deserialize;
use crate::error::{Result, VidHashError};
use crate::tools::ExternalTool;
use crate::metadata::VideoProbe;

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    streams: Option<Vec<FFprobeStream>>,
    format: Option<FFprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFprobeFormat {
    duration: Option<String>,
}

/// Run ffprobe on a file and extract the first video stream's timing
pub fn probe(path: &Path) -> Result<VideoProbe> {
    let output = ExternalTool::Ffprobe.command()
        .args([
            "-v", "quiet",
            "-print_format", "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(|e| VidHashError::Tool(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VidHashError::Tool(format!("ffprobe failed on {}: {}", path.display(), stderr)));
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> Result<VideoProbe> {
    let probe_output: FFprobeOutput = serde_json::from_slice(stdout)?;

    let mut meta = VideoProbe::default();

    if let Some(ref streams) = probe_output.streams {
        if let Some(stream) = streams.iter().find(|s| s.codec_type.as_deref() == Some("video")) {
            meta.has_video = true;
            meta.width = stream.width;
            meta.height = stream.height;
            meta.fps = parse_frame_rate(stream.r_frame_rate.as_deref());
            meta.duration_secs = parse_duration(stream.duration.as_deref());
        }
    }

    if meta.duration_secs.is_none() {
        if let Some(ref format) = probe_output.format {
            meta.duration_secs = parse_duration(format.duration.as_deref());
        }
    }

    Ok(meta)
}

/// Parse frame rate string like "30000/1001" to f64
fn parse_frame_rate(rate_str: Option<&str>) -> Option<f64> {
    let rate_str = rate_str?;
    if let Some((num, den)) = rate_str.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    rate_str.parse().ok()
}

fn parse_duration(duration_str: Option<&str>) -> Option<f64> {
    duration_str?.parse().ok()
}
