// Media probing module

pub mod ffprobe;

use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::error::{Result, VidHashError};

/// What the fingerprint producers and the transcoder need to know about a file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoProbe {
    pub has_video: bool,
    pub fps: Option<f64>,
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl VideoProbe {
    /// fps and duration, or a malformed-media error naming what is missing
    pub fn timing(&self, path: &Path) -> Result<(f64, f64)> {
        let fps = self
            .fps
            .filter(|f| *f > 0.0)
            .ok_or_else(|| VidHashError::malformed(path, "no usable frame rate"))?;
        let duration = self
            .duration_secs
            .filter(|d| *d > 0.0)
            .ok_or_else(|| VidHashError::malformed(path, "no usable duration"))?;
        Ok((fps, duration))
    }
}

/// True when ffprobe finds at least one video stream. Probe failures count as "not a video".
pub fn is_video(path: &Path) -> bool {
    match ffprobe::probe(path) {
        Ok(meta) => meta.has_video,
        Err(e) => {
            log::debug!("ffprobe could not read {}: {}", path.display(), e);
            false
        }
    }
}

/// Known video container by extension
pub fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| crate::constants::VIDEO_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_video_extension() {
        assert!(has_video_extension(Path::new("/tmp/a.mp4")));
        assert!(has_video_extension(Path::new("clip.webm")));
        assert!(!has_video_extension(Path::new("notes.txt")));
        assert!(!has_video_extension(Path::new("noext")));
    }

    #[test]
    fn test_timing_requires_fps_and_duration() {
        let path = Path::new("x.mp4");
        let good = VideoProbe { has_video: true, fps: Some(25.0), duration_secs: Some(4.0), ..Default::default() };
        assert_eq!(good.timing(path).unwrap(), (25.0, 4.0));

        let bad = VideoProbe { has_video: true, fps: None, duration_secs: Some(4.0), ..Default::default() };
        assert!(matches!(bad.timing(path), Err(VidHashError::MalformedMedia { .. })));
    }
}
