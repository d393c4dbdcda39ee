// Variant generation: re-encode each source into other containers and scales
// and group the source with its variants in one ground-truth set.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::constants::{
    BIGGER_SCALE_FILTER, BIGGER_SUFFIX, SMALLER_SCALE_FILTER, SMALLER_SUFFIX, TRANSCODE_RATE_ARGS,
    TRANSCODE_TARGET_FORMATS,
};
use crate::db::schema::{self, Video, VideoSet};
use crate::error::{Result, VidHashError};
use crate::tools::ExternalTool;
use crate::metadata;

/// One output flavour: container, optional video filter, file-name suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub format: &'static str,
    pub filter: Option<&'static str>,
    pub suffix: &'static str,
}

/// avi, mpg and mp4 at the source scale, plus a smaller and a bigger mp4.
pub fn default_variants() -> Vec<Variant> {
    let mut variants: Vec<Variant> = TRANSCODE_TARGET_FORMATS
        .iter()
        .map(|&format| Variant { format, filter: None, suffix: "" })
        .collect();
    variants.push(Variant { format: "mp4", filter: Some(SMALLER_SCALE_FILTER), suffix: SMALLER_SUFFIX });
    variants.push(Variant { format: "mp4", filter: Some(BIGGER_SCALE_FILTER), suffix: BIGGER_SUFFIX });
    variants
}

/// A planned encode of one source into one variant.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub input_video: Video,
    pub output_video: Video,
    pub filter: Option<&'static str>,
    set: Option<VideoSet>,
}

impl TranscodeJob {
    /// ffmpeg arguments, without the program name.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            self.input.to_string_lossy().into_owned(),
        ];
        if let Some(filter) = self.filter {
            args.push("-vf".to_string());
            args.push(filter.to_string());
        }
        args.extend(TRANSCODE_RATE_ARGS.iter().map(|a| a.to_string()));
        args.push(self.output.to_string_lossy().into_owned());
        args
    }

    pub fn command_line(&self) -> String {
        format!("ffmpeg {}", self.args().join(" "))
    }

    /// Store the source video (if new) and put it in its set, creating one if needed.
    pub fn register_input(&mut self, conn: &Connection) -> Result<VideoSet> {
        let video = schema::add_video_if_new(conn, &self.input_video)?;
        let set = schema::add_to_set(conn, &video, None)?;
        self.input_video = video;
        self.set = Some(set.clone());
        Ok(set)
    }

    /// Store the output video (if new) in the source's set. `register_input` must run first.
    pub fn register_output(&mut self, conn: &Connection) -> Result<VideoSet> {
        let set = self.set.as_ref().ok_or_else(|| {
            VidHashError::Precondition("register_input must be called before register_output".to_string())
        })?;

        let video = schema::add_video_if_new(conn, &self.output_video)?;
        let set = schema::add_to_set(conn, &video, Some(set))?;
        self.output_video = video;
        self.set = Some(set.clone());
        Ok(set)
    }

    /// Register the input, encode, then register the output.
    pub fn run(&mut self, conn: &Connection) -> Result<()> {
        self.register_input(conn)?;

        log::info!("Transcoding: {}", self.command_line());
        let output = ExternalTool::Ffmpeg.command()
            .arg("-nostdin")
            .args(self.args())
            .output()
            .map_err(|e| VidHashError::Tool(format!("Failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VidHashError::Tool(format!(
                "ffmpeg failed on {}: {}",
                self.input.display(),
                stderr.lines().last().unwrap_or("").trim()
            )));
        }

        self.register_output(conn)?;
        Ok(())
    }
}

/// Plan encoding `input` into `variant`. `None` when the output would be the
/// input itself, or is already registered and `force` is off.
pub fn plan(conn: &Connection, input: &Path, variant: &Variant, force: bool) -> Result<Option<TranscodeJob>> {
    let input_video = Video::from_path(input)
        .ok_or_else(|| VidHashError::Precondition(format!("cannot name video at {}", input.display())))?;

    if input_video.format == variant.format && variant.suffix.is_empty() {
        return Ok(None);
    }

    let output_name = format!("{}{}", input_video.name, variant.suffix);
    if !force && schema::find_video_by_name_and_format(conn, &output_name, variant.format)?.is_some() {
        return Ok(None);
    }

    let dir = input.parent().unwrap_or_else(|| Path::new(""));
    let output = dir.join(format!("{}.{}", output_name, variant.format));

    Ok(Some(TranscodeJob {
        input: input.to_path_buf(),
        output,
        input_video: Video::new(input_video.name, input_video.format),
        output_video: Video::new(output_name, variant.format),
        filter: variant.filter,
        set: None,
    }))
}

/// Rescaled outputs are never used as sources.
pub fn is_source_candidate(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let smaller = format!("{}.mp4", SMALLER_SUFFIX);
    let bigger = format!("{}.mp4", BIGGER_SUFFIX);
    !name.ends_with(&smaller) && !name.ends_with(&bigger)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeResult {
    pub sources: usize,
    pub encoded: usize,
    pub failed: usize,
}

/// Produce every missing variant for every video directly inside `dir`.
/// Encoder failures are logged and counted; store errors abort the run.
pub fn transcode_directory(conn: &Connection, dir: &Path, force: bool) -> Result<TranscodeResult> {
    let mut sources = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| VidHashError::Io(e.into()))?;
        let path = entry.path();
        if path.is_file() && is_source_candidate(path) && metadata::is_video(path) {
            sources.push(path.to_path_buf());
        }
    }
    sources.sort();

    let variants = default_variants();
    let mut result = TranscodeResult { sources: sources.len(), ..Default::default() };

    for source in &sources {
        for variant in &variants {
            let Some(mut job) = plan(conn, source, variant, force)? else {
                continue;
            };
            match job.run(conn) {
                Ok(()) => result.encoded += 1,
                Err(VidHashError::Tool(msg)) => {
                    result.failed += 1;
                    log::error!("Failed to transcode {}: {}", source.display(), msg);
                }
                Err(e) => return Err(e),
            }
        }
    }

    log::info!(
        "Transcoded {} sources: {} encoded, {} failed",
        result.sources,
        result.encoded,
        result.failed
    );
    Ok(result)
}
