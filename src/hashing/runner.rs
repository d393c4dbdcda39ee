// Directory hashing run for one algorithm

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::db::schema::{self, Hash, Video};
use crate::error::{Result, VidHashError};
use crate::hashing::HashAlgorithm;
use crate::metadata::has_video_extension;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRunResult {
    pub visited: usize,
    pub hashed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Regular files directly inside `dir` with a known video extension, sorted by path.
pub fn discover_videos(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| VidHashError::Io(e.into()))?;
        let path = entry.path();
        if path.is_file() && has_video_extension(path) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Look up the stored video for a media file. Hashing an unregistered file is a caller error.
fn registered_video(conn: &Connection, path: &Path) -> Result<Video> {
    let probe = Video::from_path(path)
        .ok_or_else(|| VidHashError::Precondition(format!("cannot name video at {}", path.display())))?;

    schema::find_video_by_name_and_format(conn, &probe.name, &probe.format)?.ok_or_else(|| {
        VidHashError::Precondition(format!(
            "cannot hash a video that hasn't been added previously: {}",
            path.display()
        ))
    })
}

/// Fingerprint every registered video in `dir` that lacks one for `algorithm` (all of them when `force`).
/// Producer failures are logged and counted; store errors abort the run.
pub fn run_hashing(conn: &Connection, algorithm: &dyn HashAlgorithm, dir: &Path, force: bool) -> Result<HashRunResult> {
    let mut result = HashRunResult::default();

    for path in discover_videos(dir)? {
        result.visited += 1;
        let video = registered_video(conn, &path)?;

        if !force && video.fingerprint(algorithm.name()).is_some() {
            result.skipped += 1;
            continue;
        }

        log::info!("{}: hashing {}", algorithm.name(), path.display());
        let value = match algorithm.hash_video(&path) {
            Ok(v) => v,
            Err(e) => {
                result.failed += 1;
                log::error!("{}: failed to hash {}: {}", algorithm.name(), path.display(), e);
                continue;
            }
        };

        schema::attach_fingerprints(conn, &video.with_hash(Hash::new(algorithm.name(), value)))?;
        result.hashed += 1;
    }

    log::info!(
        "{}: visited {}, hashed {}, skipped {}, failed {}",
        algorithm.name(),
        result.visited,
        result.hashed,
        result.skipped,
        result.failed
    );
    Ok(result)
}
