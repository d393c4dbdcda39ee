// External programs: ffmpeg, ffprobe and the phash helper
//
// A tool is looked up by its VIDHASH_*_PATH override, then beside the running
// executable (directly or under bin/), then left to PATH.

use std::env;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, VidHashError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExternalTool {
    Ffmpeg,
    Ffprobe,
    Phash,
}

impl ExternalTool {
    pub fn binary(self) -> &'static str {
        match self {
            ExternalTool::Ffmpeg => "ffmpeg",
            ExternalTool::Ffprobe => "ffprobe",
            ExternalTool::Phash => "phash",
        }
    }

    pub fn env_key(self) -> &'static str {
        match self {
            ExternalTool::Ffmpeg => "VIDHASH_FFMPEG_PATH",
            ExternalTool::Ffprobe => "VIDHASH_FFPROBE_PATH",
            ExternalTool::Phash => "VIDHASH_PHASH_PATH",
        }
    }

    /// Resolved program path. Falls back to the bare name for a PATH lookup.
    pub fn path(self) -> PathBuf {
        locate(self.env_key(), self.binary())
    }

    pub fn command(self) -> Command {
        Command::new(self.path())
    }

    /// Fail with a `Tool` error unless the program exists, either at its
    /// resolved location or in one of the `PATH` directories.
    pub fn ensure_available(self) -> Result<PathBuf> {
        self.available_with(env::var_os("PATH").as_deref())
    }

    fn available_with(self, search_path: Option<&OsStr>) -> Result<PathBuf> {
        let path = self.path();
        let found = if path.components().count() == 1 {
            search_path.and_then(|dirs| find_in_dirs(&path, dirs))
        } else {
            Some(path).filter(|p| p.is_file())
        };
        if let Some(found) = found {
            return Ok(found);
        }
        Err(VidHashError::Tool(format!(
            "{} not found (set {} or put it on PATH)",
            self.binary(),
            self.env_key()
        )))
    }
}

impl fmt::Display for ExternalTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

fn exe_name(name: &Path) -> PathBuf {
    if cfg!(windows) && name.extension().is_none() {
        name.with_extension("exe")
    } else {
        name.to_path_buf()
    }
}

/// First directory of a `PATH`-style list holding `name` as a regular file.
fn find_in_dirs(name: &Path, dirs: &OsStr) -> Option<PathBuf> {
    let file_name = exe_name(name);
    env::split_paths(dirs)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

fn locate(env_key: &str, name: &str) -> PathBuf {
    if let Some(p) = env::var_os(env_key).map(PathBuf::from).filter(|p| p.exists()) {
        return p;
    }

    let file_name = exe_name(Path::new(name));
    let beside_exe = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.to_path_buf()))
        .into_iter()
        .flat_map(|dir| [dir.join(&file_name), dir.join("bin").join(&file_name)]);

    for candidate in beside_exe {
        if candidate.exists() {
            return candidate;
        }
    }

    PathBuf::from(name)
}
