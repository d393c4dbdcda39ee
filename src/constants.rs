// vidhash constants
// Changing a fingerprint width or a search constant invalidates stored accuracy rows.

// Paths
pub const DB_FILENAME: &str = "videohash.db";
pub const DB_PATH_ENV: &str = "VIDHASH_DB_PATH";

// Video extensions recognised by the hashing runner
pub const VIDEO_EXTENSIONS: [&str; 15] = [
    "avi", "mpg", "mov", "mp4", "mkv", "wmv", "flv", "ogv",
    "webm", "vob", "qt", "m4v", "mpv", "3gp", "f4v",
];

// Transcoding
pub const TRANSCODE_TARGET_FORMATS: [&str; 3] = ["avi", "mpg", "mp4"];
pub const TRANSCODE_RATE_ARGS: [&str; 7] = [
    "-b:v", "8M", "-maxrate", "10M", "-bufsize", "8M", "-an",
];
pub const SMALLER_SUFFIX: &str = "_smaller";
pub const SMALLER_SCALE_FILTER: &str = "scale=iw*0.9375:ih*0.9375";
pub const BIGGER_SUFFIX: &str = "_bigger";
pub const BIGGER_SCALE_FILTER: &str = "scale=iw*1.0625:ih*1.0625";

// Threshold search
pub const SEARCH_FIRST_THRESHOLD: u32 = 1;
pub const EARLY_STOP_AFTER_THRESHOLD: u32 = 10;
pub const EARLY_STOP_SCORE: f64 = 0.6;
pub const PERFECT_SCORE: f64 = 1.0;

// Fingerprint widths (also the maximum threshold of each family)
pub const PHASH_BITS: u32 = 64;
pub const LLE_HASH_BITS: u32 = 480;

// Frame sampling for the LLE family
pub const FRAME_SAMPLE_START: f64 = 0.05;
pub const FRAME_SAMPLE_SPAN: f64 = 0.90;
pub const BLACK_LEVEL: u32 = 16;
pub const BLACK_LEVEL_MARGIN: f64 = 1.15;

// Principal-component projection
pub const PROJECTION_ITERATIONS: usize = 64;
