// pHash video fingerprints via the external phash helper

use std::path::Path;

use crate::constants::PHASH_BITS;
use crate::db::schema::Hash;
use crate::error::{Result, VidHashError};
use crate::tools::ExternalTool;
use crate::hashing::bits::{hamming_u64, parse_int_fingerprint};
use crate::hashing::HashAlgorithm;

pub const PHASH_NAME: &str = "phash-video";

/// 64-bit DCT video hash computed by the `phash` binary.
#[derive(Debug, Default)]
pub struct PHashVideo;

impl HashAlgorithm for PHashVideo {
    fn name(&self) -> &str {
        PHASH_NAME
    }

    fn max_threshold(&self) -> u32 {
        PHASH_BITS
    }

    fn compute_distance(&self, a: &Hash, b: &Hash) -> Result<i64> {
        let a = parse_int_fingerprint(&a.value)?;
        let b = parse_int_fingerprint(&b.value)?;
        Ok(i64::from(hamming_u64(a, b)))
    }

    fn hash_video(&self, path: &Path) -> Result<String> {
        let output = ExternalTool::Phash.command()
            .arg(path)
            .output()
            .map_err(|e| VidHashError::Tool(format!("Failed to run phash: {}", e)))?;

        let value = parse_phash_output(&output.stdout, &output.stderr, path)?;
        Ok(value.to_string())
    }

    fn tools(&self) -> &'static [ExternalTool] {
        &[ExternalTool::Phash]
    }
}

/// The helper prints one integer per line; anything on stderr is a failure.
fn parse_phash_output(stdout: &[u8], stderr: &[u8], path: &Path) -> Result<u64> {
    if !stderr.is_empty() {
        return Err(VidHashError::Tool(format!(
            "phash failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(stderr).trim()
        )));
    }

    let stdout = String::from_utf8_lossy(stdout);
    let first = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| VidHashError::Tool(format!("No output from phash on {}", path.display())))?;

    first.parse::<u64>().map_err(|_| {
        VidHashError::Tool(format!("phash printed {:?} for {}, expected an integer", first, path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phash_output() {
        let p = Path::new("clip.mp4");
        assert_eq!(parse_phash_output(b"123456789\n", b"", p).unwrap(), 123456789);
        assert_eq!(parse_phash_output(b"42\n17\n", b"", p).unwrap(), 42);
    }

    #[test]
    fn test_parse_phash_output_failures() {
        let p = Path::new("clip.mp4");
        assert!(matches!(parse_phash_output(b"", b"", p), Err(VidHashError::Tool(_))));
        assert!(matches!(parse_phash_output(b"1\n", b"cannot open", p), Err(VidHashError::Tool(_))));
        assert!(matches!(parse_phash_output(b"abc\n", b"", p), Err(VidHashError::Tool(_))));
    }

    #[test]
    fn test_distance_is_64_bit_hamming() {
        let alg = PHashVideo;
        let a = Hash::new(PHASH_NAME, "0");
        let b = Hash::new(PHASH_NAME, u64::MAX.to_string());
        let c = Hash::new(PHASH_NAME, "3");
        assert_eq!(alg.compute_distance(&a, &b).unwrap(), 64);
        assert_eq!(alg.compute_distance(&a, &c).unwrap(), 2);
        assert_eq!(alg.max_threshold(), 64);
    }
}
