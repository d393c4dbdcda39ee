// Frame-embedding fingerprints (the lle-* family)
//
// Sample frames, split them into tiles, embed every tile as a point, project
// the point cloud onto its principal components and quantise each point's
// magnitude into one base-256 digit. The fingerprint is the leading bits of
// the resulting fraction.

pub mod embedding;
pub mod frames;

use std::path::Path;

use image::RgbImage;

use crate::constants::{LLE_HASH_BITS, PROJECTION_ITERATIONS};
use crate::db::schema::Hash;
use crate::error::{Result, VidHashError};
use crate::hashing::bits::{fraction_bits, hamming_bits, parse_bitstring, to_bitstring};
use crate::hashing::HashAlgorithm;
use crate::metadata;
use crate::tools::ExternalTool;

pub use embedding::{Norm, PointMapping, TileMapper};
pub use frames::{Frame, Preprocess};

/// One variant of the family.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingConfig {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub point_x: u32,
    pub point_y: u32,
    pub frame_count: usize,
    pub preprocess: Preprocess,
    pub mapping: PointMapping,
    pub norm: Norm,
}

impl EmbeddingConfig {
    const fn base(name: &'static str, side: u32, preprocess: Preprocess, norm: Norm) -> Self {
        Self {
            name,
            width: side,
            height: side,
            point_x: 16,
            point_y: 16,
            frame_count: 8,
            preprocess,
            mapping: PointMapping::Block,
            norm,
        }
    }

    const fn with_mapping(mut self, mapping: PointMapping, point: u32) -> Self {
        self.mapping = mapping;
        self.point_x = point;
        self.point_y = point;
        self
    }

    pub fn channels(&self) -> usize {
        self.preprocess.channels()
    }

    pub fn wanted_dimensions(&self) -> usize {
        self.norm.dimensions()
    }

    pub fn points_per_frame(&self) -> usize {
        ((self.width / self.point_x) * (self.height / self.point_y)) as usize
    }
}

const LAB3: Preprocess = Preprocess::Lab { sigma: 3.0 };
const LUMA3: Preprocess = Preprocess::Luma { sigma: 3.0 };
const LUMA5: Preprocess = Preprocess::Luma { sigma: 5.0 };

/// Every registered variant.
pub const VARIANTS: [EmbeddingConfig; 11] = [
    EmbeddingConfig::base("lle-16x16-point", 320, LAB3, Norm::Euclidean2),
    EmbeddingConfig::base("lle-16x16-luma-point", 320, LUMA3, Norm::Euclidean2),
    EmbeddingConfig::base("lle-16x16-1d", 320, LAB3, Norm::Absolute1),
    EmbeddingConfig::base("lle-16x16-luma-1d", 320, LUMA3, Norm::Absolute1),
    EmbeddingConfig::base("lle-16x16-in-256-point", 256, LAB3, Norm::Euclidean2),
    EmbeddingConfig::base("lle-16x16-in-256-luma-1d", 256, LUMA3, Norm::Absolute1),
    EmbeddingConfig::base("lle-16x16-in-256-low-gauss-1d", 256, LUMA5, Norm::Absolute1),
    EmbeddingConfig::base("lle-mosaic", 320, Preprocess::Plain { sigma: None }, Norm::Absolute1)
        .with_mapping(PointMapping::Mosaic, 16),
    EmbeddingConfig::base("lle-mosaic-gray", 320, Preprocess::PlainGray, Norm::Absolute1)
        .with_mapping(PointMapping::Mosaic, 16),
    EmbeddingConfig::base("lle-dct-32x32", 320, Preprocess::Plain { sigma: Some(1.0) }, Norm::Euclidean2)
        .with_mapping(PointMapping::Dct, 32),
    EmbeddingConfig::base("lle-dct-8x8", 320, LAB3, Norm::Euclidean2).with_mapping(PointMapping::Block, 8),
];

pub struct FrameEmbedding {
    config: EmbeddingConfig,
    mapper: TileMapper,
}

impl FrameEmbedding {
    pub fn new(config: EmbeddingConfig) -> Self {
        let mapper = TileMapper::new(config.point_x as usize, config.point_y as usize, config.mapping);
        Self { config, mapper }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// Fingerprint of already-decoded RGB frames at `width x height`.
    pub fn fingerprint_frames(&self, raw: Vec<RgbImage>) -> String {
        let cfg = &self.config;
        let frames: Vec<Frame> = frames::crop_and_rescale(raw, cfg.width, cfg.height)
            .iter()
            .map(|img| cfg.preprocess.apply(img))
            .collect();

        let points = self.mapper.points(&frames);
        let coords = embedding::project(&points, cfg.wanted_dimensions(), PROJECTION_ITERATIONS);
        let norms: Vec<f64> = coords.iter().map(|c| cfg.norm.apply(c)).collect();

        let mut digits = embedding::norms_to_digits(&norms);
        embedding::rotate_leading_zeros(&mut digits);
        to_bitstring(&fraction_bits(&digits, LLE_HASH_BITS as usize))
    }
}

impl HashAlgorithm for FrameEmbedding {
    fn name(&self) -> &str {
        self.config.name
    }

    fn max_threshold(&self) -> u32 {
        LLE_HASH_BITS
    }

    fn compute_distance(&self, a: &Hash, b: &Hash) -> Result<i64> {
        let a = parse_bitstring(&a.value)?;
        let b = parse_bitstring(&b.value)?;
        Ok(i64::from(hamming_bits(&a, &b)?))
    }

    fn hash_video(&self, path: &Path) -> Result<String> {
        let cfg = &self.config;
        let (fps, duration) = metadata::ffprobe::probe(path)?.timing(path)?;
        let wanted = frames::wanted_frames(fps, duration, cfg.frame_count).ok_or_else(|| {
            VidHashError::malformed(path, format!("too short to sample {} frames", cfg.frame_count))
        })?;

        log::debug!("{}: sampling frames {:?} of {}", cfg.name, wanted, path.display());
        let raw = frames::decode_frames(path, &wanted, cfg.width, cfg.height)?;
        Ok(self.fingerprint_frames(raw))
    }

    fn tools(&self) -> &'static [ExternalTool] {
        &[ExternalTool::Ffprobe, ExternalTool::Ffmpeg]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn small(mapping: PointMapping, preprocess: Preprocess, norm: Norm) -> FrameEmbedding {
        FrameEmbedding::new(EmbeddingConfig {
            name: "lle-test",
            width: 32,
            height: 32,
            point_x: 8,
            point_y: 8,
            frame_count: 2,
            preprocess,
            mapping,
            norm,
        })
    }

    fn gradient(seed: u8) -> RgbImage {
        RgbImage::from_fn(32, 32, |x, y| {
            Rgb([(x * 8) as u8, (y * 8) as u8, seed.wrapping_add((x * y) as u8)])
        })
    }

    #[test]
    fn test_variant_names_are_unique() {
        let mut names: Vec<&str> = VARIANTS.iter().map(|v| v.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), VARIANTS.len());
    }

    #[test]
    fn test_variants_tile_evenly() {
        for v in VARIANTS.iter() {
            assert_eq!(v.width % v.point_x, 0, "{}", v.name);
            assert_eq!(v.height % v.point_y, 0, "{}", v.name);
        }
        assert_eq!(VARIANTS[0].points_per_frame(), 400);
        assert_eq!(VARIANTS[4].points_per_frame(), 256);
    }

    #[test]
    fn test_fingerprint_shape_and_determinism() {
        let alg = small(PointMapping::Block, Preprocess::Plain { sigma: None }, Norm::Euclidean2);
        let a = alg.fingerprint_frames(vec![gradient(0), gradient(40)]);
        let b = alg.fingerprint_frames(vec![gradient(0), gradient(40)]);

        assert_eq!(a.len(), LLE_HASH_BITS as usize);
        assert!(a.chars().all(|c| c == '0' || c == '1'));
        assert_eq!(a, b);

        let ha = Hash::new("lle-test", a);
        let hb = Hash::new("lle-test", b);
        assert_eq!(alg.compute_distance(&ha, &hb).unwrap(), 0);
    }

    #[test]
    fn test_every_mapping_produces_a_fingerprint() {
        for (mapping, preprocess, norm) in [
            (PointMapping::Mosaic, Preprocess::PlainGray, Norm::Absolute1),
            (PointMapping::Dct, Preprocess::Plain { sigma: Some(1.0) }, Norm::Euclidean2),
            (PointMapping::Block, Preprocess::Luma { sigma: 1.0 }, Norm::Absolute1),
            (PointMapping::Block, Preprocess::Lab { sigma: 1.0 }, Norm::Euclidean2),
        ] {
            let alg = small(mapping, preprocess, norm);
            let fp = alg.fingerprint_frames(vec![gradient(3), gradient(90)]);
            assert_eq!(fp.len(), 480, "{:?}", mapping);
        }
    }

    #[test]
    fn test_distance_counts_differing_bits() {
        let alg = FrameEmbedding::new(VARIANTS[0].clone());
        let a = Hash::new(alg.name(), "0".repeat(480));
        let b = Hash::new(alg.name(), format!("{}{}", "1".repeat(7), "0".repeat(473)));
        assert_eq!(alg.compute_distance(&a, &b).unwrap(), 7);
        assert_eq!(alg.max_threshold(), 480);
    }
}
