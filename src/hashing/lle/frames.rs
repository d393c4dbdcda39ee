// Frame sampling, decoding and preprocessing for the embedding hashes

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::constants::{BLACK_LEVEL, BLACK_LEVEL_MARGIN, FRAME_SAMPLE_SPAN, FRAME_SAMPLE_START};
use crate::error::{Result, VidHashError};
use crate::tools::ExternalTool;

/// A preprocessed frame: row-major pixels with `channels` interleaved f64 values each.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<f64>,
}

impl Frame {
    pub fn pixel(&self, x: usize, y: usize) -> &[f64] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }
}

/// How a resized frame is turned into numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Preprocess {
    /// Gaussian blur, then CIE L*a*b*.
    Lab { sigma: f32 },
    /// Gaussian blur, then luminance in 0..=1.
    Luma { sigma: f32 },
    /// RGB in 0..=1, optionally blurred.
    Plain { sigma: Option<f32> },
    /// Luminance in 0..=1, no blur.
    PlainGray,
}

impl Preprocess {
    pub fn channels(&self) -> usize {
        match self {
            Preprocess::Lab { .. } | Preprocess::Plain { .. } => 3,
            Preprocess::Luma { .. } | Preprocess::PlainGray => 1,
        }
    }

    pub fn apply(&self, img: &RgbImage) -> Frame {
        let blurred;
        let source = match self {
            Preprocess::Lab { sigma } | Preprocess::Luma { sigma } | Preprocess::Plain { sigma: Some(sigma) } => {
                blurred = imageops::blur(img, *sigma);
                &blurred
            }
            Preprocess::Plain { sigma: None } | Preprocess::PlainGray => img,
        };

        let channels = self.channels();
        let mut data = Vec::with_capacity(source.width() as usize * source.height() as usize * channels);
        for px in source.pixels() {
            match self {
                Preprocess::Lab { .. } => data.extend_from_slice(&rgb_to_lab(px)),
                Preprocess::Luma { .. } | Preprocess::PlainGray => data.push(luminance(px)),
                Preprocess::Plain { .. } => data.extend(px.0.iter().map(|&c| f64::from(c) / 255.0)),
            }
        }

        Frame {
            width: source.width() as usize,
            height: source.height() as usize,
            channels,
            data,
        }
    }
}

fn luminance(px: &Rgb<u8>) -> f64 {
    let [r, g, b] = px.0;
    (0.2125 * f64::from(r) + 0.7154 * f64::from(g) + 0.0721 * f64::from(b)) / 255.0
}

/// sRGB (D65) to CIE L*a*b*.
pub fn rgb_to_lab(px: &Rgb<u8>) -> [f64; 3] {
    fn linear(c: u8) -> f64 {
        let c = f64::from(c) / 255.0;
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    }
    fn f(t: f64) -> f64 {
        if t > 0.008856 {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    }

    let [r, g, b] = px.0.map(linear);
    let x = (0.412453 * r + 0.357580 * g + 0.180423 * b) / 0.95047;
    let y = 0.212671 * r + 0.715160 * g + 0.072169 * b;
    let z = (0.019334 * r + 0.119193 * g + 0.950227 * b) / 1.08883;

    let (fx, fy, fz) = (f(x), f(y), f(z));
    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// Frame indices to sample: start 5% in, stepping evenly through 90% of the video.
pub fn wanted_frames(fps: f64, duration_secs: f64, frame_count: usize) -> Option<Vec<u64>> {
    if frame_count == 0 {
        return None;
    }
    let n_frames = (fps * duration_secs * FRAME_SAMPLE_SPAN) as u64;
    let start = (duration_secs * fps * FRAME_SAMPLE_START).floor() as u64;
    let step = n_frames / frame_count as u64;
    if step == 0 {
        return None;
    }

    let wanted: Vec<u64> = (start..n_frames).step_by(step as usize).take(frame_count).collect();
    if wanted.len() < frame_count {
        return None;
    }
    Some(wanted)
}

fn select_filter(wanted: &[u64], width: u32, height: u32) -> String {
    let terms: Vec<String> = wanted.iter().map(|n| format!("eq(n\\,{})", n)).collect();
    format!("select='{}',scale={}:{}", terms.join("+"), width, height)
}

fn decode_args(path: &Path, wanted: &[u64], width: u32, height: u32) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
        "-vf".to_string(),
        select_filter(wanted, width, height),
        "-vsync".to_string(),
        "0".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "pipe:1".to_string(),
    ]
}

/// Decode exactly the `wanted` frames as RGB at `width x height`.
/// Fewer frames than requested is a malformed-media failure.
pub fn decode_frames(path: &Path, wanted: &[u64], width: u32, height: u32) -> Result<Vec<RgbImage>> {
    let output = ExternalTool::Ffmpeg.command()
        .args(decode_args(path, wanted, width, height))
        .output()
        .map_err(|e| VidHashError::Tool(format!("Failed to run ffmpeg: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VidHashError::Tool(format!("ffmpeg failed on {}: {}", path.display(), stderr.trim())));
    }

    let frame_size = width as usize * height as usize * 3;
    let frames: Vec<RgbImage> = output
        .stdout
        .chunks_exact(frame_size)
        .take(wanted.len())
        .filter_map(|chunk| RgbImage::from_raw(width, height, chunk.to_vec()))
        .collect();

    if frames.len() != wanted.len() {
        return Err(VidHashError::malformed(
            path,
            format!("invalid number of frames: wanted {}, got {}", wanted.len(), frames.len()),
        ));
    }
    Ok(frames)
}

fn is_bright(px: &Rgb<u8>) -> bool {
    let sum: u32 = px.0.iter().map(|&c| u32::from(c)).sum();
    f64::from(sum) > f64::from(BLACK_LEVEL) * 3.0 * BLACK_LEVEL_MARGIN
}

/// (top, bottom, left, right) counts of dark lines at each edge.
fn dark_edges(img: &RgbImage) -> (u32, u32, u32, u32) {
    let (w, h) = img.dimensions();
    let row_dark = |y: u32| (0..w).all(|x| !is_bright(img.get_pixel(x, y)));
    let col_dark = |x: u32| (0..h).all(|y| !is_bright(img.get_pixel(x, y)));

    let top = (0..h).take_while(|&y| row_dark(y)).count() as u32;
    let bottom = (0..h).rev().take_while(|&y| row_dark(y)).count() as u32;
    let left = (0..w).take_while(|&x| col_dark(x)).count() as u32;
    let right = (0..w).rev().take_while(|&x| col_dark(x)).count() as u32;
    (top, bottom, left, right)
}

/// Crop rectangle (x, y, w, h) removing black bars shared by every frame.
/// `None` when there is nothing to crop or the frames are entirely dark.
pub fn black_bar_crop(frames: &[RgbImage]) -> Option<(u32, u32, u32, u32)> {
    let first = frames.first()?;
    let (w, h) = first.dimensions();

    let (top, bottom, left, right) = frames
        .iter()
        .map(dark_edges)
        .fold((h, h, w, w), |acc, e| (acc.0.min(e.0), acc.1.min(e.1), acc.2.min(e.2), acc.3.min(e.3)));

    if top + bottom >= h || left + right >= w {
        return None;
    }
    if top == 0 && bottom == 0 && left == 0 && right == 0 {
        return None;
    }
    Some((left, top, w - left - right, h - top - bottom))
}

/// Crop shared black bars and rescale every frame back to `width x height`.
pub fn crop_and_rescale(frames: Vec<RgbImage>, width: u32, height: u32) -> Vec<RgbImage> {
    let crop = black_bar_crop(&frames);
    frames
        .into_iter()
        .map(|img| {
            let img = match crop {
                Some((x, y, w, h)) => imageops::crop_imm(&img, x, y, w, h).to_image(),
                None => img,
            };
            if img.dimensions() == (width, height) {
                img
            } else {
                imageops::resize(&img, width, height, FilterType::Triangle)
            }
        })
        .collect()
}
