// Tile points, principal-component projection and digit encoding

use std::sync::Arc;

use rustdct::{DctPlanner, TransformType2And3};

use super::frames::Frame;

/// How one `point_x x point_y` tile becomes a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointMapping {
    /// Every pixel value of the tile, row-major, channels interleaved.
    Block,
    /// Per-channel mean of the tile.
    Mosaic,
    /// 2-D DCT-II of each channel plane, coefficients in zig-zag order, channels interleaved.
    Dct,
}

/// Embedding coordinates to a single magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Norm {
    /// L2 norm of the first two coordinates.
    Euclidean2,
    /// Absolute value of the first coordinate.
    Absolute1,
}

impl Norm {
    pub fn dimensions(&self) -> usize {
        match self {
            Norm::Euclidean2 => 2,
            Norm::Absolute1 => 1,
        }
    }

    pub fn apply(&self, coords: &[f64]) -> f64 {
        match self {
            Norm::Euclidean2 => {
                let x = coords.first().copied().unwrap_or(0.0);
                let y = coords.get(1).copied().unwrap_or(0.0);
                (x * x + y * y).sqrt()
            }
            Norm::Absolute1 => coords.first().copied().unwrap_or(0.0).abs(),
        }
    }
}

/// Splits frames into tiles and maps each tile to a point.
pub struct TileMapper {
    point_x: usize,
    point_y: usize,
    mapping: PointMapping,
    row_dct: Arc<dyn TransformType2And3<f64>>,
    col_dct: Arc<dyn TransformType2And3<f64>>,
}

impl TileMapper {
    pub fn new(point_x: usize, point_y: usize, mapping: PointMapping) -> Self {
        let mut planner = DctPlanner::new();
        Self {
            point_x,
            point_y,
            mapping,
            row_dct: planner.plan_dct2(point_x),
            col_dct: planner.plan_dct2(point_y),
        }
    }

    pub fn tiles_per_frame(&self, frame: &Frame) -> usize {
        (frame.width / self.point_x) * (frame.height / self.point_y)
    }

    /// Every tile of every frame, frame by frame, tiles in row-major order.
    pub fn points(&self, frames: &[Frame]) -> Vec<Vec<f64>> {
        frames
            .iter()
            .flat_map(|frame| (0..self.tiles_per_frame(frame)).map(move |n| self.point(frame, n)))
            .collect()
    }

    pub fn point(&self, frame: &Frame, n: usize) -> Vec<f64> {
        match self.mapping {
            PointMapping::Block => self.block(frame, n),
            PointMapping::Mosaic => self.mosaic(frame, n),
            PointMapping::Dct => self.dct(frame, n),
        }
    }

    fn tile_origin(&self, frame: &Frame, n: usize) -> (usize, usize) {
        let tiles_per_row = frame.width / self.point_x;
        ((n % tiles_per_row) * self.point_x, (n / tiles_per_row) * self.point_y)
    }

    fn block(&self, frame: &Frame, n: usize) -> Vec<f64> {
        let (x0, y0) = self.tile_origin(frame, n);
        let mut data = Vec::with_capacity(self.point_x * self.point_y * frame.channels);
        for y in y0..y0 + self.point_y {
            for x in x0..x0 + self.point_x {
                data.extend_from_slice(frame.pixel(x, y));
            }
        }
        data
    }

    fn mosaic(&self, frame: &Frame, n: usize) -> Vec<f64> {
        let block = self.block(frame, n);
        let pixels = (self.point_x * self.point_y) as f64;
        let mut avg = vec![0.0; frame.channels];
        for px in block.chunks_exact(frame.channels) {
            for (acc, v) in avg.iter_mut().zip(px) {
                *acc += v;
            }
        }
        avg.iter_mut().for_each(|v| *v /= pixels);
        avg
    }

    fn dct(&self, frame: &Frame, n: usize) -> Vec<f64> {
        let block = self.block(frame, n);
        let channels = frame.channels;
        let (w, h) = (self.point_x, self.point_y);

        let planes: Vec<Vec<f64>> = (0..channels)
            .map(|c| {
                let mut plane: Vec<f64> = block.iter().skip(c).step_by(channels).copied().collect();
                self.dct_2d(&mut plane);
                zigzag(&plane, w, h)
            })
            .collect();

        let mut data = Vec::with_capacity(block.len());
        for k in 0..w * h {
            for plane in &planes {
                data.push(plane[k]);
            }
        }
        data
    }

    /// In-place 2-D DCT-II of a row-major `point_x x point_y` plane: rows, transpose, rows, transpose back.
    fn dct_2d(&self, plane: &mut [f64]) {
        let (w, h) = (self.point_x, self.point_y);
        plane.chunks_exact_mut(w).for_each(|row| self.row_dct.process_dct2(row));

        let mut transposed = transpose(plane, w, h);
        transposed.chunks_exact_mut(h).for_each(|col| self.col_dct.process_dct2(col));

        plane.copy_from_slice(&transpose(&transposed, h, w));
    }
}

/// Row-major `width x height` to row-major `height x width`.
fn transpose(data: &[f64], width: usize, height: usize) -> Vec<f64> {
    let mut out = vec![0.0; data.len()];
    for y in 0..height {
        for x in 0..width {
            out[x * height + y] = data[y * width + x];
        }
    }
    out
}

/// Read a row-major plane along its anti-diagonals, alternating direction.
pub fn zigzag(plane: &[f64], width: usize, height: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(plane.len());
    for s in 0..width + height - 1 {
        // Cells with row + col == s, rows descending
        let mut diagonal: Vec<f64> = (0..height)
            .rev()
            .filter_map(|row| s.checked_sub(row).filter(|&col| col < width).map(|col| plane[row * width + col]))
            .collect();
        if (s as i64 + 1 - height as i64).rem_euclid(2) == 0 {
            diagonal.reverse();
        }
        out.extend(diagonal);
    }
    out
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale to unit length; false for a zero vector.
fn normalize(v: &mut [f64]) -> bool {
    let len = dot(v, v).sqrt();
    if len <= f64::EPSILON {
        return false;
    }
    v.iter_mut().for_each(|x| *x /= len);
    true
}

fn orthogonalize(v: &mut [f64], basis: &[Vec<f64>]) {
    for b in basis {
        let d = dot(v, b);
        v.iter_mut().zip(b).for_each(|(x, y)| *x -= d * y);
    }
}

/// Project points onto their first `dims` principal components, found by
/// power iteration with deflation. Returns one coordinate vector per point.
pub fn project(points: &[Vec<f64>], dims: usize, iterations: usize) -> Vec<Vec<f64>> {
    let Some(first) = points.first() else {
        return Vec::new();
    };
    let d = first.len();
    let n = points.len() as f64;

    let mut mean = vec![0.0; d];
    for p in points {
        mean.iter_mut().zip(p).for_each(|(m, x)| *m += x);
    }
    mean.iter_mut().for_each(|m| *m /= n);

    let centered: Vec<Vec<f64>> = points
        .iter()
        .map(|p| p.iter().zip(&mean).map(|(x, m)| x - m).collect())
        .collect();

    let mut components: Vec<Vec<f64>> = Vec::with_capacity(dims);
    for _ in 0..dims {
        let mut v: Vec<f64> = (0..d).map(|j| 1.0 + j as f64 / d as f64).collect();
        orthogonalize(&mut v, &components);
        if !normalize(&mut v) {
            components.push(vec![0.0; d]);
            continue;
        }

        for _ in 0..iterations {
            let mut next = vec![0.0; d];
            for row in &centered {
                let s = dot(row, &v);
                next.iter_mut().zip(row).for_each(|(acc, x)| *acc += x * s);
            }
            orthogonalize(&mut next, &components);
            if !normalize(&mut next) {
                break;
            }
            v = next;
        }
        components.push(v);
    }

    centered
        .iter()
        .map(|row| components.iter().map(|c| dot(row, c)).collect())
        .collect()
}

/// Scale magnitudes linearly onto 0..=255. A constant input maps to all zeros.
pub fn norms_to_digits(norms: &[f64]) -> Vec<u8> {
    let (mn, mx) = norms
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(mn, mx), &v| (mn.min(v), mx.max(v)));
    let range = mx - mn;
    if !range.is_finite() || range <= 0.0 {
        return vec![0; norms.len()];
    }
    norms
        .iter()
        .map(|&v| ((v - mn) / range * 255.0).floor().clamp(0.0, 255.0) as u8)
        .collect()
}

/// Move leading zero digits to the end so the most significant digit is non-zero.
pub fn rotate_leading_zeros(digits: &mut [u8]) {
    let zeros = digits.iter().take_while(|&&d| d == 0).count();
    if zeros < digits.len() {
        digits.rotate_left(zeros);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 256x256 RGB frame whose pixel (x, y) is (0, y, x).
    fn coordinate_frame() -> Frame {
        let mut data = Vec::with_capacity(256 * 256 * 3);
        for y in 0..256 {
            for x in 0..256 {
                data.extend_from_slice(&[0.0, y as f64, x as f64]);
            }
        }
        Frame { width: 256, height: 256, channels: 3, data }
    }

    fn expected_block(row0: usize, col0: usize) -> Vec<f64> {
        let mut v = Vec::new();
        for y in row0..row0 + 16 {
            for x in col0..col0 + 16 {
                v.extend_from_slice(&[0.0, y as f64, x as f64]);
            }
        }
        v
    }

    #[test]
    fn test_block_points() {
        let frame = coordinate_frame();
        let mapper = TileMapper::new(16, 16, PointMapping::Block);
        assert_eq!(mapper.point(&frame, 0), expected_block(0, 0));
        assert_eq!(mapper.point(&frame, 1), expected_block(0, 16));
        assert_eq!(mapper.point(&frame, 16), expected_block(16, 0));
        assert_eq!(mapper.tiles_per_frame(&frame), 256);
    }

    #[test]
    fn test_mosaic_point_is_mean() {
        let frame = coordinate_frame();
        let mapper = TileMapper::new(16, 16, PointMapping::Mosaic);
        assert_eq!(mapper.point(&frame, 1), vec![0.0, 7.5, 23.5]);
    }

    #[test]
    fn test_dct_of_flat_tile_has_only_dc() {
        let frame = Frame { width: 8, height: 8, channels: 1, data: vec![1.0; 64] };
        let mapper = TileMapper::new(8, 8, PointMapping::Dct);
        let point = mapper.point(&frame, 0);
        assert_eq!(point.len(), 64);
        assert!(point[0].abs() > 1.0);
        assert!(point[1..].iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_zigzag_order() {
        assert_eq!(zigzag(&[0.0, 1.0, 2.0, 3.0], 2, 2), vec![0.0, 1.0, 2.0, 3.0]);
        let plane: Vec<f64> = (0..9).map(f64::from).collect();
        assert_eq!(zigzag(&plane, 3, 3), vec![0.0, 3.0, 1.0, 2.0, 4.0, 6.0, 7.0, 5.0, 8.0]);
    }

    #[test]
    fn test_transpose() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(transpose(&data, 3, 2), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_projection_of_points_on_a_line() {
        let points = vec![vec![1.0, 2.0], vec![2.0, 4.0], vec![3.0, 6.0]];
        let coords = project(&points, 1, 32);
        let expected = 5f64.sqrt();
        assert!((coords[0][0].abs() - expected).abs() < 1e-9);
        assert!(coords[1][0].abs() < 1e-9);
        assert!((coords[2][0].abs() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_projection_of_identical_points() {
        let points = vec![vec![1.0, 1.0]; 4];
        let coords = project(&points, 2, 8);
        assert!(coords.iter().flatten().all(|v| *v == 0.0));
    }

    #[test]
    fn test_norms() {
        assert_eq!(Norm::Euclidean2.apply(&[3.0, -4.0]), 5.0);
        assert_eq!(Norm::Absolute1.apply(&[-2.5, 9.0]), 2.5);
        assert_eq!(Norm::Euclidean2.dimensions(), 2);
    }

    #[test]
    fn test_norms_to_digits() {
        assert_eq!(norms_to_digits(&[0.0, 5.0, 10.0]), vec![0, 127, 255]);
        assert_eq!(norms_to_digits(&[3.0, 3.0]), vec![0, 0]);
    }

    #[test]
    fn test_rotate_leading_zeros() {
        let mut digits = vec![0, 0, 7, 1];
        rotate_leading_zeros(&mut digits);
        assert_eq!(digits, vec![7, 1, 0, 0]);

        let mut zeros = vec![0, 0];
        rotate_leading_zeros(&mut zeros);
        assert_eq!(zeros, vec![0, 0]);
    }
}
