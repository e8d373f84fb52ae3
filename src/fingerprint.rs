//! Perceptual fingerprints for similarity matching.
//!
//! Four independent 64-bit hash codes are computed per image. Each algorithm
//! is a cheap approximation with different failure modes (scaling, cropping,
//! gradient shifts); scan-time matching takes the minimum Hamming distance
//! across all of them.

use std::f64::consts::PI;

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Side length of the hash grid. Every code is `HASH_SIZE * HASH_SIZE` bits.
pub const HASH_SIZE: u32 = 8;

/// Sentinel distance returned when two codes cannot be compared.
pub const MAX_DISTANCE: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Mean-threshold hash. Fast, weakest against gradient shifts.
    #[serde(rename = "ahash")]
    Average,
    /// DCT low-frequency hash. Most robust to rescaling and recompression.
    #[serde(rename = "phash")]
    Perceptual,
    /// Horizontal gradient hash. Good balance of speed and accuracy.
    #[serde(rename = "dhash")]
    Difference,
    /// Haar wavelet approximation hash. Strongest on scaled images.
    #[serde(rename = "whash")]
    Wavelet,
}

/// Fixed algorithm set, in the order used to break ties at equal distance.
pub const ALGORITHMS: [Algorithm; 4] = [
    Algorithm::Average,
    Algorithm::Perceptual,
    Algorithm::Difference,
    Algorithm::Wavelet,
];

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Average => "ahash",
            Algorithm::Perceptual => "phash",
            Algorithm::Difference => "dhash",
            Algorithm::Wavelet => "whash",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hash code per algorithm, each 16 lowercase hex chars (64 bits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    pub ahash: String,
    pub phash: String,
    pub dhash: String,
    pub whash: String,
}

impl Fingerprints {
    pub fn code(&self, algorithm: Algorithm) -> &str {
        match algorithm {
            Algorithm::Average => &self.ahash,
            Algorithm::Perceptual => &self.phash,
            Algorithm::Difference => &self.dhash,
            Algorithm::Wavelet => &self.whash,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Algorithm, &str)> {
        ALGORITHMS.into_iter().map(move |alg| (alg, self.code(alg)))
    }
}

/// Pluggable hashing backend. Any implementation must be deterministic and
/// produce a fixed-length code per algorithm for every valid image.
pub trait Fingerprinter: Send + Sync {
    /// Compute all four codes for an RGB-normalized image. Callers are
    /// responsible for color-space normalization before calling this.
    fn compute(&self, image: &RgbImage) -> Result<Fingerprints, Error>;
}

/// Default backend implementing the four algorithms over the luma plane.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardFingerprinter;

impl Fingerprinter for StandardFingerprinter {
    fn compute(&self, image: &RgbImage) -> Result<Fingerprints, Error> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::InvalidImage("zero-dimension image".into()));
        }
        Ok(Fingerprints {
            ahash: to_hex(average_hash(image)),
            phash: to_hex(perceptual_hash(image)),
            dhash: to_hex(difference_hash(image)),
            whash: to_hex(wavelet_hash(image)),
        })
    }
}

/// Hamming distance between two hex-encoded hash codes.
///
/// Codes of differing length are incomparable and yield [`MAX_DISTANCE`],
/// as does any code that fails to decode as hex.
pub fn hamming_distance(a: &str, b: &str) -> u32 {
    if a.len() != b.len() {
        return MAX_DISTANCE;
    }
    let (Ok(a), Ok(b)) = (hex::decode(a), hex::decode(b)) else {
        return MAX_DISTANCE;
    };
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

fn to_hex(bits: u64) -> String {
    format!("{bits:016x}")
}

/// Resize to `w`x`h` and convert to a BT.601 luma plane.
fn luma_grid(image: &RgbImage, w: u32, h: u32) -> Vec<f64> {
    let resized = imageops::resize(image, w, h, FilterType::Triangle);
    resized
        .pixels()
        .map(|p| 0.299 * f64::from(p[0]) + 0.587 * f64::from(p[1]) + 0.114 * f64::from(p[2]))
        .collect()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// aHash: 8x8 luma grid, bit set where the pixel is at or above the mean.
fn average_hash(image: &RgbImage) -> u64 {
    let grid = luma_grid(image, HASH_SIZE, HASH_SIZE);
    let mean = grid.iter().sum::<f64>() / grid.len() as f64;
    let mut bits = 0u64;
    for (i, &v) in grid.iter().enumerate() {
        if v >= mean {
            bits |= 1 << i;
        }
    }
    bits
}

/// dHash: 9x8 luma grid, one bit per adjacent horizontal pair.
fn difference_hash(image: &RgbImage) -> u64 {
    let w = HASH_SIZE as usize + 1;
    let grid = luma_grid(image, HASH_SIZE + 1, HASH_SIZE);
    let mut bits = 0u64;
    let mut bit = 0;
    for row in 0..HASH_SIZE as usize {
        for col in 0..HASH_SIZE as usize {
            if grid[row * w + col] > grid[row * w + col + 1] {
                bits |= 1 << bit;
            }
            bit += 1;
        }
    }
    bits
}

/// pHash: 32x32 luma grid, 2-D DCT-II, bit per low-frequency coefficient
/// above the median of the top-left 8x8 block.
fn perceptual_hash(image: &RgbImage) -> u64 {
    let n = (HASH_SIZE * 4) as usize;
    let grid = luma_grid(image, n as u32, n as u32);
    let freq = dct_2d(&grid, n);

    let mut low = Vec::with_capacity((HASH_SIZE * HASH_SIZE) as usize);
    for row in 0..HASH_SIZE as usize {
        for col in 0..HASH_SIZE as usize {
            low.push(freq[row * n + col]);
        }
    }

    let med = median(&low);
    let mut bits = 0u64;
    for (i, &v) in low.iter().enumerate() {
        if v > med {
            bits |= 1 << i;
        }
    }
    bits
}

/// Separable 2-D DCT-II over an n x n plane. n is 32 here, so the naive
/// transform with a precomputed cosine table is plenty fast.
fn dct_2d(input: &[f64], n: usize) -> Vec<f64> {
    let mut table = vec![0.0f64; n * n];
    for k in 0..n {
        for i in 0..n {
            table[k * n + i] = (PI / n as f64 * (i as f64 + 0.5) * k as f64).cos();
        }
    }

    // rows
    let mut rows = vec![0.0f64; n * n];
    for y in 0..n {
        for k in 0..n {
            let mut sum = 0.0;
            for x in 0..n {
                sum += input[y * n + x] * table[k * n + x];
            }
            rows[y * n + k] = sum;
        }
    }

    // columns
    let mut out = vec![0.0f64; n * n];
    for x in 0..n {
        for k in 0..n {
            let mut sum = 0.0;
            for y in 0..n {
                sum += rows[y * n + x] * table[k * n + y];
            }
            out[k * n + x] = sum;
        }
    }
    out
}

/// wHash: 64x64 luma grid, three 2-D Haar analysis levels down to the 8x8
/// approximation band, bit per coefficient above the band median.
fn wavelet_hash(image: &RgbImage) -> u64 {
    let scale = (HASH_SIZE * 8) as usize;
    let mut band = luma_grid(image, scale as u32, scale as u32);
    let mut size = scale;
    while size > HASH_SIZE as usize {
        size = haar_level(&mut band, size);
    }

    let med = median(&band);
    let mut bits = 0u64;
    for (i, &v) in band.iter().enumerate() {
        if v > med {
            bits |= 1 << i;
        }
    }
    bits
}

/// One 2-D Haar analysis step. Only the LL (approximation) band is kept;
/// the detail bands never feed the hash.
fn haar_level(band: &mut Vec<f64>, size: usize) -> usize {
    let half = size / 2;
    let mut next = vec![0.0f64; half * half];
    for y in 0..half {
        for x in 0..half {
            let a = band[(2 * y) * size + 2 * x];
            let b = band[(2 * y) * size + 2 * x + 1];
            let c = band[(2 * y + 1) * size + 2 * x];
            let d = band[(2 * y + 1) * size + 2 * x + 1];
            // two orthonormal 1-D steps: ((a+b) + (c+d)) / sqrt(2)^2
            next[y * half + x] = (a + b + c + d) / 2.0;
        }
    }
    *band = next;
    half
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, _| {
            let v = (x * 255 / w.max(1)) as u8;
            image::Rgb([v, v, v])
        })
    }

    fn checkerboard_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn test_codes_are_fixed_length_hex() {
        let prints = StandardFingerprinter.compute(&gradient_image(64, 64)).unwrap();
        for (_, code) in prints.iter() {
            assert_eq!(code.len(), 16);
            assert!(code.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_compute_is_deterministic() {
        let img = checkerboard_image(64, 64);
        let a = StandardFingerprinter.compute(&img).unwrap();
        let b = StandardFingerprinter.compute(&img).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identical_images_identical_codes() {
        let a = StandardFingerprinter.compute(&gradient_image(100, 80)).unwrap();
        let b = StandardFingerprinter.compute(&gradient_image(100, 80)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_images_differ() {
        let a = StandardFingerprinter.compute(&gradient_image(64, 64)).unwrap();
        let b = StandardFingerprinter.compute(&checkerboard_image(64, 64)).unwrap();
        assert_ne!(a.ahash, b.ahash);
        assert_ne!(a.dhash, b.dhash);
    }

    /// Smooth upscale of a fixed 8x8 texture; rich low-frequency spectrum,
    /// so every algorithm sees well-separated coefficients.
    fn textured_image(w: u32, h: u32) -> RgbImage {
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let base = RgbImage::from_fn(8, 8, |_, _| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let v = (state >> 56) as u8;
            image::Rgb([v, v, v])
        });
        imageops::resize(&base, w, h, FilterType::Triangle)
    }

    #[test]
    fn test_resize_keeps_codes_close() {
        let a = StandardFingerprinter.compute(&textured_image(200, 200)).unwrap();
        let b = StandardFingerprinter.compute(&textured_image(260, 260)).unwrap();
        for (alg, code) in a.iter() {
            let d = hamming_distance(code, b.code(alg));
            assert!(d <= 10, "{alg} drifted by {d} bits across a resize");
        }
    }

    #[test]
    fn test_zero_dimension_image_rejected() {
        let img = RgbImage::new(0, 0);
        assert!(matches!(
            StandardFingerprinter.compute(&img),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_hamming_distance_identity_and_symmetry() {
        assert_eq!(hamming_distance("00000000000000ff", "00000000000000ff"), 0);
        assert_eq!(hamming_distance("0000000000000000", "00000000000000ff"), 8);
        assert_eq!(
            hamming_distance("abcdef0123456789", "0000000000000000"),
            hamming_distance("0000000000000000", "abcdef0123456789")
        );
    }

    #[test]
    fn test_hamming_distance_length_mismatch_is_sentinel() {
        assert_eq!(hamming_distance("abcd", "abcdef0123456789"), MAX_DISTANCE);
        assert_eq!(hamming_distance("", "00"), MAX_DISTANCE);
    }

    #[test]
    fn test_hamming_distance_bad_hex_is_sentinel() {
        assert_eq!(hamming_distance("zzzzzzzzzzzzzzzz", "0000000000000000"), MAX_DISTANCE);
        assert_eq!(hamming_distance("0000000000000000", "zzzzzzzzzzzzzzzz"), MAX_DISTANCE);
    }

    #[test]
    fn test_algorithm_wire_names() {
        assert_eq!(serde_json::to_string(&Algorithm::Average).unwrap(), "\"ahash\"");
        assert_eq!(serde_json::to_string(&Algorithm::Wavelet).unwrap(), "\"whash\"");
        assert_eq!(Algorithm::Difference.to_string(), "dhash");
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
