//! 64-bit perceptual hashing.
//!
//! DCT-based pHash: downscale to 32x32 grayscale, take the 2D DCT, keep the
//! 8x8 low-frequency block, and emit one bit per coefficient against the
//! block mean (DC term excluded). Small visual changes move few bits, so
//! Hamming distance is a similarity measure.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Downscale edge length fed to the DCT.
const HASH_INPUT_SIZE: u32 = 32;

/// Low-frequency block edge length kept from the DCT.
const HASH_BLOCK_SIZE: usize = 8;

/// A 64-bit perceptual hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    /// Hash an image.
    pub fn of_image(image: &DynamicImage) -> Self {
        let small = image
            .resize_exact(HASH_INPUT_SIZE, HASH_INPUT_SIZE, FilterType::Triangle)
            .to_luma8();

        let n = HASH_INPUT_SIZE as usize;
        let mut pixels = vec![0.0f64; n * n];
        for (x, y, pixel) in small.enumerate_pixels() {
            pixels[y as usize * n + x as usize] = pixel.0[0] as f64;
        }

        let dct = dct_2d(&pixels, n);

        // Mean over the low-frequency block, skipping the DC coefficient.
        let mut sum = 0.0;
        for v in 0..HASH_BLOCK_SIZE {
            for u in 0..HASH_BLOCK_SIZE {
                if u == 0 && v == 0 {
                    continue;
                }
                sum += dct[v * n + u];
            }
        }
        let mean = sum / (HASH_BLOCK_SIZE * HASH_BLOCK_SIZE - 1) as f64;

        let mut bits = 0u64;
        let mut index = 0;
        for v in 0..HASH_BLOCK_SIZE {
            for u in 0..HASH_BLOCK_SIZE {
                if dct[v * n + u] > mean {
                    bits |= 1 << index;
                }
                index += 1;
            }
        }
        PerceptualHash(bits)
    }

    /// Number of differing bits between two hashes.
    pub fn hamming_distance(&self, other: &PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Similarity in [0, 1]: `1 - distance / 64`.
    pub fn similarity(&self, other: &PerceptualHash) -> f64 {
        1.0 - self.hamming_distance(other) as f64 / 64.0
    }

    /// Parse from a 16-digit hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        u64::from_str_radix(hex.trim(), 16).ok().map(Self)
    }
}

impl std::fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Separable 2D DCT-II: rows, then columns.
fn dct_2d(pixels: &[f64], n: usize) -> Vec<f64> {
    let mut rows = vec![0.0f64; n * n];
    for y in 0..n {
        for u in 0..n {
            let mut sum = 0.0;
            for x in 0..n {
                sum += pixels[y * n + x]
                    * ((2 * x + 1) as f64 * u as f64 * PI / (2.0 * n as f64)).cos();
            }
            rows[y * n + u] = sum;
        }
    }

    let mut out = vec![0.0f64; n * n];
    for u in 0..n {
        for v in 0..n {
            let mut sum = 0.0;
            for y in 0..n {
                sum += rows[y * n + u]
                    * ((2 * y + 1) as f64 * v as f64 * PI / (2.0 * n as f64)).cos();
            }
            out[v * n + u] = sum;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient_image(seed: u8) -> DynamicImage {
        let mut rgb = RgbImage::new(64, 64);
        for (x, y, pixel) in rgb.enumerate_pixels_mut() {
            // Stays under 255, so a brightness seed only shifts the DC term.
            let v = (x * 2 + y) as u8 + seed;
            *pixel = Rgb([v, v, v]);
        }
        DynamicImage::ImageRgb8(rgb)
    }

    #[test]
    fn test_hash_is_deterministic() {
        let image = gradient_image(0);
        assert_eq!(PerceptualHash::of_image(&image), PerceptualHash::of_image(&image));
    }

    #[test]
    fn test_similar_images_have_close_hashes() {
        let a = PerceptualHash::of_image(&gradient_image(0));
        let b = PerceptualHash::of_image(&gradient_image(2));
        assert!(a.hamming_distance(&b) <= 8, "distance {}", a.hamming_distance(&b));
    }

    #[test]
    fn test_different_images_have_distant_hashes() {
        let gradient = PerceptualHash::of_image(&gradient_image(0));

        let mut rgb = RgbImage::new(64, 64);
        for (x, y, pixel) in rgb.enumerate_pixels_mut() {
            let v = if (x / 8 + y / 8) % 2 == 0 { 255 } else { 0 };
            *pixel = Rgb([v, v, v]);
        }
        let checker = PerceptualHash::of_image(&DynamicImage::ImageRgb8(rgb));

        assert!(gradient.hamming_distance(&checker) > 10);
    }

    #[test]
    fn test_similarity_bounds() {
        let a = PerceptualHash(0);
        let b = PerceptualHash(u64::MAX);
        assert_eq!(a.similarity(&a), 1.0);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = PerceptualHash(0xdead_beef_cafe_f00d);
        let parsed = PerceptualHash::from_hex(&hash.to_string()).unwrap();
        assert_eq!(hash, parsed);
        assert!(PerceptualHash::from_hex("not hex").is_none());
    }
}
