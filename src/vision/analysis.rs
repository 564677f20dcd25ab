//! Local pixel and typography analyses over the cropped card image.

use image::{GrayImage, RgbImage};

use super::envelope::{BorderMetrics, FontMetrics, ImageQuality, OcrBlock, OcrBlockType};

/// Thickness of each border band as a fraction of the image dimension.
const BORDER_BAND_FRACTION: f64 = 0.05;

/// Pixel sampling stride for the statistical analyses.
const SAMPLE_STRIDE: u32 = 5;

/// Brightness level above which a sampled pixel counts as glare.
const GLARE_LEVEL: u8 = 240;

/// Fraction of glare pixels that flags the image.
const GLARE_FRACTION: f64 = 0.15;

/// Average brightness of the four 5%-thick border bands plus symmetry.
pub fn border_metrics(image: &GrayImage) -> BorderMetrics {
    let (width, height) = image.dimensions();
    let band_h = ((height as f64 * BORDER_BAND_FRACTION).ceil() as u32).max(1);
    let band_w = ((width as f64 * BORDER_BAND_FRACTION).ceil() as u32).max(1);

    let mean = |x0: u32, y0: u32, x1: u32, y1: u32| -> f64 {
        let mut sum = 0u64;
        let mut count = 0u64;
        for y in y0..y1.min(height) {
            for x in x0..x1.min(width) {
                sum += image.get_pixel(x, y).0[0] as u64;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64 / 255.0
        }
    };

    let top = mean(0, 0, width, band_h);
    let bottom = mean(0, height.saturating_sub(band_h), width, height);
    let left = mean(0, 0, band_w, height);
    let right = mean(width.saturating_sub(band_w), 0, width, height);

    let symmetry_score =
        (1.0 - ((top - bottom).abs() + (left - right).abs()) / 2.0).clamp(0.0, 1.0);

    BorderMetrics {
        top,
        bottom,
        left,
        right,
        symmetry_score,
    }
}

/// RGB variance proxy for holographic foil.
///
/// Zero when no reflective label was detected. Otherwise samples the central
/// 50% of pixels at the stride, averages the per-channel variances, and
/// clips `avg / 10000` to [0, 1].
pub fn holo_variance(image: &RgbImage, reflective_label_present: bool) -> f64 {
    if !reflective_label_present {
        return 0.0;
    }

    let (width, height) = image.dimensions();
    let x0 = width / 4;
    let x1 = width - width / 4;
    let y0 = height / 4;
    let y1 = height - height / 4;

    let mut sums = [0.0f64; 3];
    let mut sq_sums = [0.0f64; 3];
    let mut count = 0u64;

    let mut y = y0;
    while y < y1 {
        let mut x = x0;
        while x < x1 {
            let pixel = image.get_pixel(x, y).0;
            for c in 0..3 {
                let v = pixel[c] as f64;
                sums[c] += v;
                sq_sums[c] += v * v;
            }
            count += 1;
            x += SAMPLE_STRIDE;
        }
        y += SAMPLE_STRIDE;
    }

    if count == 0 {
        return 0.0;
    }

    let n = count as f64;
    let avg_variance = (0..3)
        .map(|c| {
            let mean = sums[c] / n;
            (sq_sums[c] / n - mean * mean).max(0.0)
        })
        .sum::<f64>()
        / 3.0;

    (avg_variance / 10_000.0).min(1.0)
}

/// Typography signals derived from the OCR blocks.
pub fn font_metrics(blocks: &[OcrBlock]) -> FontMetrics {
    let words: Vec<&OcrBlock> = blocks
        .iter()
        .filter(|b| b.block_type == OcrBlockType::Word)
        .collect();

    // Inter-word kerning: horizontal gap between consecutive words on the
    // same visual row.
    let mut kerning = Vec::new();
    for pair in words.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let same_row = (a.bbox.center_y() - b.bbox.center_y()).abs() < a.bbox.height.max(0.01);
        if same_row {
            let gap = b.bbox.left - (a.bbox.left + a.bbox.width);
            if gap >= 0.0 {
                kerning.push(gap);
            }
        }
    }

    let lines: Vec<&OcrBlock> = blocks
        .iter()
        .filter(|b| b.block_type == OcrBlockType::Line)
        .collect();

    let alignment_score = if lines.len() < 2 {
        1.0
    } else {
        let lefts: Vec<f64> = lines.iter().map(|l| l.bbox.left).collect();
        let rights: Vec<f64> = lines.iter().map(|l| l.bbox.left + l.bbox.width).collect();
        let edge_variance = (variance(&lefts) + variance(&rights)) / 2.0;
        (1.0 - edge_variance * 100.0).max(0.0)
    };

    let heights: Vec<f64> = lines.iter().map(|l| l.bbox.height).collect();
    let size_variance = variance(&heights);

    FontMetrics {
        kerning,
        alignment_score,
        size_variance,
    }
}

/// Blur, glare, and brightness over the sampled grayscale frame.
pub fn image_quality(image: &GrayImage) -> ImageQuality {
    let (width, height) = image.dimensions();
    let mut sum = 0.0f64;
    let mut sq_sum = 0.0f64;
    let mut glare = 0u64;
    let mut count = 0u64;

    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            let v = image.get_pixel(x, y).0[0];
            sum += v as f64;
            sq_sum += (v as f64) * (v as f64);
            if v > GLARE_LEVEL {
                glare += 1;
            }
            count += 1;
            x += SAMPLE_STRIDE;
        }
        y += SAMPLE_STRIDE;
    }

    if count == 0 {
        return ImageQuality {
            blur_score: 0.0,
            glare_detected: false,
            brightness: 0.0,
        };
    }

    let n = count as f64;
    let mean = sum / n;
    let std_dev = (sq_sum / n - mean * mean).max(0.0).sqrt();

    ImageQuality {
        blur_score: (std_dev / 100.0).min(1.0),
        glare_detected: glare as f64 / n > GLARE_FRACTION,
        brightness: mean / 255.0,
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::envelope::BoundingBox;
    use image::{Luma, Rgb};

    fn bbox(left: f64, top: f64, width: f64, height: f64) -> BoundingBox {
        BoundingBox {
            left,
            top,
            width,
            height,
        }
    }

    #[test]
    fn test_border_symmetry_on_uniform_image() {
        let image = GrayImage::from_pixel(100, 140, Luma([128u8]));
        let borders = border_metrics(&image);

        assert!((borders.top - 128.0 / 255.0).abs() < 0.01);
        assert!((borders.symmetry_score - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_border_asymmetry_lowers_score() {
        let mut image = GrayImage::from_pixel(100, 140, Luma([128u8]));
        for y in 0..7 {
            for x in 0..100 {
                image.put_pixel(x, y, Luma([255u8]));
            }
        }
        let borders = border_metrics(&image);
        assert!(borders.top > borders.bottom);
        assert!(borders.symmetry_score < 1.0);
    }

    #[test]
    fn test_holo_variance_zero_without_reflective_label() {
        let mut image = RgbImage::new(100, 100);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 2) as u8, (y * 2) as u8, ((x + y) % 255) as u8]);
        }
        assert_eq!(holo_variance(&image, false), 0.0);
        assert!(holo_variance(&image, true) > 0.0);
    }

    #[test]
    fn test_holo_variance_flat_foil_is_low() {
        let image = RgbImage::from_pixel(100, 100, Rgb([120, 120, 120]));
        assert_eq!(holo_variance(&image, true), 0.0);
    }

    #[test]
    fn test_font_metrics_aligned_lines_score_high() {
        let blocks = vec![
            OcrBlock::line("Charizard", 0.95, bbox(0.10, 0.05, 0.60, 0.05)),
            OcrBlock::line("Fire Spin", 0.93, bbox(0.10, 0.50, 0.60, 0.05)),
            OcrBlock::line("Weakness", 0.91, bbox(0.10, 0.80, 0.60, 0.05)),
        ];
        let fonts = font_metrics(&blocks);
        assert!(fonts.alignment_score > 0.95);
        assert!(fonts.size_variance < 0.001);
    }

    #[test]
    fn test_font_metrics_kerning_same_row_only() {
        let blocks = vec![
            OcrBlock::word("Fire", 0.9, bbox(0.10, 0.50, 0.10, 0.05)),
            OcrBlock::word("Spin", 0.9, bbox(0.25, 0.50, 0.10, 0.05)),
            OcrBlock::word("Weakness", 0.9, bbox(0.10, 0.80, 0.15, 0.05)),
        ];
        let fonts = font_metrics(&blocks);
        assert_eq!(fonts.kerning.len(), 1);
        assert!((fonts.kerning[0] - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_image_quality_flat_image_is_blurry() {
        let image = GrayImage::from_pixel(100, 100, Luma([128u8]));
        let quality = image_quality(&image);

        assert_eq!(quality.blur_score, 0.0);
        assert!(!quality.glare_detected);
        assert!((quality.brightness - 128.0 / 255.0).abs() < 0.01);
    }

    #[test]
    fn test_image_quality_glare_detection() {
        let mut image = GrayImage::from_pixel(100, 100, Luma([128u8]));
        // Brighten the top 20 rows past the glare level.
        for y in 0..20 {
            for x in 0..100 {
                image.put_pixel(x, y, Luma([250u8]));
            }
        }
        let quality = image_quality(&image);
        assert!(quality.glare_detected);
    }
}
