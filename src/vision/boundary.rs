//! Card-boundary detection via Sobel gradient thresholding.
//!
//! Finds the axis-aligned bounding box of strong edges and pads it by 5%
//! per side. Detection failures are warnings, never errors: the caller
//! falls back to the full frame.

use image::GrayImage;

/// Gradient magnitude threshold on 0-255 grayscale.
const EDGE_MAGNITUDE_THRESHOLD: f64 = 30.0;

/// Acceptable fraction of edge pixels over the whole frame.
const EDGE_DENSITY_RANGE: (f64, f64) = (0.01, 0.50);

/// Acceptable width/height ratio for a card-shaped box.
const ASPECT_RANGE: (f64, f64) = (0.5, 1.0);

/// Typical width/height ratio band; outside it a warning is attached.
const ASPECT_TYPICAL: (f64, f64) = (0.65, 0.80);

/// Fraction of the detected box added as padding on each side.
const PADDING_FRACTION: f64 = 0.05;

/// Result of boundary detection.
#[derive(Debug, Clone, PartialEq)]
pub struct CardBoundary {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// False when detection was rejected and the full frame is used.
    pub detected: bool,
    /// Attached when the box was accepted outside the typical aspect band.
    pub warning: Option<String>,
}

impl CardBoundary {
    fn full_frame(image: &GrayImage) -> Self {
        Self {
            x: 0,
            y: 0,
            width: image.width(),
            height: image.height(),
            detected: false,
            warning: None,
        }
    }
}

/// Locate the card inside the frame.
pub fn detect_card_boundary(image: &GrayImage) -> CardBoundary {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return CardBoundary::full_frame(image);
    }

    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut edge_count = 0u64;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let magnitude = sobel_magnitude(image, x, y);
            if magnitude >= EDGE_MAGNITUDE_THRESHOLD {
                edge_count += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
    }

    if edge_count == 0 {
        return CardBoundary::full_frame(image);
    }

    let density = edge_count as f64 / (width as f64 * height as f64);
    if !(EDGE_DENSITY_RANGE.0..=EDGE_DENSITY_RANGE.1).contains(&density) {
        tracing::debug!(density, "edge density outside acceptance range, using full frame");
        return CardBoundary::full_frame(image);
    }

    let box_width = (max_x - min_x + 1) as f64;
    let box_height = (max_y - min_y + 1) as f64;
    let aspect = box_width / box_height;
    if !(ASPECT_RANGE.0..=ASPECT_RANGE.1).contains(&aspect) {
        tracing::debug!(aspect, "aspect ratio outside acceptance range, using full frame");
        return CardBoundary::full_frame(image);
    }

    let warning = if !(ASPECT_TYPICAL.0..=ASPECT_TYPICAL.1).contains(&aspect) {
        Some(format!(
            "aspect ratio {:.2} outside typical card band [{:.2}, {:.2}]",
            aspect, ASPECT_TYPICAL.0, ASPECT_TYPICAL.1
        ))
    } else {
        None
    };

    let pad_x = (box_width * PADDING_FRACTION).round() as u32;
    let pad_y = (box_height * PADDING_FRACTION).round() as u32;

    let x = min_x.saturating_sub(pad_x);
    let y = min_y.saturating_sub(pad_y);
    let right = (max_x + pad_x).min(width - 1);
    let bottom = (max_y + pad_y).min(height - 1);

    CardBoundary {
        x,
        y,
        width: right - x + 1,
        height: bottom - y + 1,
        detected: true,
        warning,
    }
}

fn sobel_magnitude(image: &GrayImage, x: u32, y: u32) -> f64 {
    let p = |dx: i32, dy: i32| -> f64 {
        let px = (x as i32 + dx) as u32;
        let py = (y as i32 + dy) as u32;
        image.get_pixel(px, py).0[0] as f64
    };

    let gx = -p(-1, -1) - 2.0 * p(-1, 0) - p(-1, 1) + p(1, -1) + 2.0 * p(1, 0) + p(1, 1);
    let gy = -p(-1, -1) - 2.0 * p(0, -1) - p(1, -1) + p(-1, 1) + 2.0 * p(0, 1) + p(1, 1);
    (gx * gx + gy * gy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// A dark card-shaped rectangle on a light background.
    fn synthetic_card(width: u32, height: u32, card_w: u32, card_h: u32) -> GrayImage {
        let mut image = GrayImage::from_pixel(width, height, Luma([230u8]));
        let x0 = (width - card_w) / 2;
        let y0 = (height - card_h) / 2;
        for y in y0..y0 + card_h {
            for x in x0..x0 + card_w {
                image.put_pixel(x, y, Luma([40u8]));
            }
        }
        image
    }

    #[test]
    fn test_detects_card_shaped_rectangle() {
        let image = synthetic_card(200, 200, 100, 140);
        let boundary = detect_card_boundary(&image);

        assert!(boundary.detected);
        // 5% padding on each side of the detected edges.
        assert!(boundary.width >= 100);
        assert!(boundary.height >= 140);
        assert!(boundary.warning.is_none());
    }

    #[test]
    fn test_uniform_image_falls_back_to_full_frame() {
        let image = GrayImage::from_pixel(100, 100, Luma([128u8]));
        let boundary = detect_card_boundary(&image);

        assert!(!boundary.detected);
        assert_eq!((boundary.width, boundary.height), (100, 100));
    }

    #[test]
    fn test_wide_box_rejected_by_aspect() {
        // A wide, landscape-shaped blob is not card-shaped.
        let image = synthetic_card(300, 200, 240, 60);
        let boundary = detect_card_boundary(&image);
        assert!(!boundary.detected);
    }

    #[test]
    fn test_atypical_aspect_accepted_with_warning() {
        // Square-ish box: inside [0.5, 1.0] but outside [0.65, 0.80].
        let image = synthetic_card(300, 300, 140, 150);
        let boundary = detect_card_boundary(&image);

        assert!(boundary.detected);
        assert!(boundary.warning.is_some());
    }

    #[test]
    fn test_tiny_image_uses_full_frame() {
        let image = GrayImage::from_pixel(2, 2, Luma([0u8]));
        let boundary = detect_card_boundary(&image);
        assert!(!boundary.detected);
    }
}
