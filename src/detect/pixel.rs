//! Per-pixel colour conversions.
//!
//! Values follow the 8-bit conventions camera tuning tools use: hue in
//! `0..180` (degrees halved), saturation and value in `0..=255`, and
//! grayscale with BT.601 weights. Thresholds tuned against those tools can
//! be carried over unchanged.

use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::Deserialize;

/// 8-bit HSV triple: `[h (0..180), s, v]`.
pub type Hsv = [u8; 3];

pub fn rgb_to_hsv(Rgb([r, g, b]): Rgb<u8>) -> Hsv {
    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = v - min;

    let s = if v > 0.0 { delta * 255.0 / v } else { 0.0 };

    let mut h = if delta == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / delta
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    let h8 = (h / 2.0).round();
    // 359.x degrees rounds to 180, which wraps to red.
    let h8 = if h8 >= 180.0 { 0.0 } else { h8 };
    [h8 as u8, s.round() as u8, v as u8]
}

/// Inclusive HSV box, bounds compared per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct HsvRange {
    pub lower: Hsv,
    pub upper: Hsv,
}

impl HsvRange {
    /// Default range for dark blue stickers on a light background.
    pub const DARK_BLUE: HsvRange = HsvRange {
        lower: [85, 50, 70],
        upper: [110, 255, 255],
    };

    pub fn contains(&self, hsv: Hsv) -> bool {
        (0..3).all(|c| self.lower[c] <= hsv[c] && hsv[c] <= self.upper[c])
    }

    pub fn matches(&self, pixel: Rgb<u8>) -> bool {
        self.contains(rgb_to_hsv(pixel))
    }

    pub fn is_well_formed(&self) -> bool {
        (0..3).all(|c| self.lower[c] <= self.upper[c]) && self.upper[0] < 180
    }

    /// Binary mask: 255 where the pixel is inside the range, 0 elsewhere.
    pub fn mask(&self, image: &RgbImage) -> GrayImage {
        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            if self.matches(*image.get_pixel(x, y)) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }
}

impl Default for HsvRange {
    fn default() -> Self {
        Self::DARK_BLUE
    }
}

/// BT.601 luma, rounded: `0.299 R + 0.587 G + 0.114 B`.
pub fn luma(Rgb([r, g, b]): Rgb<u8>) -> u8 {
    let y = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
    y.round().clamp(0.0, 255.0) as u8
}

pub fn to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([luma(*image.get_pixel(x, y))])
    })
}
