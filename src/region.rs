//! Fractional sub-rectangles of a camera frame.
//!
//! A deployment describes its detection and upload areas as fractions of the
//! frame so the same configuration survives a camera resolution change. The
//! fractions are resolved to pixel coordinates against each frame, truncating
//! toward zero the same way integer slicing of the frame would.

use anyhow::Result;
use image::{imageops, RgbImage};
use serde::Deserialize;

use crate::FatalConfigError;

/// Rectangle expressed as fractions of frame width/height.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True when the rectangle lies inside a `width` x `height` image.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }

    pub fn crop(&self, image: &RgbImage) -> RgbImage {
        imageops::crop_imm(image, self.x, self.y, self.width, self.height).to_image()
    }
}

impl Region {
    /// Build a region from the `[start, end)` fractional spans used by the
    /// deployment presets.
    pub fn from_spans(x0: f32, x1: f32, y0: f32, y1: f32) -> Self {
        Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    /// Check that the fractions describe a non-empty area inside the unit square.
    pub fn validate_fractions(&self) -> Result<()> {
        let in_unit = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_unit(self.x) || !in_unit(self.y) {
            return Err(FatalConfigError::region(format!(
                "region origin ({}, {}) outside [0, 1]",
                self.x, self.y
            ))
            .into());
        }
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(FatalConfigError::region(format!(
                "region extent {}x{} must be positive",
                self.width, self.height
            ))
            .into());
        }
        // Small tolerance so spans like 0.3..1.0 are not rejected by float rounding.
        if self.x + self.width > 1.0 + 1e-6 || self.y + self.height > 1.0 + 1e-6 {
            return Err(FatalConfigError::region(format!(
                "region ({}, {}, {}, {}) extends past the frame",
                self.x, self.y, self.width, self.height
            ))
            .into());
        }
        Ok(())
    }

    /// Resolve to pixels: `[floor(x0 * w), floor(x1 * w))` on each axis.
    pub fn resolve(&self, frame_width: u32, frame_height: u32) -> PixelRect {
        let fw = f64::from(frame_width);
        let fh = f64::from(frame_height);
        let x0 = scale(self.x, fw, frame_width);
        let y0 = scale(self.y, fh, frame_height);
        let x1 = scale(self.x + self.width, fw, frame_width);
        let y1 = scale(self.y + self.height, fh, frame_height);
        PixelRect {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }

    /// Resolve against a frame size and fail with `FATAL_REGION` if the
    /// result is empty or leaves the frame.
    pub fn resolve_checked(&self, frame_width: u32, frame_height: u32) -> Result<PixelRect> {
        let rect = self.resolve(frame_width, frame_height);
        if !rect.fits(frame_width, frame_height) {
            return Err(FatalConfigError::region(format!(
                "region {:?} resolves to {:?}, invalid for a {}x{} frame",
                self, rect, frame_width, frame_height
            ))
            .into());
        }
        Ok(rect)
    }
}

fn scale(fraction: f32, dim: f64, max: u32) -> u32 {
    let px = (f64::from(fraction) * dim).floor();
    if px <= 0.0 {
        0
    } else {
        (px as u32).min(max)
    }
}
