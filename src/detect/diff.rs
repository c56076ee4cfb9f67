use anyhow::{anyhow, Result};
use image::{GrayImage, RgbImage};
use serde::Deserialize;

use super::backend::OcclusionDetector;
use super::pixel::to_gray;
use crate::FatalConfigError;

/// Tuning for the reference-difference detector.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiffParams {
    /// A pixel counts as changed when its grayscale difference exceeds this.
    pub pixel_threshold: u8,
    /// Visible while the changed fraction stays strictly below this.
    pub max_changed_ratio: f32,
}

impl Default for DiffParams {
    fn default() -> Self {
        Self {
            pixel_threshold: 30,
            max_changed_ratio: 0.02,
        }
    }
}

/// Marker detector comparing each detection image to a baseline captured at startup.
///
/// "Visible" means unchanged from the baseline; anything covering the markers
/// shows up as changed pixels.
pub struct ReferenceDiff {
    params: DiffParams,
    baseline: GrayImage,
}

impl ReferenceDiff {
    pub fn new(reference: &RgbImage, params: DiffParams) -> Result<Self> {
        if reference.width() == 0 || reference.height() == 0 {
            return Err(
                FatalConfigError::reference_frame("reference detection image is empty").into(),
            );
        }
        Ok(Self {
            params,
            baseline: to_gray(reference),
        })
    }

    /// Fraction of pixels whose grayscale difference to the baseline exceeds the threshold.
    pub fn changed_ratio(&self, image: &RgbImage) -> Result<f32> {
        if image.dimensions() != self.baseline.dimensions() {
            return Err(anyhow!(
                "detection image is {:?}, baseline is {:?}",
                image.dimensions(),
                self.baseline.dimensions()
            ));
        }
        let current = to_gray(image);
        let changed = current
            .pixels()
            .zip(self.baseline.pixels())
            .filter(|(a, b)| a[0].abs_diff(b[0]) > self.params.pixel_threshold)
            .count();
        let total = u64::from(self.baseline.width()) * u64::from(self.baseline.height());
        Ok((changed as f64 / total as f64) as f32)
    }
}

impl OcclusionDetector for ReferenceDiff {
    fn name(&self) -> &'static str {
        "reference-diff"
    }

    fn evaluate(&self, detection_image: &RgbImage) -> Result<bool> {
        let ratio = self.changed_ratio(detection_image)?;
        log::debug!("changed ratio {:.4}", ratio);
        Ok(ratio < self.params.max_changed_ratio)
    }
}
