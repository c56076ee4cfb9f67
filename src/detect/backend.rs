use anyhow::Result;
use image::RgbImage;
use serde::Deserialize;
use std::str::FromStr;

/// Marker occlusion detector.
///
/// Implementations are built once at startup (zone discovery or baseline
/// capture) and then evaluated once per poll tick on the detection region.
pub trait OcclusionDetector: Send {
    /// Detector identifier for logs.
    fn name(&self) -> &'static str;

    /// Returns `Ok(true)` when the markers are visible, `Ok(false)` when they
    /// are occluded.
    ///
    /// An `Err` means this image carries no usable signal (for example a size
    /// that does not match the startup image). Callers skip the tick; an error
    /// is never to be read as "occluded".
    fn evaluate(&self, detection_image: &RgbImage) -> Result<bool>;
}

/// Detection algorithm selected for a deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum DetectorKind {
    /// Per-zone colour ratio against a fixed threshold.
    #[serde(rename = "color", alias = "color-threshold")]
    ColorThreshold,
    /// Grayscale difference against a startup baseline.
    #[serde(rename = "diff", alias = "reference-diff")]
    ReferenceDiff,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::ColorThreshold => "color",
            DetectorKind::ReferenceDiff => "diff",
        }
    }
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "color" | "color-threshold" => Ok(DetectorKind::ColorThreshold),
            "diff" | "reference-diff" => Ok(DetectorKind::ReferenceDiff),
            other => Err(anyhow::anyhow!(
                "unknown detector '{}'; expected 'color' or 'diff'",
                other
            )),
        }
    }
}
