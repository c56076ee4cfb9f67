mod backend;
mod color;
mod diff;
pub mod pixel;

use anyhow::Result;
use image::RgbImage;

pub use backend::{DetectorKind, OcclusionDetector};
pub use color::{discover_zones, ColorParams, ColorThreshold};
pub use diff::{DiffParams, ReferenceDiff};
pub use pixel::HsvRange;

/// Build the configured detector from the detection region of the first frame.
///
/// Errors here are fatal configuration errors: the detector cannot operate.
pub fn build_detector(
    kind: DetectorKind,
    color: &ColorParams,
    diff: &DiffParams,
    reference: &RgbImage,
) -> Result<Box<dyn OcclusionDetector>> {
    match kind {
        DetectorKind::ColorThreshold => {
            let detector = ColorThreshold::discover(reference, color.clone())?;
            log::info!("marker zones discovered: {:?}", detector.zones());
            Ok(Box::new(detector))
        }
        DetectorKind::ReferenceDiff => {
            let detector = ReferenceDiff::new(reference, diff.clone())?;
            log::info!(
                "reference baseline captured ({}x{})",
                reference.width(),
                reference.height()
            );
            Ok(Box::new(detector))
        }
    }
}
