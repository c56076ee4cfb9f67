use anyhow::{anyhow, Result};
use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::Deserialize;

use super::backend::OcclusionDetector;
use super::pixel::HsvRange;
use crate::region::PixelRect;
use crate::FatalConfigError;

/// Tuning for the colour-threshold detector.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ColorParams {
    pub range: HsvRange,
    /// A zone is visible when strictly more than this fraction of its pixels match.
    pub min_ratio: f32,
    /// Discovered blobs need a bounding box strictly larger than this (px²).
    pub min_zone_area: u64,
    pub zone_count: usize,
}

impl Default for ColorParams {
    fn default() -> Self {
        Self {
            range: HsvRange::DARK_BLUE,
            min_ratio: 0.02,
            min_zone_area: 200,
            zone_count: 3,
        }
    }
}

/// Marker detector comparing per-zone colour ratios against a fixed threshold.
///
/// Zones are discovered once from a reference detection image; afterwards
/// every zone must still show enough marker colour for the result to be
/// "visible". One covered sticker is enough to report hidden.
pub struct ColorThreshold {
    params: ColorParams,
    zones: Vec<PixelRect>,
    image_size: (u32, u32),
}

impl ColorThreshold {
    /// Discover the marker zones on `reference` and build the detector.
    pub fn discover(reference: &RgbImage, params: ColorParams) -> Result<Self> {
        let zones = discover_zones(reference, &params)?;
        Self::with_zones(zones, reference.dimensions(), params)
    }

    /// Build from known zones for a detection image of `image_size`.
    ///
    /// Zones beyond `params.zone_count` are dropped, keeping the first ones.
    pub fn with_zones(
        mut zones: Vec<PixelRect>,
        image_size: (u32, u32),
        params: ColorParams,
    ) -> Result<Self> {
        if zones.len() < params.zone_count {
            return Err(FatalConfigError::marker_zones(format!(
                "need {} marker zones, got {}",
                params.zone_count,
                zones.len()
            ))
            .into());
        }
        zones.truncate(params.zone_count);
        if let Some(zone) = zones
            .iter()
            .find(|zone| !zone.fits(image_size.0, image_size.1))
        {
            return Err(FatalConfigError::region(format!(
                "marker zone {:?} outside {}x{} detection image",
                zone, image_size.0, image_size.1
            ))
            .into());
        }
        Ok(Self {
            params,
            zones,
            image_size,
        })
    }

    pub fn zones(&self) -> &[PixelRect] {
        &self.zones
    }

    /// Fraction of `zone` pixels inside the marker colour range.
    pub fn zone_ratio(&self, image: &RgbImage, zone: &PixelRect) -> f32 {
        let mut matched = 0u64;
        for y in zone.y..zone.y + zone.height {
            for x in zone.x..zone.x + zone.width {
                if self.params.range.matches(*image.get_pixel(x, y)) {
                    matched += 1;
                }
            }
        }
        (matched as f64 / zone.area() as f64) as f32
    }
}

impl OcclusionDetector for ColorThreshold {
    fn name(&self) -> &'static str {
        "color-threshold"
    }

    fn evaluate(&self, detection_image: &RgbImage) -> Result<bool> {
        if detection_image.dimensions() != self.image_size {
            return Err(anyhow!(
                "detection image is {:?}, zones were discovered on {:?}",
                detection_image.dimensions(),
                self.image_size
            ));
        }
        for (idx, zone) in self.zones.iter().enumerate() {
            let ratio = self.zone_ratio(detection_image, zone);
            log::debug!("zone {} marker ratio {:.4}", idx, ratio);
            if ratio <= self.params.min_ratio {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Find the largest blobs of marker colour on a detection image.
///
/// Blobs are 8-connected regions of the colour mask, measured by bounding box
/// area. Blobs no larger than `min_zone_area` are ignored; the rest are sorted
/// by area (largest first) and the first `zone_count` are kept. Fewer than
/// `zone_count` blobs is a fatal configuration error.
pub fn discover_zones(image: &RgbImage, params: &ColorParams) -> Result<Vec<PixelRect>> {
    let mask = params.range.mask(image);
    let mut zones = blob_bounds(&mask)
        .into_iter()
        .filter(|rect| rect.area() > params.min_zone_area)
        .collect::<Vec<_>>();
    zones.sort_by(|a, b| {
        b.area()
            .cmp(&a.area())
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });

    if zones.len() < params.zone_count {
        return Err(FatalConfigError::marker_zones(format!(
            "found {} marker zones larger than {} px², need {}; check sticker colour and lighting",
            zones.len(),
            params.min_zone_area,
            params.zone_count
        ))
        .into());
    }
    if zones.len() > params.zone_count {
        log::debug!(
            "discarding {} extra marker candidates",
            zones.len() - params.zone_count
        );
    }
    zones.truncate(params.zone_count);
    Ok(zones)
}

fn blob_bounds(mask: &GrayImage) -> Vec<PixelRect> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    // (min_x, min_y, max_x, max_y) per label; label 0 is background.
    let mut bounds: Vec<Option<(u32, u32, u32, u32)>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let id = label[0] as usize;
        if id == 0 {
            continue;
        }
        if bounds.len() < id {
            bounds.resize(id, None);
        }
        let slot = &mut bounds[id - 1];
        *slot = Some(match *slot {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    bounds
        .into_iter()
        .flatten()
        .map(|(x0, y0, x1, y1)| PixelRect {
            x: x0,
            y: y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
        })
        .collect()
}
