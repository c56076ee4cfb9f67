//! Camera frames.
//!
//! A `Frame` lives for one poll tick: it is cropped into the detection and
//! upload regions, the crops are written to disk, and the frame is dropped.

use anyhow::{Context, Result};
use image::RgbImage;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::region::PixelRect;

/// Decoded full-resolution camera frame.
#[derive(Debug)]
pub struct Frame {
    image: RgbImage,
    captured_at: SystemTime,
}

// No Clone: a frame is owned by the tick that fetched it.

impl Frame {
    pub fn new(image: RgbImage, captured_at: SystemTime) -> Self {
        Self { image, captured_at }
    }

    /// Decode an encoded image (JPEG/PNG) into a frame stamped with the current time.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode snapshot")?;
        Ok(Self::new(image.into_rgb8(), SystemTime::now()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Whole seconds since the unix epoch, used to name saved crops.
    pub fn unix_secs(&self) -> u64 {
        self.captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    pub fn crop(&self, rect: PixelRect) -> RgbImage {
        rect.crop(&self.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    #[test]
    fn decodes_png_bytes() {
        let image = RgbImage::from_pixel(8, 6, image::Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert_eq!(frame.image().get_pixel(3, 3).0, [10, 20, 30]);
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(Frame::decode(b"not an image").is_err());
    }

    #[test]
    fn unix_secs_truncates() {
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_900);
        let frame = Frame::new(RgbImage::new(1, 1), at);
        assert_eq!(frame.unix_secs(), 1_700_000_000);
    }
}
