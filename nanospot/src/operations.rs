//! The seam to the external operation catalog.
//!
//! Preprocessing, thresholding and morphology live outside this crate. Each is a
//! named transformation of the analysis image. The two thresholds below are the
//! minimum a driver needs to turn a height image into a mask.

use crate::error::{SpotError, SpotResult};
use crate::core_modules::feature_extractor::threshold_above;
use image::GrayImage;

pub trait ImageOperation: Send + Sync {
    /// Name recorded in the operation history.
    fn name(&self) -> String;

    fn apply(&self, image: &GrayImage) -> SpotResult<GrayImage>;
}

/// Pixels strictly above `level` become 255, the rest 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedThreshold(pub u8);

impl ImageOperation for FixedThreshold {
    fn name(&self) -> String {
        format!("Binary Threshold ({})", self.0)
    }

    fn apply(&self, image: &GrayImage) -> SpotResult<GrayImage> {
        Ok(threshold_above(image, self.0))
    }
}

/// Threshold at the Otsu level of the image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OtsuThreshold;

impl ImageOperation for OtsuThreshold {
    fn name(&self) -> String {
        "Otsu Threshold".to_string()
    }

    fn apply(&self, image: &GrayImage) -> SpotResult<GrayImage> {
        if image.width() == 0 || image.height() == 0 {
            return Err(SpotError::computation("otsu threshold", "image is empty"));
        }
        let level = imageproc::contrast::otsu_level(image);
        Ok(threshold_above(image, level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn fixed_threshold_is_strict() {
        let img = GrayImage::from_fn(3, 1, |x, _| Luma([[10, 100, 101][x as usize]]));
        let out = FixedThreshold(100).apply(&img).expect("threshold");
        assert_eq!(out.as_raw(), &vec![0, 0, 255]);
        assert_eq!(FixedThreshold(100).name(), "Binary Threshold (100)");
    }

    #[test]
    fn otsu_separates_two_levels() {
        let img = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 5 { 20 } else { 220 }]));
        let out = OtsuThreshold.apply(&img).expect("threshold");
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(9, 9)[0], 255);
    }

    #[test]
    fn otsu_rejects_empty_images() {
        assert!(OtsuThreshold.apply(&GrayImage::new(0, 0)).is_err());
    }
}
