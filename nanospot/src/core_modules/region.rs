// THEORY:
// A `Region` is one spot: a maximal 8-connected set of foreground pixels found in
// a single labeling run. Like the other data containers in this crate it is
// "dumb": it records what was measured in pixel space and knows how to present
// itself in physical units given a calibration, nothing more. Label ids are only
// meaningful within the run that produced them.

use crate::core_modules::calibration::CalibrationCoefficients;
use image::{ImageBuffer, Luma};
use serde::Serialize;

/// A labeled grid: 0 is background, 1..=N are region labels.
pub type LabelGrid = ImageBuffer<Luma<u32>, Vec<u32>>;

/// A `(row, col)` position in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Centroid {
    pub row: f64,
    pub col: f64,
}

impl Centroid {
    pub fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }

    pub fn distance_to(&self, other: &Centroid) -> f64 {
        ((self.row - other.row).powi(2) + (self.col - other.col).powi(2)).sqrt()
    }
}

impl From<(f64, f64)> for Centroid {
    fn from((row, col): (f64, f64)) -> Self {
        Self { row, col }
    }
}

/// Geometric properties of one labeled region, in pixel units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    /// Label value in the grid this region was extracted from (1..=N).
    pub label_id: u32,
    /// Zero-padded label for display, e.g. `"007"`.
    pub display_id: String,
    /// Number of member pixels. Always at least 1.
    pub pixel_area: u64,
    /// Mean position of the member pixels.
    pub centroid: Centroid,
}

impl Region {
    pub fn physical_area(&self, calibration: &CalibrationCoefficients) -> f64 {
        calibration.physical_area(self.pixel_area as f64)
    }
}

/// Formats a label as its three-digit display string.
pub fn display_id(label: u32) -> String {
    format!("{label:03}")
}
