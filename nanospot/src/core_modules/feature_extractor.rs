// THEORY:
// The `feature_extractor` is the engine of the spot measurement layer. Where the
// operation catalog stops (a thresholded, binary mask), this module takes over
// and turns pixels into countable objects.
//
// Key architectural principles & algorithm steps:
// 1.  **Binarisation**: Any non-zero mask pixel is foreground. The mask is
//     normalised to {0, 255} first so that foreground pixels of different
//     intensities are never split into separate components.
// 2.  **Labeling**: Foreground pixels are grouped into 8-connected components.
//     Labels are assigned 1..=N in row-major order of each component's first
//     pixel, so identical masks always produce identical labels.
// 3.  **Property Extraction**: A single pass over the labeled grid accumulates,
//     per label, the pixel count and the row/column sums, giving area and
//     centroid.
// 4.  **Stateless Utility**: Like the rest of the core, nothing here remembers
//     previous frames.

use crate::core_modules::region::{Centroid, LabelGrid, Region, display_id};
use crate::error::{SpotError, SpotResult};
use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use thiserror::Error;
use tracing::{debug, error};

/// Low-level causes wrapped into `SpotError::Computation`.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("grid is empty ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("label {label} has no member pixels")]
    EmptyLabel { label: u32 },
}

/// Output of a labeling run.
#[derive(Debug, Clone)]
pub struct Labeling {
    pub grid: LabelGrid,
    pub region_count: usize,
    /// `"001"..` in label order.
    pub region_ids: Vec<String>,
}

/// Pixels strictly above `level` become 255, the rest 0.
pub fn threshold_above(image: &GrayImage, level: u8) -> GrayImage {
    let mut binary = image.clone();
    for p in binary.pixels_mut() {
        *p = if p.0[0] > level { Luma([255]) } else { Luma([0]) };
    }
    binary
}

pub mod feature_extractor {
    use super::*; // Make the parent's types available.

    /// Labels the 8-connected foreground components of `mask`.
    pub fn label(mask: &GrayImage) -> SpotResult<Labeling> {
        let (width, height) = mask.dimensions();
        if width == 0 || height == 0 {
            error!(width, height, "cannot label an empty mask");
            return Err(SpotError::computation("labeling", GridError::Empty { width, height }));
        }

        let binary = threshold_above(mask, 0);
        let grid = connected_components(&binary, Connectivity::Eight, Luma([0u8]));
        let region_count = grid.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
        let region_ids = (1..=region_count as u32).map(display_id).collect();

        debug!(width, height, region_count, "mask labeled");
        Ok(Labeling {
            grid,
            region_count,
            region_ids,
        })
    }

    /// Computes area and centroid for every label 1..=N of `labeled`.
    pub fn calculate_regions(labeled: &LabelGrid) -> SpotResult<Vec<Region>> {
        let (width, height) = labeled.dimensions();
        if width == 0 || height == 0 {
            error!(width, height, "cannot measure regions of an empty grid");
            return Err(SpotError::computation(
                "region properties",
                GridError::Empty { width, height },
            ));
        }

        let region_count = labeled.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;

        // Index 0 is background and stays unused.
        let mut areas = vec![0u64; region_count + 1];
        let mut row_sums = vec![0f64; region_count + 1];
        let mut col_sums = vec![0f64; region_count + 1];

        for (x, y, pixel) in labeled.enumerate_pixels() {
            let label = pixel[0] as usize;
            if label == 0 {
                continue;
            }
            areas[label] += 1;
            row_sums[label] += y as f64;
            col_sums[label] += x as f64;
        }

        let mut regions = Vec::with_capacity(region_count);
        for label in 1..=region_count {
            let area = areas[label];
            if area == 0 {
                error!(label, "label gap in labeled grid");
                return Err(SpotError::computation(
                    "region properties",
                    GridError::EmptyLabel { label: label as u32 },
                ));
            }
            regions.push(Region {
                label_id: label as u32,
                display_id: display_id(label as u32),
                pixel_area: area,
                centroid: Centroid::new(row_sums[label] / area as f64, col_sums[label] / area as f64),
            });
        }

        Ok(regions)
    }

}
