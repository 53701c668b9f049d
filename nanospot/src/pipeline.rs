// THEORY:
// The `pipeline` module is the top-level API of the measurement engine. It takes
// an ordered batch of frames (a still image is a batch of one) and runs every
// stage over each of them:
//
//   mask -> labeling -> region properties -> nearest neighbours
//        -> calibration -> overlays (black ink and white ink)
//
// The batch is all-or-nothing. The first frame that fails aborts the run, the
// error is returned, and nothing computed so far is handed back. Callers that
// write results onto samples can therefore do so only after the whole batch
// succeeded.

use crate::config::MeasurementConfig;
use crate::core_modules::calibration::CalibrationCoefficients;
use crate::core_modules::feature_extractor::{feature_extractor, threshold_above};
use crate::core_modules::overlay::{self, Ink};
use crate::core_modules::proximity::{self, SpotTracking};
use crate::core_modules::region::{Centroid, LabelGrid};
use crate::error::{SpotResult, ValidationError};
use crate::sample::{MeasuredRegion, MeasurementResult};
use image::GrayImage;
use tracing::{debug, error, info};

/// Everything measured on one frame, in pixel units.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub centroids: Vec<Centroid>,
    pub areas: Vec<u64>,
    pub region_ids: Vec<String>,
    pub neighbor_distances: Vec<f64>,
    pub neighbor_names: Vec<String>,
    pub labeled_grid: LabelGrid,
    pub region_count: usize,
}

impl FrameAnalysis {
    /// Applies `calibration` to this frame's regions.
    pub fn measured_regions(&self, calibration: &CalibrationCoefficients) -> Vec<MeasuredRegion> {
        (0..self.region_count)
            .map(|i| MeasuredRegion {
                display_id: self.region_ids[i].clone(),
                pixel_area: self.areas[i],
                physical_area: calibration.physical_area(self.areas[i] as f64),
                centroid: self.centroids[i],
                neighbor_display_id: self.neighbor_names[i].clone(),
                pixel_neighbor_distance: self.neighbor_distances[i],
                physical_neighbor_distance: calibration.physical_distance(self.neighbor_distances[i]),
            })
            .collect()
    }
}

/// Per-frame results of a batch as parallel arrays indexed by frame position.
#[derive(Debug, Clone, Default)]
pub struct BatchAnalysis {
    pub centroids: Vec<Vec<Centroid>>,
    pub areas: Vec<Vec<u64>>,
    pub region_ids: Vec<Vec<String>>,
    pub neighbor_distances: Vec<Vec<f64>>,
    pub neighbor_names: Vec<Vec<String>>,
    pub labeled_grids: Vec<LabelGrid>,
    pub region_counts: Vec<usize>,
}

impl BatchAnalysis {
    pub fn len(&self) -> usize {
        self.region_counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region_counts.is_empty()
    }

    pub fn push(&mut self, frame: FrameAnalysis) {
        self.centroids.push(frame.centroids);
        self.areas.push(frame.areas);
        self.region_ids.push(frame.region_ids);
        self.neighbor_distances.push(frame.neighbor_distances);
        self.neighbor_names.push(frame.neighbor_names);
        self.labeled_grids.push(frame.labeled_grid);
        self.region_counts.push(frame.region_count);
    }

    /// Reassembles frame `index` from the parallel arrays.
    pub fn frame(&self, index: usize) -> Option<FrameAnalysis> {
        if index >= self.len() {
            return None;
        }
        Some(FrameAnalysis {
            centroids: self.centroids[index].clone(),
            areas: self.areas[index].clone(),
            region_ids: self.region_ids[index].clone(),
            neighbor_distances: self.neighbor_distances[index].clone(),
            neighbor_names: self.neighbor_names[index].clone(),
            labeled_grid: self.labeled_grids[index].clone(),
            region_count: self.region_counts[index],
        })
    }

    /// Greedy matching of frame `index` against frame `index - 1`.
    pub fn track_against_previous(&self, index: usize, threshold: f64) -> SpotResult<Option<SpotTracking>> {
        if index == 0 || index >= self.len() {
            return Ok(None);
        }
        proximity::track_spots(&self.centroids[index - 1], &self.centroids[index], threshold).map(Some)
    }
}

impl FromIterator<FrameAnalysis> for BatchAnalysis {
    fn from_iter<T: IntoIterator<Item = FrameAnalysis>>(iter: T) -> Self {
        let mut batch = BatchAnalysis::default();
        for frame in iter {
            batch.push(frame);
        }
        batch
    }
}

/// Labels, measures and relates the regions of one mask.
pub fn analyze_frame(mask: &GrayImage) -> SpotResult<FrameAnalysis> {
    let labeling = feature_extractor::label(mask)?;
    let regions = feature_extractor::calculate_regions(&labeling.grid)?;

    let centroids: Vec<Centroid> = regions.iter().map(|r| r.centroid).collect();
    let areas: Vec<u64> = regions.iter().map(|r| r.pixel_area).collect();
    let neighbors = proximity::nearest_neighbors(&centroids, &labeling.region_ids)?;

    Ok(FrameAnalysis {
        centroids,
        areas,
        region_ids: labeling.region_ids,
        neighbor_distances: neighbors.distances,
        neighbor_names: neighbors.neighbor_names,
        labeled_grid: labeling.grid,
        region_count: labeling.region_count,
    })
}

/// Runs `analyze_frame` over every mask in order, failing fast.
pub fn analyze(masks: &[GrayImage]) -> SpotResult<BatchAnalysis> {
    let mut batch = BatchAnalysis::default();
    for (index, mask) in masks.iter().enumerate() {
        let frame = analyze_frame(mask).inspect_err(|e| {
            error!(frame = index, error = %e, "frame analysis failed, aborting batch");
        })?;
        debug!(frame = index, regions = frame.region_count, "frame analyzed");
        batch.push(frame);
    }
    Ok(batch)
}

/// One frame's worth of input to a full detection run.
#[derive(Debug, Clone)]
pub struct FrameInput {
    /// The image selected for analysis.
    pub analysis: GrayImage,
    /// The greyscale original overlays are drawn on.
    pub original: GrayImage,
    pub calibration: CalibrationCoefficients,
    /// This frame is the next frame of the same stack as the input before it;
    /// its spots are then tracked against that frame.
    pub follows_previous: bool,
}

/// The main, top-level struct for a detection run.
#[derive(Debug, Clone, Default)]
pub struct MeasurementPipeline {
    config: MeasurementConfig,
}

impl MeasurementPipeline {
    pub fn new(config: MeasurementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    /// Analyses every input, then renders both overlay variants and calibrates
    /// the regions. Returns one result per input, in order, or the first error.
    pub fn run(&self, inputs: &[FrameInput]) -> SpotResult<Vec<MeasurementResult>> {
        // Stage 1: Masks
        let masks: Vec<GrayImage> = inputs
            .iter()
            .map(|i| threshold_above(&i.analysis, self.config.foreground_cutoff))
            .collect();

        // Stage 2: Measurement
        let batch = analyze(&masks)?;

        // Stage 3: Overlays & calibration
        let results = self.finish(inputs, batch)?;

        let regions: usize = results.iter().map(MeasurementResult::region_count).sum();
        info!(frames = results.len(), regions, "detection run complete");
        Ok(results)
    }

    /// Renders overlays for an analysed batch and applies each input's calibration.
    pub fn finish(
        &self,
        inputs: &[FrameInput],
        batch: BatchAnalysis,
    ) -> SpotResult<Vec<MeasurementResult>> {
        if inputs.len() != batch.len() {
            return Err(ValidationError::ShapeMismatch {
                expected: inputs.len(),
                actual: batch.len(),
            }
            .into());
        }

        let style = self.config.overlay_style();
        let originals: Vec<GrayImage> = inputs.iter().map(|i| i.original.clone()).collect();
        let overlays = overlay::overlay_all(
            &originals,
            &batch.labeled_grids,
            &batch.region_ids,
            &batch.centroids,
            Ink::Black,
            &style,
        )?;
        let overlays_white = overlay::overlay_all(
            &originals,
            &batch.labeled_grids,
            &batch.region_ids,
            &batch.centroids,
            Ink::White,
            &style,
        )?;

        let mut results = Vec::with_capacity(inputs.len());
        for (((input, overlay), overlay_white), index) in inputs
            .iter()
            .zip(overlays)
            .zip(overlays_white)
            .zip(0..)
        {
            let Some(frame) = batch.frame(index) else {
                break;
            };
            let tracking = if input.follows_previous {
                batch.track_against_previous(index, self.config.track_threshold)?
            } else {
                None
            };
            results.push(MeasurementResult {
                regions: frame.measured_regions(&input.calibration),
                labeled: frame.labeled_grid,
                overlay,
                overlay_white,
                tracking,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use crate::error::SpotError;

    fn squares(offsets: &[(u32, u32)], size: u32) -> GrayImage {
        let mut img = GrayImage::new(64, 64);
        for &(x0, y0) in offsets {
            for y in y0..y0 + size {
                for x in x0..x0 + size {
                    img.put_pixel(x, y, Luma([255]));
                }
            }
        }
        img
    }

    #[test]
    fn analyze_returns_parallel_arrays_per_frame() {
        let frames = vec![
            squares(&[(0, 0), (0, 20)], 4),
            squares(&[(10, 10), (30, 10), (50, 50)], 2),
        ];
        let batch = analyze(&frames).expect("batch");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.region_counts, vec![2, 3]);
        assert_eq!(batch.areas[0], vec![16, 16]);
        assert_eq!(batch.region_ids[1], vec!["001", "002", "003"]);
        assert_eq!(batch.neighbor_distances[0], vec![20.0, 20.0]);
        assert_eq!(batch.neighbor_names[0], vec!["002", "001"]);
        assert_eq!(batch.labeled_grids.len(), 2);
    }

    #[test]
    fn any_failing_frame_aborts_the_batch() {
        let frames = vec![
            squares(&[(0, 0), (0, 20)], 4),
            squares(&[(10, 10)], 4), // one region: no neighbour
            squares(&[(0, 0), (0, 20)], 4),
        ];
        let err = analyze(&frames).unwrap_err();
        assert!(matches!(err, SpotError::DegenerateInput { regions: 1, .. }));
    }

    #[test]
    fn empty_mask_is_degenerate() {
        let err = analyze(&[GrayImage::new(8, 8)]).unwrap_err();
        assert!(matches!(err, SpotError::DegenerateInput { regions: 0, .. }));
    }

    #[test]
    fn run_calibrates_and_renders_both_overlays() {
        let mask = squares(&[(0, 0), (0, 20)], 4);
        let input = FrameInput {
            analysis: mask,
            original: GrayImage::from_pixel(64, 64, Luma([128])),
            calibration: CalibrationCoefficients::from_scales(0.5, 0.25),
            follows_previous: false,
        };
        let results = MeasurementPipeline::default().run(&[input]).expect("run");
        assert_eq!(results.len(), 1);

        let r = &results[0];
        assert_eq!(r.region_count(), 2);
        assert_eq!(r.regions[0].physical_area, 16.0 * 0.125);
        assert_eq!(r.regions[0].physical_neighbor_distance, 20.0 * 0.5);
        assert_eq!(r.overlay.get_pixel(0, 0)[0], 0);
        assert_eq!(r.overlay_white.get_pixel(0, 0)[0], 255);

        let rows = r.rows();
        assert_eq!(rows[1].display_id, "002");
        assert_eq!(rows[1].neighbor_display_id, "001");
    }

    #[test]
    fn foreground_cutoff_controls_the_mask() {
        let mut analysis = GrayImage::from_pixel(16, 16, Luma([40]));
        for &(x, y) in &[(2u32, 2u32), (12, 12)] {
            analysis.put_pixel(x, y, Luma([200]));
        }
        let input = FrameInput {
            analysis,
            original: GrayImage::new(16, 16),
            calibration: CalibrationCoefficients::from_scales(1.0, 1.0),
            follows_previous: false,
        };
        let config = MeasurementConfig {
            foreground_cutoff: 100,
            ..MeasurementConfig::default()
        };
        let results = MeasurementPipeline::new(config).run(&[input]).expect("run");
        assert_eq!(results[0].region_count(), 2);
    }

    fn stack_inputs(frames: Vec<GrayImage>) -> Vec<FrameInput> {
        frames
            .into_iter()
            .enumerate()
            .map(|(i, analysis)| FrameInput {
                original: GrayImage::new(analysis.width(), analysis.height()),
                analysis,
                calibration: CalibrationCoefficients::from_scales(1.0, 1.0),
                follows_previous: i > 0,
            })
            .collect()
    }

    #[test]
    fn stack_frames_are_tracked_with_the_configured_threshold() {
        let frames = vec![
            squares(&[(0, 0), (40, 40)], 4),
            squares(&[(2, 0), (40, 40), (20, 0)], 4),
        ];
        let results = MeasurementPipeline::default()
            .run(&stack_inputs(frames.clone()))
            .expect("run");
        assert!(results[0].tracking.is_none());
        let tracking = results[1].tracking.as_ref().expect("tracked");
        assert_eq!(tracking.matched, vec![(0, 0), (2, 1)]);
        assert_eq!(tracking.new_indices, vec![1]);

        // A radius below the 2 px shift leaves the moved spot unmatched.
        let tight = MeasurementConfig {
            track_threshold: 1.5,
            ..MeasurementConfig::default()
        };
        let results = MeasurementPipeline::new(tight).run(&stack_inputs(frames)).expect("run");
        let tracking = results[1].tracking.as_ref().expect("tracked");
        assert_eq!(tracking.matched, vec![(2, 1)]);
        assert_eq!(tracking.new_indices, vec![0, 1]);
    }

    #[test]
    fn unrelated_frames_are_not_tracked() {
        let mut inputs = stack_inputs(vec![
            squares(&[(0, 0), (40, 40)], 4),
            squares(&[(0, 0), (40, 40)], 4),
        ]);
        inputs[1].follows_previous = false;
        let results = MeasurementPipeline::default().run(&inputs).expect("run");
        assert!(results.iter().all(|r| r.tracking.is_none()));
    }
}
