// THEORY:
// The `sample` module is the data model every other component reads and writes.
// A `Sample` is born once per successful ingestion and carries, in order of
// appearance in its life:
//
// 1.  **Identity & raw data**: name, source path, optional frame index, the
//     acquisition header and the raw height grid.
// 2.  **Calibration**: resolved at ingestion, never recomputed.
// 3.  **Operation history**: an append-only list of `(name, snapshot)` entries.
//     Each snapshot is an owned copy, so later changes to the working image can
//     never rewrite an earlier entry.
// 4.  **Measurements**: written only by a detection run, and always replaced as a
//     whole. A measurement run never touches the history.

use crate::core_modules::calibration::{self, AcquisitionFormat, CalibrationCoefficients};
use crate::core_modules::proximity::SpotTracking;
use crate::core_modules::region::{Centroid, LabelGrid};
use crate::error::{SpotResult, ValidationError};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info};

/// Format-specific acquisition metadata, as produced by a file reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AcquisitionHeader(Value);

impl AcquisitionHeader {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The header's fields, or `None` if the header is not a mapping.
    pub fn as_mapping(&self) -> Option<&serde_json::Map<String, Value>> {
        self.0.as_object()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for AcquisitionHeader {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// A rows x cols grid of raw height values, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightGrid {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl HeightGrid {
    pub fn new(rows: usize, cols: usize, values: Vec<f64>) -> Result<Self, ValidationError> {
        if rows * cols != values.len() {
            return Err(ValidationError::ShapeMismatch {
                expected: rows * cols,
                actual: values.len(),
            });
        }
        Ok(Self { rows, cols, values })
    }

    /// Builds a grid from nested rows, which must all have the same length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, ValidationError> {
        let cols = rows.first().map_or(0, Vec::len);
        let n_rows = rows.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(ValidationError::ShapeMismatch {
                expected: cols,
                actual: bad.len(),
            });
        }
        Self::new(n_rows, cols, rows.into_iter().flatten().collect())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.values[row * self.cols + col])
        } else {
            None
        }
    }

    /// Min-max normalises the heights into a 0..=255 greyscale image.
    pub fn to_greyscale(&self) -> GrayImage {
        let (mut min, mut max) = self
            .values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if !min.is_finite() {
            min = 0.0;
            max = 0.0;
        }
        if max == min {
            max += 1.0;
        }

        GrayImage::from_fn(self.cols as u32, self.rows as u32, |x, y| {
            let v = self.values[y as usize * self.cols + x as usize];
            let scaled = if v.is_finite() { 255.0 * (v - min) / (max - min) } else { 0.0 };
            Luma([scaled as u8])
        })
    }
}

/// One entry of a sample's operation history.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: String,
    pub snapshot: GrayImage,
}

/// Which image a sample view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DisplayMode {
    /// The image chosen for analysis.
    #[default]
    Selected,
    /// The greyscale rendering of the raw grid.
    Original,
    /// Black-ink overlay.
    Contours,
    /// White-ink overlay.
    WContours,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 4] = [
        DisplayMode::Selected,
        DisplayMode::Original,
        DisplayMode::Contours,
        DisplayMode::WContours,
    ];
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisplayMode::Selected => "Selected",
            DisplayMode::Original => "Original",
            DisplayMode::Contours => "Contours",
            DisplayMode::WContours => "WContours",
        };
        f.write_str(s)
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DisplayMode::ALL
            .into_iter()
            .find(|m| m.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown display mode '{s}'"))
    }
}

/// A region after calibration, as stored on the sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasuredRegion {
    pub display_id: String,
    pub pixel_area: u64,
    pub physical_area: f64,
    pub centroid: Centroid,
    pub neighbor_display_id: String,
    pub pixel_neighbor_distance: f64,
    pub physical_neighbor_distance: f64,
}

/// The row handed to exporters and result views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub display_id: String,
    pub physical_area: f64,
    pub physical_neighbor_distance: f64,
    pub neighbor_display_id: String,
}

/// Everything one detection run produced for one sample.
#[derive(Debug, Clone)]
pub struct MeasurementResult {
    pub regions: Vec<MeasuredRegion>,
    pub labeled: LabelGrid,
    pub overlay: GrayImage,
    pub overlay_white: GrayImage,
    /// Spots matched against the previous frame of the same stack, if any.
    pub tracking: Option<SpotTracking>,
}

impl MeasurementResult {
    pub fn rows(&self) -> Vec<ResultRow> {
        self.regions
            .iter()
            .map(|r| ResultRow {
                display_id: r.display_id.clone(),
                physical_area: r.physical_area,
                physical_neighbor_distance: r.physical_neighbor_distance,
                neighbor_display_id: r.neighbor_display_id.clone(),
            })
            .collect()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

/// One calibrated image (or one frame of a stack) and everything done to it.
#[derive(Debug, Clone)]
pub struct Sample {
    name: String,
    source_path: PathBuf,
    frame_index: Option<usize>,
    format: AcquisitionFormat,
    header: AcquisitionHeader,
    raw: HeightGrid,
    calibration: CalibrationCoefficients,
    original: GrayImage,
    operations: Vec<Operation>,
    analysis_image: GrayImage,
    measurements: Option<MeasurementResult>,
}

impl Sample {
    fn new(
        name: String,
        source_path: PathBuf,
        frame_index: Option<usize>,
        format: AcquisitionFormat,
        header: AcquisitionHeader,
        raw: HeightGrid,
        calibration: CalibrationCoefficients,
    ) -> Self {
        let original = raw.to_greyscale();
        Self {
            name,
            source_path,
            frame_index,
            format,
            header,
            raw,
            calibration,
            analysis_image: original.clone(),
            original,
            operations: Vec::new(),
            measurements: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn frame_index(&self) -> Option<usize> {
        self.frame_index
    }

    pub fn format(&self) -> AcquisitionFormat {
        self.format
    }

    pub fn header(&self) -> &AcquisitionHeader {
        &self.header
    }

    pub fn raw(&self) -> &HeightGrid {
        &self.raw
    }

    pub fn calibration(&self) -> &CalibrationCoefficients {
        &self.calibration
    }

    pub fn original_image(&self) -> &GrayImage {
        &self.original
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// The snapshot currently designated for analysis.
    pub fn analysis_image(&self) -> &GrayImage {
        &self.analysis_image
    }

    /// Appends `(name, image)` to the history and makes it the analysis image.
    pub fn record_operation(&mut self, name: impl Into<String>, image: &GrayImage) {
        self.operations.push(Operation {
            name: name.into(),
            snapshot: image.clone(),
        });
        self.analysis_image = image.clone();
    }

    /// Points the analysis image back at the original, keeping the history.
    pub fn reset_analysis_image(&mut self) {
        self.analysis_image = self.original.clone();
    }

    /// Designates a recorded snapshot as the analysis image.
    pub fn select_operation(&mut self, index: usize) -> Result<(), ValidationError> {
        let op = self.operations.get(index).ok_or(ValidationError::OperationOutOfRange {
            index,
            count: self.operations.len(),
        })?;
        self.analysis_image = op.snapshot.clone();
        Ok(())
    }

    pub fn measurements(&self) -> Option<&MeasurementResult> {
        self.measurements.as_ref()
    }

    /// Replaces any previous results wholesale.
    pub fn set_measurements(&mut self, result: MeasurementResult) {
        self.measurements = Some(result);
    }

    /// The image a view in `mode` should show, if it exists yet.
    pub fn display_image(&self, mode: DisplayMode) -> Option<&GrayImage> {
        match mode {
            DisplayMode::Selected => Some(&self.analysis_image),
            DisplayMode::Original => Some(&self.original),
            DisplayMode::Contours => self.measurements.as_ref().map(|m| &m.overlay),
            DisplayMode::WContours => self.measurements.as_ref().map(|m| &m.overlay_white),
        }
    }
}

/// What an external file reader hands over for one source file.
#[derive(Debug, Clone)]
pub struct SourceData {
    pub file_name: PathBuf,
    pub header: AcquisitionHeader,
    /// One grid for single-image formats, one per frame for stacks.
    pub frames: Vec<HeightGrid>,
}

/// Turns one source file into its samples, resolving calibration once.
pub fn ingest(source: SourceData, format: AcquisitionFormat) -> SpotResult<Vec<Sample>> {
    let calibration = calibration::resolve(&source.header, format)?;

    if !format.is_multi_frame() && source.frames.len() != 1 {
        error!(
            file = %source.file_name.display(),
            frames = source.frames.len(),
            "single-image format delivered a frame count other than one"
        );
        return Err(ValidationError::ShapeMismatch {
            expected: 1,
            actual: source.frames.len(),
        }
        .into());
    }

    let base_name = source
        .file_name
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.file_name.display().to_string());

    let samples: Vec<Sample> = if format.is_multi_frame() {
        source
            .frames
            .into_iter()
            .enumerate()
            .map(|(i, frame)| {
                Sample::new(
                    format!("frame {}", i + 1),
                    source.file_name.clone(),
                    Some(i + 1),
                    format,
                    source.header.clone(),
                    frame,
                    calibration,
                )
            })
            .collect()
    } else {
        source
            .frames
            .into_iter()
            .map(|frame| {
                Sample::new(
                    base_name.clone(),
                    source.file_name.clone(),
                    None,
                    format,
                    source.header.clone(),
                    frame,
                    calibration,
                )
            })
            .collect()
    };

    info!(
        file = %source.file_name.display(),
        format = %format,
        samples = samples.len(),
        "source ingested"
    );
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn s94_header() -> AcquisitionHeader {
        AcquisitionHeader::new(json!({
            "x_size": 100.0, "y_size": 100.0, "x_points": 4, "y_points": 4
        }))
    }

    fn ramp(rows: usize, cols: usize) -> HeightGrid {
        HeightGrid::new(rows, cols, (0..rows * cols).map(|v| v as f64).collect())
            .expect("valid shape")
    }

    #[test]
    fn greyscale_is_min_max_normalised() {
        let grid = HeightGrid::from_rows(vec![vec![-1.0, 0.0], vec![1.0, 3.0]]).expect("grid");
        let img = grid.to_greyscale();
        assert_eq!(img.get_pixel(0, 0)[0], 0);
        assert_eq!(img.get_pixel(1, 1)[0], 255);
        assert_eq!(img.get_pixel(0, 1)[0], 127);
    }

    #[test]
    fn flat_grid_does_not_divide_by_zero() {
        let grid = HeightGrid::new(2, 2, vec![5.0; 4]).expect("grid");
        assert!(grid.to_greyscale().pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(HeightGrid::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).is_err());
        assert!(HeightGrid::new(2, 2, vec![0.0; 3]).is_err());
    }

    #[test]
    fn single_image_sample_is_named_after_file() {
        let samples = ingest(
            SourceData {
                file_name: PathBuf::from("/data/scan_01.s94"),
                header: s94_header(),
                frames: vec![ramp(4, 4)],
            },
            AcquisitionFormat::S94,
        )
        .expect("ingest");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name(), "scan_01.s94");
        assert_eq!(samples[0].frame_index(), None);
        assert_eq!(samples[0].calibration().x_nm_per_px(), 25.0);
        assert!(samples[0].operations().is_empty());
        assert!(samples[0].measurements().is_none());
    }

    #[test]
    fn stack_yields_one_sample_per_frame() {
        let header = AcquisitionHeader::new(json!({
            "Control": { "X Amplitude": "40 nm", "Y Amplitude": "40 nm" },
            "General Info": { "Number of columns": "4", "Number of rows": "4" },
        }));
        let samples = ingest(
            SourceData {
                file_name: PathBuf::from("movie.mpp"),
                header,
                frames: vec![ramp(4, 4), ramp(4, 4), ramp(4, 4)],
            },
            AcquisitionFormat::Mpp,
        )
        .expect("ingest");
        let names: Vec<&str> = samples.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["frame 1", "frame 2", "frame 3"]);
        assert_eq!(samples[2].frame_index(), Some(3));
        assert!(samples.iter().all(|s| s.calibration().x_nm_per_px() == 10.0));
    }

    #[test]
    fn single_image_format_rejects_stacks() {
        let result = ingest(
            SourceData {
                file_name: PathBuf::from("scan.s94"),
                header: s94_header(),
                frames: vec![ramp(4, 4), ramp(4, 4)],
            },
            AcquisitionFormat::S94,
        );
        assert!(result.is_err());
    }

    #[test]
    fn history_snapshots_are_independent_copies() {
        let mut sample = ingest(
            SourceData {
                file_name: PathBuf::from("scan.s94"),
                header: s94_header(),
                frames: vec![ramp(4, 4)],
            },
            AcquisitionFormat::S94,
        )
        .expect("ingest")
        .remove(0);

        let mut working = GrayImage::from_pixel(4, 4, Luma([10]));
        sample.record_operation("Step A", &working);
        working.put_pixel(0, 0, Luma([200]));
        sample.record_operation("Step B", &working);

        assert_eq!(sample.operations().len(), 2);
        assert_eq!(sample.operations()[0].snapshot.get_pixel(0, 0)[0], 10);
        assert_eq!(sample.operations()[1].snapshot.get_pixel(0, 0)[0], 200);
        assert_eq!(sample.analysis_image().get_pixel(0, 0)[0], 200);

        sample.select_operation(0).expect("entry exists");
        assert_eq!(sample.analysis_image().get_pixel(0, 0)[0], 10);
        assert!(sample.select_operation(5).is_err());

        sample.reset_analysis_image();
        assert_eq!(sample.analysis_image(), sample.original_image());
        assert_eq!(sample.operations().len(), 2);
    }

    #[test]
    fn display_modes_map_to_images() {
        let sample = ingest(
            SourceData {
                file_name: PathBuf::from("scan.s94"),
                header: s94_header(),
                frames: vec![ramp(4, 4)],
            },
            AcquisitionFormat::S94,
        )
        .expect("ingest")
        .remove(0);
        assert!(sample.display_image(DisplayMode::Original).is_some());
        assert!(sample.display_image(DisplayMode::Selected).is_some());
        assert!(sample.display_image(DisplayMode::Contours).is_none());
        assert_eq!("wcontours".parse::<DisplayMode>(), Ok(DisplayMode::WContours));
    }
}
