// THEORY:
// This file is the main entry point for the `nanospot` library crate.
//
// The primary goal is to export `AppState` and the pipelines as the high-level
// interface for measuring nano-scale spots on calibrated height images. The
// measurement algorithms themselves (`core_modules`) are stateless functions
// over images and centroid lists; everything that remembers anything lives in
// `sample` and `state`.
//
// Layering, bottom to top:
//   core_modules  calibration, labeling, proximity, overlays
//   sample        one calibrated image and its operation history
//   pipeline      fail-fast batch measurement (sequential and worker pool)
//   state         owned session state with change notifications

pub mod config;
pub mod core_modules;
pub mod error;
pub mod events;
pub mod logging;
pub mod operations;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod sample;
pub mod state;

pub use config::MeasurementConfig;
pub use core_modules::calibration::{AcquisitionFormat, CalibrationCoefficients};
pub use core_modules::overlay::{EdgeMode, Ink, OverlayStyle};
pub use core_modules::region::{Centroid, LabelGrid, Region};
pub use error::{SpotError, SpotResult, ValidationError};
pub use events::{EventBus, StateEvent};
pub use operations::{FixedThreshold, ImageOperation, OtsuThreshold};
pub use pipeline::{BatchAnalysis, FrameInput, MeasurementPipeline};
pub use sample::{AcquisitionHeader, DisplayMode, HeightGrid, ResultRow, Sample, SourceData};
pub use state::AppState;
