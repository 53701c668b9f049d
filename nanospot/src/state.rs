// THEORY:
// `AppState` is the single owner of everything a session has loaded: the samples,
// which one is selected, the run configuration and the event bus observers listen
// on. It replaces process-wide mutable globals. Every mutation goes through a
// method here, and every method that changes what a view would render publishes
// a `StateEvent` afterwards.
//
// Detection is transactional. All samples are measured first; only when every
// one of them succeeded are the results written back. A failed run publishes
// `MeasurementFailed` and leaves every sample exactly as it was.

use crate::config::MeasurementConfig;
use crate::core_modules::calibration::AcquisitionFormat;
use crate::core_modules::overlay::{self, Ink};
use crate::error::{SpotError, SpotResult, ValidationError};
use crate::events::{EventBus, StateEvent};
use crate::operations::ImageOperation;
use crate::parallel_pipeline::ParallelPipeline;
use crate::pipeline::{FrameInput, MeasurementPipeline};
use crate::sample::{self, DisplayMode, MeasurementResult, ResultRow, Sample, SourceData};
use image::GrayImage;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct AppState {
    samples: Vec<Sample>,
    selected: Option<usize>,
    config: MeasurementConfig,
    bus: EventBus,
}

impl AppState {
    pub fn new(config: MeasurementConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample(&self, name: &str) -> Option<&Sample> {
        self.samples.iter().find(|s| s.name() == name)
    }

    fn sample_index(&self, name: &str) -> Result<usize, ValidationError> {
        self.samples
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| ValidationError::SampleNotFound(name.to_string()))
    }

    /// Replaces all loaded samples with those of `sources`. Nothing changes if
    /// any source fails to ingest or two samples would share a name.
    pub fn ingest(&mut self, sources: Vec<SourceData>, format: AcquisitionFormat) -> SpotResult<usize> {
        let mut samples: Vec<Sample> = Vec::new();
        for source in sources {
            for sample in sample::ingest(source, format)? {
                if let Some(other) = samples.iter().find(|s| s.name() == sample.name()) {
                    warn!(name = sample.name(), "duplicate sample name, ingest rejected");
                    return Err(ValidationError::DuplicateSample {
                        name: sample.name().to_string(),
                        first: other.source_path().display().to_string(),
                        second: sample.source_path().display().to_string(),
                    }
                    .into());
                }
                samples.push(sample);
            }
        }

        self.samples = samples;
        self.selected = if self.samples.is_empty() { None } else { Some(0) };
        let count = self.samples.len();
        info!(count, %format, "samples replaced");

        self.bus.publish(StateEvent::SamplesReplaced { count });
        self.publish_selection();
        Ok(count)
    }

    /// Drops sample `name`. The selection follows the sample it pointed at, or is
    /// cleared when that sample was the one removed.
    pub fn remove_sample(&mut self, name: &str) -> Result<(), ValidationError> {
        let index = self.sample_index(name)?;
        self.samples.remove(index);

        let previous = self.selected;
        self.selected = match previous {
            Some(i) if i == index => None,
            Some(i) if i > index => Some(i - 1),
            other => other,
        };
        info!(name, remaining = self.samples.len(), "sample removed");

        self.bus.publish(StateEvent::SamplesReplaced {
            count: self.samples.len(),
        });
        if previous == Some(index) {
            self.publish_selection();
        }
        Ok(())
    }

    /// Drops every sample and the selection.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.selected = None;
        info!("samples cleared");
        self.bus.publish(StateEvent::SamplesReplaced { count: 0 });
        self.publish_selection();
    }

    /// Selects sample `name` and points its analysis image back at the original.
    pub fn select(&mut self, name: &str) -> Result<(), ValidationError> {
        let index = self.sample_index(name)?;
        self.samples[index].reset_analysis_image();
        self.selected = Some(index);
        self.publish_selection();
        Ok(())
    }

    pub fn selected(&self) -> Option<&Sample> {
        self.selected.and_then(|i| self.samples.get(i))
    }

    fn publish_selection(&self) {
        self.bus.publish(StateEvent::SelectionChanged {
            sample: self.selected().map(|s| s.name().to_string()),
        });
    }

    /// Applies `op` to the selected sample's analysis image and records it.
    pub fn apply_operation(&mut self, op: &dyn ImageOperation) -> SpotResult<()> {
        let index = self
            .selected
            .ok_or_else(|| ValidationError::SampleNotFound("<no selection>".to_string()))?;
        self.apply_operation_at(index, op)
    }

    /// Applies `op` to every loaded sample. All outputs are computed before any
    /// sample is modified.
    pub fn apply_operation_all(&mut self, op: &dyn ImageOperation) -> SpotResult<()> {
        let outputs = self
            .samples
            .iter()
            .map(|s| op.apply(s.analysis_image()))
            .collect::<SpotResult<Vec<GrayImage>>>()?;

        let name = op.name();
        for (sample, output) in self.samples.iter_mut().zip(outputs) {
            sample.record_operation(name.clone(), &output);
            self.bus.publish(StateEvent::OperationApplied {
                sample: sample.name().to_string(),
                operation: name.clone(),
            });
        }
        Ok(())
    }

    fn apply_operation_at(&mut self, index: usize, op: &dyn ImageOperation) -> SpotResult<()> {
        let sample = &mut self.samples[index];
        let output = op.apply(sample.analysis_image())?;
        let name = op.name();
        sample.record_operation(name.clone(), &output);
        self.bus.publish(StateEvent::OperationApplied {
            sample: sample.name().to_string(),
            operation: name,
        });
        Ok(())
    }

    /// Designates operation `index` of sample `name` as its analysis image.
    pub fn select_operation(&mut self, name: &str, index: usize) -> Result<(), ValidationError> {
        let i = self.sample_index(name)?;
        self.samples[i].select_operation(index)
    }

    fn frame_inputs(&self) -> SpotResult<Vec<FrameInput>> {
        if self.samples.is_empty() {
            return Err(ValidationError::NoMeasurements("no samples loaded".to_string()).into());
        }
        let mut inputs: Vec<FrameInput> = Vec::with_capacity(self.samples.len());
        for (i, s) in self.samples.iter().enumerate() {
            let follows_previous = match (i.checked_sub(1).map(|p| &self.samples[p]), s.frame_index()) {
                (Some(prev), Some(frame)) => {
                    prev.source_path() == s.source_path() && prev.frame_index().map(|p| p + 1) == Some(frame)
                }
                _ => false,
            };
            inputs.push(FrameInput {
                analysis: s.analysis_image().clone(),
                original: s.original_image().clone(),
                calibration: *s.calibration(),
                follows_previous,
            });
        }
        Ok(inputs)
    }

    /// Measures every loaded sample on the calling thread.
    pub fn run_detection(&mut self) -> SpotResult<usize> {
        let outcome = self
            .frame_inputs()
            .and_then(|inputs| MeasurementPipeline::new(self.config.clone()).run(&inputs));
        self.commit(outcome)
    }

    /// Measures every loaded sample on a worker pool.
    pub async fn run_detection_parallel(&mut self) -> SpotResult<usize> {
        let outcome = match self.frame_inputs() {
            Ok(inputs) => ParallelPipeline::new(self.config.clone()).run(&inputs).await,
            Err(e) => Err(e),
        };
        self.commit(outcome)
    }

    fn commit(&mut self, outcome: SpotResult<Vec<MeasurementResult>>) -> SpotResult<usize> {
        let results = match outcome {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "detection run failed, samples left unchanged");
                self.bus.publish(StateEvent::MeasurementFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        if results.len() != self.samples.len() {
            let e: SpotError = ValidationError::ShapeMismatch {
                expected: self.samples.len(),
                actual: results.len(),
            }
            .into();
            self.bus.publish(StateEvent::MeasurementFailed {
                reason: e.to_string(),
            });
            return Err(e);
        }

        let regions: usize = results.iter().map(MeasurementResult::region_count).sum();
        for (sample, result) in self.samples.iter_mut().zip(results) {
            sample.set_measurements(result);
        }

        self.bus.publish(StateEvent::MeasurementsReady {
            samples: self.samples.len(),
            regions,
        });
        Ok(regions)
    }

    /// Result rows of every measured sample, keyed by sample name, in load order.
    pub fn results_view(&self) -> Vec<(String, Vec<ResultRow>)> {
        self.samples
            .iter()
            .filter_map(|s| s.measurements().map(|m| (s.name().to_string(), m.rows())))
            .collect()
    }

    /// Renders sample `name` with region `region_index` highlighted against `base`.
    pub fn render_selection(&self, name: &str, region_index: usize, base: Ink) -> SpotResult<GrayImage> {
        let sample = &self.samples[self.sample_index(name)?];
        let result = sample
            .measurements()
            .ok_or_else(|| ValidationError::NoMeasurements(name.to_string()))?;

        let names: Vec<String> = result.regions.iter().map(|r| r.display_id.clone()).collect();
        let centroids: Vec<_> = result.regions.iter().map(|r| r.centroid).collect();
        overlay::overlay_selected(
            sample.original_image(),
            &result.labeled,
            &names,
            &centroids,
            region_index,
            base,
            &self.config.overlay_style(),
        )
    }

    pub fn display_image(&self, name: &str, mode: DisplayMode) -> Option<&GrayImage> {
        self.sample(name).and_then(|s| s.display_image(mode))
    }
}
