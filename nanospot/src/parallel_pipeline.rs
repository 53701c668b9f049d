// THEORY:
// Frames of a stack are independent once their masks exist, so the per-frame
// stage (labeling, region properties, nearest neighbours) can run on a pool of
// workers. A dispatcher hands tasks out round-robin; each task carries a oneshot
// channel for its result. Results are awaited in submission order so the batch
// comes back in frame order no matter which worker finished first.
//
// The batch stays all-or-nothing: the first failing frame fails the whole run.

use crate::config::MeasurementConfig;
use crate::core_modules::feature_extractor::threshold_above;
use crate::error::{SpotError, SpotResult};
use crate::pipeline::{self, BatchAnalysis, FrameAnalysis, FrameInput, MeasurementPipeline};
use crate::sample::MeasurementResult;
use futures::future::try_join_all;
use image::GrayImage;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

pub struct FrameTask {
    pub frame_index: usize,
    pub mask: GrayImage,
    pub result_sender: oneshot::Sender<SpotResult<FrameAnalysis>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<FrameTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers and their dispatcher. Must be called inside a
    /// tokio runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<FrameTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..size)
            .map(|_| mpsc::unbounded_channel::<FrameTask>())
            .unzip();

        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % size;
            }
        });

        let mut workers = Vec::with_capacity(size);
        for (worker_id, mut worker_receiver) in worker_receivers.into_iter().enumerate() {
            let worker = tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let FrameTask {
                        frame_index,
                        mask,
                        result_sender,
                    } = task;
                    debug!(worker_id, frame = frame_index, "worker picked up frame");
                    let analysis = tokio::task::spawn_blocking(move || pipeline::analyze_frame(&mask))
                        .await
                        .unwrap_or_else(|e| Err(SpotError::computation("frame worker", e)));
                    let _ = result_sender.send(analysis);
                }
            });
            workers.push(worker);
        }

        Self {
            task_sender,
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub async fn process_frame(&self, frame_index: usize, mask: GrayImage) -> SpotResult<FrameAnalysis> {
        let (result_sender, result_receiver) = oneshot::channel();
        let task = FrameTask {
            frame_index,
            mask,
            result_sender,
        };

        self.task_sender
            .send(task)
            .map_err(|_| SpotError::computation("frame dispatch", "worker pool is closed"))?;

        result_receiver
            .await
            .map_err(|e| SpotError::computation("frame dispatch", e))?
    }

    /// Analyses every mask on the pool. Results come back in input order.
    pub async fn analyze(&self, masks: Vec<GrayImage>) -> SpotResult<BatchAnalysis> {
        let pending = masks.into_iter().enumerate().map(|(index, mask)| async move {
            self.process_frame(index, mask).await.inspect_err(|e| {
                error!(frame = index, error = %e, "frame analysis failed, aborting batch");
            })
        });
        let frames = try_join_all(pending).await?;
        Ok(frames.into_iter().collect())
    }
}

/// Convenience wrapper: builds a pool of `workers`, analyses, and drops the pool.
pub async fn analyze_parallel(masks: Vec<GrayImage>, workers: usize) -> SpotResult<BatchAnalysis> {
    let pool = WorkerPool::new(workers);
    pool.analyze(masks).await
}

/// A `MeasurementPipeline` whose per-frame stage runs on a worker pool.
pub struct ParallelPipeline {
    pipeline: MeasurementPipeline,
    worker_pool: WorkerPool,
}

impl ParallelPipeline {
    /// Must be called inside a tokio runtime.
    pub fn new(config: MeasurementConfig) -> Self {
        let worker_pool = WorkerPool::new(config.worker_count());
        info!(workers = worker_pool.size(), "parallel pipeline started");
        Self {
            pipeline: MeasurementPipeline::new(config),
            worker_pool,
        }
    }

    pub fn config(&self) -> &MeasurementConfig {
        self.pipeline.config()
    }

    pub async fn run(&self, inputs: &[FrameInput]) -> SpotResult<Vec<MeasurementResult>> {
        let cutoff = self.config().foreground_cutoff;
        let masks: Vec<GrayImage> = inputs
            .iter()
            .map(|i| threshold_above(&i.analysis, cutoff))
            .collect();

        let batch = self.worker_pool.analyze(masks).await?;
        let results = self.pipeline.finish(inputs, batch)?;

        let regions: usize = results.iter().map(MeasurementResult::region_count).sum();
        info!(frames = results.len(), regions, "parallel detection run complete");
        Ok(results)
    }
}
