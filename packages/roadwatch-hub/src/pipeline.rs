use crate::batch::BatchBuffer;
use crate::classifier::{Classifier, ClassifierConfig};
use crate::traits::{HubError, HubResult};
use crate::types::{Batch, RawSample, RoadState};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the ingest pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Records per batch
    pub batch_size: usize,
    pub classifier: ClassifierConfig,
    /// Flush a partial batch after this long without new samples.
    /// `None` keeps strict count-only batching.
    pub flush_interval: Option<Duration>,
    /// Capacity of the inbound sample channel
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            classifier: ClassifierConfig::default(),
            flush_interval: Some(Duration::from_secs(5)),
            channel_capacity: 1024,
        }
    }
}

/// Counters reported when the pipeline stops
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineSummary {
    pub samples: u64,
    pub anomalies: u64,
    pub batches: u64,
    /// Records still buffered (and dropped) at shutdown
    pub unflushed: usize,
}

/// Cloneable entry point for sample producers
#[derive(Clone)]
pub struct Ingestor {
    sender: mpsc::Sender<RawSample>,
}

impl Ingestor {
    pub async fn submit(&self, sample: RawSample) -> HubResult<()> {
        self.sender
            .send(sample)
            .await
            .map_err(|_| HubError::ChannelClosed)
    }

    pub fn sender(&self) -> mpsc::Sender<RawSample> {
        self.sender.clone()
    }
}

/// Spawn the classify-and-batch task. Complete batches are forwarded to
/// `batches` in flush order.
pub fn spawn_pipeline(
    config: PipelineConfig,
    batches: mpsc::Sender<Batch>,
) -> (Ingestor, JoinHandle<PipelineSummary>) {
    let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
    let handle = tokio::spawn(run_pipeline(config, receiver, batches));
    (Ingestor { sender }, handle)
}

async fn run_pipeline(
    config: PipelineConfig,
    mut samples: mpsc::Receiver<RawSample>,
    batches: mpsc::Sender<Batch>,
) -> PipelineSummary {
    let classifier = Classifier::new(config.classifier);
    let mut buffer = BatchBuffer::new(config.batch_size);
    let mut summary = PipelineSummary::default();

    info!(
        "Pipeline started: batch_size={}, baseline={}, tolerance={}, flush_interval={:?}",
        buffer.capacity(),
        classifier.config().baseline,
        classifier.config().tolerance,
        config.flush_interval
    );

    loop {
        let next = match config.flush_interval {
            Some(idle) if !buffer.is_empty() => {
                match tokio::time::timeout(idle, samples.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        if let Some(batch) = buffer.flush_partial() {
                            debug!("Idle flush of {} records", batch.len());
                            if !forward(&batches, batch, &mut summary).await {
                                break;
                            }
                        }
                        continue;
                    }
                }
            }
            _ => samples.recv().await,
        };

        let Some(sample) = next else {
            break;
        };

        summary.samples += 1;
        let record = classifier.classify(sample);
        if record.road_state != RoadState::Normal {
            summary.anomalies += 1;
            debug!(
                "Classified {} at z={}",
                record.road_state,
                record.sample.accelerometer().z
            );
        }

        if let Some(batch) = buffer.accept(record) {
            if !forward(&batches, batch, &mut summary).await {
                break;
            }
        }
    }

    if config.flush_interval.is_some() {
        if let Some(batch) = buffer.flush_partial() {
            forward(&batches, batch, &mut summary).await;
        }
    } else if !buffer.is_empty() {
        warn!(
            "Input closed with {} records below batch size; dropping them",
            buffer.len()
        );
    }

    summary.unflushed = buffer.len();
    info!(
        "Pipeline stopped: {} samples, {} anomalies, {} batches",
        summary.samples, summary.anomalies, summary.batches
    );
    summary
}

async fn forward(
    batches: &mpsc::Sender<Batch>,
    batch: Batch,
    summary: &mut PipelineSummary,
) -> bool {
    if batches.send(batch).await.is_err() {
        warn!("Distributor channel closed, stopping pipeline");
        return false;
    }
    summary.batches += 1;
    true
}
