use crate::config::HubConfig;
use crate::distributor::{spawn_distributor, Distributor};
use crate::handlers::build_router;
use crate::pipeline::{spawn_pipeline, PipelineSummary};
use crate::registry::SubscriberRegistry;
use crate::traits::RecordStore;
use crate::websocket::HubState;
use axum::Router;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

/// Flushed batches waiting for the distributor
const BATCH_CHANNEL_CAPACITY: usize = 64;

/// A running hub: pipeline and distributor tasks plus the state handed to
/// the HTTP layer
pub struct HubApp {
    pub state: HubState,
    pub pipeline: JoinHandle<PipelineSummary>,
    pub distributor: JoinHandle<()>,
}

impl HubApp {
    /// Wire up registry, distributor and ingest pipeline and start their tasks
    pub fn start(config: &HubConfig, store: Arc<dyn RecordStore>) -> Self {
        let registry =
            SubscriberRegistry::with_limits(config.max_subscribers, config.subscriber_queue_depth);
        let distributor = Distributor::new(store.clone(), registry.clone(), config.send_timeout())
            .with_persist_timeout(config.persist_timeout());

        let (batch_tx, batch_rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let distributor_task = spawn_distributor(distributor.clone(), batch_rx);
        let (ingestor, pipeline) = spawn_pipeline(config.pipeline_config(), batch_tx);

        Self {
            state: HubState {
                registry,
                store,
                ingestor,
                distributor,
            },
            pipeline,
            distributor: distributor_task,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Stop accepting samples and drain the pipeline and distributor.
    ///
    /// Every other `Ingestor` clone must be gone first, otherwise the
    /// pipeline never sees its input close.
    pub async fn shutdown(self) -> PipelineSummary {
        let Self {
            state,
            pipeline,
            distributor,
        } = self;
        drop(state);

        let summary = match pipeline.await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Pipeline task failed: {}", e);
                PipelineSummary::default()
            }
        };
        if let Err(e) = distributor.await {
            error!("Distributor task failed: {}", e);
        }
        summary
    }
}
