pub mod app;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod distributor;
pub mod handlers;
pub mod memory;
pub mod pipeline;
pub mod postgres;
pub mod registry;
pub mod source;
pub mod traits;
pub mod types;
pub mod websocket;

pub use app::HubApp;
pub use batch::BatchBuffer;
pub use classifier::{Classifier, ClassifierConfig};
pub use config::{ConfigError, HubConfig, ReplayConfig};
pub use distributor::{DeliveryError, DistributionResult, Distributor};
pub use memory::MemoryRecordStore;
pub use pipeline::{Ingestor, PipelineConfig, PipelineSummary};
pub use postgres::PostgresRecordStore;
pub use registry::{SubscriberHandle, SubscriberRegistry, Subscription};
pub use source::{FileReplaySource, SampleSource};
pub use traits::{HubError, HubResult, RecordStore, StoreError, StoreResult};
pub use types::*;
pub use websocket::{handle_websocket, HubState};
