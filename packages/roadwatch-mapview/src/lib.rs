pub mod alignment;
pub mod client;
pub mod detector;
pub mod error;
pub mod peaks;
pub mod replay;

pub use alignment::{align, gps_index};
pub use client::{decode_batch, FeedEvent, HubSubscriber};
pub use detector::{
    detect, run_detector, AnomalyDetector, AnomalyEvent, AnomalyKind, Coordinate, DetectorConfig,
    MapUpdate, SlidingWindow,
};
pub use error::{MapviewError, MapviewResult};
pub use peaks::{find_peaks, local_maxima, Peak, PeakCriteria};
pub use replay::Recording;
