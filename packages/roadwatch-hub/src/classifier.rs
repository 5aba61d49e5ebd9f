use crate::types::{ClassifiedRecord, RawSample, RoadState};
use serde::{Deserialize, Serialize};

/// Calibration for the road state classifier.
///
/// `baseline` is the resting z reading of the accelerometer for a given
/// vehicle/sensor; readings further than `tolerance` from it are anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub baseline: f64,
    pub tolerance: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            baseline: 16541.0,
            tolerance: 1500.0,
        }
    }
}

/// Maps raw samples to road states by thresholding the vertical axis
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Label for a single z reading
    pub fn road_state(&self, z: f64) -> RoadState {
        let ClassifierConfig {
            baseline,
            tolerance,
        } = self.config;

        if z < baseline - tolerance {
            RoadState::Bump
        } else if z > baseline + tolerance {
            RoadState::Pothole
        } else {
            RoadState::Normal
        }
    }

    pub fn classify(&self, sample: RawSample) -> ClassifiedRecord {
        ClassifiedRecord {
            road_state: self.road_state(sample.accelerometer().z),
            sample,
        }
    }
}
