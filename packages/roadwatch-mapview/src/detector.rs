// Sliding-window road anomaly detection.
//
// Polarity matches the hub classifier: a dip in z (local minimum) is a
// bump, a spike (local maximum) is a pothole.

use crate::alignment::gps_index;
use crate::client::FeedEvent;
use crate::peaks::{find_peaks, PeakCriteria};
use roadwatch_hub::{ClassifiedRecord, Gps};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Detector tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Samples collected before each analysis pass
    pub window: usize,
    /// Minimum peak prominence, in accelerometer units
    pub prominence: f64,
    /// Minimum peak width at half prominence, in samples
    pub min_width: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window: 30,
            prominence: 1500.0,
            min_width: 1.0,
        }
    }
}

impl DetectorConfig {
    fn criteria(&self) -> PeakCriteria {
        PeakCriteria {
            prominence: self.prominence,
            width: self.min_width,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Bump,
    Pothole,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyKind::Bump => f.write_str("bump"),
            AnomalyKind::Pothole => f.write_str("pothole"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `None` for the agent's no-fix reading
    pub fn from_gps(gps: &Gps) -> Option<Self> {
        gps.has_fix()
            .then(|| Self::new(gps.latitude, gps.longitude))
    }
}

/// A located road anomaly, ready to be put on a map
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalyEvent {
    pub kind: AnomalyKind,
    pub coordinate: Coordinate,
}

/// z readings and their positions, kept index-aligned
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow {
    z: Vec<f64>,
    coordinates: Vec<Option<Coordinate>>,
}

impl SlidingWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            z: Vec::with_capacity(capacity),
            coordinates: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, z: f64, coordinate: Option<Coordinate>) {
        self.z.push(z);
        self.coordinates.push(coordinate);
    }

    pub fn z_series(&self) -> &[f64] {
        &self.z
    }

    pub fn coordinates(&self) -> &[Option<Coordinate>] {
        &self.coordinates
    }

    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }

    pub fn clear(&mut self) {
        self.z.clear();
        self.coordinates.clear();
    }
}

/// Run peak detection over one window.
///
/// Peaks at an index without a position produce no event. Events come out
/// in window-index order.
pub fn detect(
    z: &[f64],
    coordinates: &[Option<Coordinate>],
    config: &DetectorConfig,
) -> Vec<AnomalyEvent> {
    let criteria = config.criteria();
    let negated: Vec<f64> = z.iter().map(|v| -v).collect();

    let mut found: Vec<(usize, AnomalyKind)> = find_peaks(&negated, &criteria)
        .into_iter()
        .map(|peak| (peak.index, AnomalyKind::Bump))
        .chain(
            find_peaks(z, &criteria)
                .into_iter()
                .map(|peak| (peak.index, AnomalyKind::Pothole)),
        )
        .collect();
    found.sort_by_key(|(index, _)| *index);

    found
        .into_iter()
        .filter_map(|(index, kind)| match coordinates.get(index).copied().flatten() {
            Some(coordinate) => Some(AnomalyEvent { kind, coordinate }),
            None => {
                debug!("Dropping {} at index {} without a GPS fix", kind, index);
                None
            }
        })
        .collect()
}

/// Output of the live detector: where the vehicle is, and what it found
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapUpdate {
    Position(Coordinate),
    Anomaly(AnomalyEvent),
}

/// Accumulates the broadcast stream and reports anomalies window by window
pub struct AnomalyDetector {
    config: DetectorConfig,
    window: SlidingWindow,
    last_position: Option<Coordinate>,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let config = DetectorConfig {
            window: config.window.max(1),
            ..config
        };
        Self {
            window: SlidingWindow::with_capacity(config.window + 1),
            config,
            last_position: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Most recent GPS fix seen, if any
    pub fn last_position(&self) -> Option<Coordinate> {
        self.last_position
    }

    /// Drop the partially filled window. Used when the stream has a gap, so
    /// samples from both sides never land in one analysis.
    pub fn reset(&mut self) -> usize {
        let discarded = self.window.len();
        self.window.clear();
        discarded
    }

    /// Feed one classified record
    pub fn observe(&mut self, record: &ClassifiedRecord) -> Vec<AnomalyEvent> {
        let z = record.sample.accelerometer().z;
        self.observe_sample(z, Coordinate::from_gps(record.sample.gps()))
    }

    /// Feed a whole broadcast batch in order
    pub fn observe_batch(&mut self, records: &[ClassifiedRecord]) -> Vec<AnomalyEvent> {
        records
            .iter()
            .flat_map(|record| self.observe(record))
            .collect()
    }

    /// Feed one reading. Once the window grows past its configured length
    /// it is analyzed and cleared.
    pub fn observe_sample(&mut self, z: f64, coordinate: Option<Coordinate>) -> Vec<AnomalyEvent> {
        if coordinate.is_some() {
            self.last_position = coordinate;
        }
        self.window.push(z, coordinate);
        if self.window.len() <= self.config.window {
            return Vec::new();
        }

        let events = detect(
            self.window.z_series(),
            self.window.coordinates(),
            &self.config,
        );
        debug!(
            "Analyzed {} samples, {} anomalies",
            self.window.len(),
            events.len()
        );
        self.window.clear();
        events
    }

    /// Feed an accelerometer series recorded at a different rate from its
    /// GPS track, pairing each reading with its proportionally aligned fix.
    pub fn observe_series(&mut self, z: &[f64], gps: &[Gps]) -> Vec<AnomalyEvent> {
        z.iter()
            .enumerate()
            .flat_map(|(i, &value)| {
                let coordinate = gps_index(i, z.len(), gps.len())
                    .and_then(|g| Coordinate::from_gps(&gps[g]));
                self.observe_sample(value, coordinate)
            })
            .collect()
    }
}

/// Consume the hub feed in broadcast order. After each batch the anomalies
/// it completed are forwarded, followed by the vehicle's latest position. A
/// reconnect clears the window. Returns the detector once the feed ends or
/// `updates` is dropped.
pub async fn run_detector(
    mut detector: AnomalyDetector,
    mut feed: mpsc::Receiver<FeedEvent>,
    updates: mpsc::Sender<MapUpdate>,
) -> AnomalyDetector {
    while let Some(event) = feed.recv().await {
        let batch = match event {
            FeedEvent::Connected => {
                let discarded = detector.reset();
                if discarded > 0 {
                    debug!("Stream reconnected, discarded {} buffered samples", discarded);
                }
                continue;
            }
            FeedEvent::Batch(batch) => batch,
        };

        let anomalies = detector.observe_batch(&batch);
        let position = detector.last_position().map(MapUpdate::Position);
        for update in anomalies.into_iter().map(MapUpdate::Anomaly).chain(position) {
            if updates.send(update).await.is_err() {
                return detector;
            }
        }
    }
    detector
}
