use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Identifier of a persisted record
pub type RecordId = i64;

/// Errors raised while constructing a [`RawSample`] at the ingestion boundary
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid timestamp format {0:?}. Expected ISO 8601 format (YYYY-MM-DDTHH:MM:SSZ)")]
    InvalidTimestamp(String),

    #[error("Field {0} must be a finite number")]
    NonFinite(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Accelerometer {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gps {
    pub latitude: f64,
    pub longitude: f64,
}

impl Gps {
    /// `(0, 0)` is what the vehicle agent reports when it has no fix
    pub fn has_fix(&self) -> bool {
        !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

/// One fused accelerometer + GPS reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSampleWire")]
pub struct RawSample {
    accelerometer: Accelerometer,
    gps: Gps,
    timestamp: DateTime<Utc>,
}

/// Unvalidated wire form of a sample, as posted by agents
#[derive(Debug, Clone, Deserialize)]
struct RawSampleWire {
    accelerometer: Accelerometer,
    gps: Gps,
    #[serde(deserialize_with = "deserialize_timestamp_text")]
    timestamp: String,
}

impl TryFrom<RawSampleWire> for RawSample {
    type Error = ValidationError;

    fn try_from(wire: RawSampleWire) -> Result<Self, Self::Error> {
        RawSample::new(wire.accelerometer, wire.gps, &wire.timestamp)
    }
}

/// Accepts any JSON scalar so that a numeric timestamp reaches validation
/// and fails there with a readable message instead of a type error.
fn deserialize_timestamp_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

impl RawSample {
    /// Validate and build a sample. The timestamp must be ISO 8601.
    pub fn new(
        accelerometer: Accelerometer,
        gps: Gps,
        timestamp: &str,
    ) -> Result<Self, ValidationError> {
        let timestamp = parse_timestamp(timestamp)?;
        Self::with_timestamp(accelerometer, gps, timestamp)
    }

    pub fn with_timestamp(
        accelerometer: Accelerometer,
        gps: Gps,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let fields = [
            ("accelerometer.x", accelerometer.x),
            ("accelerometer.y", accelerometer.y),
            ("accelerometer.z", accelerometer.z),
            ("gps.latitude", gps.latitude),
            ("gps.longitude", gps.longitude),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ValidationError::NonFinite(*name));
        }

        Ok(Self {
            accelerometer,
            gps,
            timestamp,
        })
    }

    pub fn accelerometer(&self) -> &Accelerometer {
        &self.accelerometer
    }

    pub fn gps(&self) -> &Gps {
        &self.gps
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Parse an ISO 8601 timestamp. Offsets are normalized to UTC; a timestamp
/// without an offset is taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ValidationError::InvalidTimestamp(value.to_string()))
}

/// Road surface state assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoadState {
    Normal,
    Bump,
    Pothole,
}

impl RoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoadState::Normal => "normal",
            RoadState::Bump => "bump",
            RoadState::Pothole => "pothole",
        }
    }
}

impl std::fmt::Display for RoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(RoadState::Normal),
            "bump" => Ok(RoadState::Bump),
            "pothole" => Ok(RoadState::Pothole),
            other => Err(format!("Unknown road state: {}", other)),
        }
    }
}

/// A sample annotated with its road state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub road_state: RoadState,
    #[serde(rename = "agent_data")]
    pub sample: RawSample,
}

/// A group of records flushed from the batch buffer as a unit.
///
/// Serializes as a bare JSON array so one broadcast frame maps to one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Batch {
    #[serde(skip)]
    id: Uuid,
    records: Vec<ClassifiedRecord>,
}

impl Batch {
    pub fn new(records: Vec<ClassifiedRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            records,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn records(&self) -> &[ClassifiedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Flattened row form of a record as kept by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub road_state: RoadState,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl StoredRecord {
    pub fn from_record(id: RecordId, record: &ClassifiedRecord) -> Self {
        let accel = record.sample.accelerometer();
        let gps = record.sample.gps();
        Self {
            id,
            road_state: record.road_state,
            x: accel.x,
            y: accel.y,
            z: accel.z,
            latitude: gps.latitude,
            longitude: gps.longitude,
            timestamp: record.sample.timestamp(),
        }
    }
}
