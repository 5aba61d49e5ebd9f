// Offline emulation: drive the detector from recorded CSV files instead of
// the live hub stream.

use crate::alignment::gps_index;
use crate::detector::Coordinate;
use crate::error::MapviewResult;
use roadwatch_hub::Gps;
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct AccelerometerRow {
    z: f64,
}

#[derive(Debug, Deserialize)]
struct GpsRow {
    latitude: f64,
    longitude: f64,
}

/// Rows parsed from a recording; `csv` accepts `NaN` and `inf` as floats
trait Row: for<'de> Deserialize<'de> {
    fn is_finite(&self) -> bool;
}

impl Row for AccelerometerRow {
    fn is_finite(&self) -> bool {
        self.z.is_finite()
    }
}

impl Row for GpsRow {
    fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// A recorded drive: accelerometer z readings and a (usually sparser) GPS
/// track
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub z: Vec<f64>,
    pub gps: Vec<Gps>,
}

impl Recording {
    /// Load `z` from an accelerometer CSV and fixes from a GPS CSV. Columns
    /// are matched by header name; malformed and non-finite rows are skipped.
    pub fn load(accelerometer: &Path, gps: &Path) -> MapviewResult<Self> {
        let z = read_rows::<AccelerometerRow>(accelerometer)?
            .into_iter()
            .map(|row| row.z)
            .collect();
        let gps = read_rows::<GpsRow>(gps)?
            .into_iter()
            .map(|row| Gps {
                latitude: row.latitude,
                longitude: row.longitude,
            })
            .collect();
        Ok(Self { z, gps })
    }

    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }

    /// Readings in order, each paired with its proportionally aligned fix
    pub fn samples(&self) -> impl Iterator<Item = (f64, Option<Coordinate>)> + '_ {
        self.z.iter().enumerate().map(move |(i, &z)| {
            let coordinate = gps_index(i, self.z.len(), self.gps.len())
                .and_then(|g| Coordinate::from_gps(&self.gps[g]));
            (z, coordinate)
        })
    }
}

fn read_rows<T: Row>(path: &Path) -> MapviewResult<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut rows = Vec::new();
    for (line, row) in reader.deserialize::<T>().enumerate() {
        match row {
            Ok(row) if row.is_finite() => rows.push(row),
            Ok(_) => warn!("Skipping {}:{}: non-finite value", path.display(), line + 2),
            Err(e) => warn!("Skipping {}:{}: {}", path.display(), line + 2, e),
        }
    }
    Ok(rows)
}
