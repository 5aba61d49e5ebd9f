// Sample sources feeding the ingest pipeline.
//
// A source pushes validated `RawSample`s into the pipeline channel in order.
// Rows that fail validation are logged and skipped; they never stop the
// stream.

use crate::traits::{HubError, HubResult};
use crate::types::{Accelerometer, Gps, RawSample};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

/// Trait for all sample sources
#[async_trait]
pub trait SampleSource: Send {
    /// Stream samples into `sender` until the source is exhausted or the
    /// receiver goes away.
    async fn start(&mut self, sender: mpsc::Sender<RawSample>) -> HubResult<()>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct AccelerometerRow {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct GpsRow {
    latitude: f64,
    longitude: f64,
}

/// Replays recorded accelerometer and GPS CSV files as a live feed.
///
/// Both files need a header row (`x,y,z` and `latitude,longitude`, any
/// column order). The GPS track is cycled when it is shorter than the
/// accelerometer recording. Samples are stamped with the replay time.
pub struct FileReplaySource {
    accelerometer_path: PathBuf,
    gps_path: PathBuf,
    delay: Option<Duration>,
    loop_playback: bool,
}

impl FileReplaySource {
    pub fn new(
        accelerometer_path: impl Into<PathBuf>,
        gps_path: impl Into<PathBuf>,
        delay: Option<Duration>,
        loop_playback: bool,
    ) -> Self {
        Self {
            accelerometer_path: accelerometer_path.into(),
            gps_path: gps_path.into(),
            delay,
            loop_playback,
        }
    }

    async fn load(&self) -> HubResult<(Vec<AccelerometerRow>, Vec<GpsRow>)> {
        let accel_path = self.accelerometer_path.clone();
        let gps_path = self.gps_path.clone();

        tokio::task::spawn_blocking(move || -> HubResult<_> {
            Ok((read_rows(&accel_path)?, read_rows(&gps_path)?))
        })
        .await
        .map_err(|e| HubError::Io(std::io::Error::other(e)))?
    }
}

fn read_rows<T>(path: &Path) -> HubResult<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut rows = Vec::new();
    for (line, row) in reader.deserialize().enumerate() {
        match row {
            Ok(row) => rows.push(row),
            // +2: header line and 1-based numbering
            Err(e) => warn!("Skipping {}:{}: {}", path.display(), line + 2, e),
        }
    }
    Ok(rows)
}

#[async_trait]
impl SampleSource for FileReplaySource {
    async fn start(&mut self, sender: mpsc::Sender<RawSample>) -> HubResult<()> {
        let (accel, gps) = self.load().await?;

        if accel.is_empty() || gps.is_empty() {
            warn!(
                "Nothing to replay: {} accelerometer rows, {} GPS rows",
                accel.len(),
                gps.len()
            );
            return Ok(());
        }

        info!(
            "Replaying {} accelerometer rows against {} GPS rows",
            accel.len(),
            gps.len()
        );

        loop {
            for (i, row) in accel.iter().enumerate() {
                let fix = gps[i % gps.len()];
                let sample = RawSample::with_timestamp(
                    Accelerometer {
                        x: row.x,
                        y: row.y,
                        z: row.z,
                    },
                    Gps {
                        latitude: fix.latitude,
                        longitude: fix.longitude,
                    },
                    Utc::now(),
                );

                let sample = match sample {
                    Ok(sample) => sample,
                    Err(e) => {
                        warn!("Skipping replay row {}: {}", i, e);
                        continue;
                    }
                };

                if sender.send(sample).await.is_err() {
                    warn!("Pipeline closed, stopping replay");
                    return Ok(());
                }

                if let Some(delay) = self.delay {
                    sleep(delay).await;
                }
            }

            if !self.loop_playback {
                info!("Replay finished");
                return Ok(());
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "file replay ({} + {})",
            self.accelerometer_path.display(),
            self.gps_path.display()
        )
    }
}
