use clap::{Args, Parser, Subcommand};
use roadwatch_mapview::DetectorConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "roadwatch-mapview",
    version,
    about = "Detect bumps and potholes in the Roadwatch hub stream",
    long_about = "Subscribes to the hub broadcast (or replays recorded CSV files) and logs\n\
                  every detected road anomaly with its GPS position."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub detector: DetectorArgs,
}

#[derive(Subcommand)]
pub enum Command {
    /// Follow the live hub stream
    Live(LiveArgs),
    /// Run the detector over recorded accelerometer and GPS files
    Replay(ReplayArgs),
}

#[derive(Args)]
pub struct DetectorArgs {
    /// Samples per analysis window
    #[arg(long, default_value_t = 30, global = true)]
    pub window: usize,

    /// Minimum peak prominence
    #[arg(long, default_value_t = 1500.0, global = true)]
    pub prominence: f64,

    /// Minimum peak width at half prominence, in samples
    #[arg(long, default_value_t = 1.0, global = true)]
    pub width: f64,
}

impl DetectorArgs {
    pub fn config(&self) -> DetectorConfig {
        DetectorConfig {
            window: self.window,
            prominence: self.prominence,
            min_width: self.width,
        }
    }
}

#[derive(Args)]
pub struct LiveArgs {
    /// Hub WebSocket endpoint
    #[arg(long, default_value = "ws://localhost:8000/ws")]
    pub url: String,

    /// Keep reconnecting when the hub goes away
    #[arg(long)]
    pub reconnect: bool,
}

#[derive(Args)]
pub struct ReplayArgs {
    /// Accelerometer CSV (needs a `z` column)
    #[arg(long)]
    pub accelerometer: PathBuf,

    /// GPS CSV (`latitude` and `longitude` columns)
    #[arg(long)]
    pub gps: PathBuf,

    /// Playback rate in samples per second (0 = as fast as possible)
    #[arg(long, default_value_t = 100)]
    pub rate_hz: u32,
}
