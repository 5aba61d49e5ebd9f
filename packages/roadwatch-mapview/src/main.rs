use clap::Parser;
use roadwatch_mapview::{
    run_detector, AnomalyDetector, AnomalyEvent, Coordinate, HubSubscriber, MapUpdate, Recording,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Cli, Command, LiveArgs, ReplayArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roadwatch_mapview=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let detector = AnomalyDetector::new(cli.detector.config());
    info!(
        "Detector: window={}, prominence={}, width={}",
        detector.config().window,
        detector.config().prominence,
        detector.config().min_width
    );

    match cli.command {
        Command::Live(args) => live(args, detector).await,
        Command::Replay(args) => replay(args, detector).await,
    }
}

fn log_event(event: &AnomalyEvent) {
    info!(
        "{} at ({:.6}, {:.6})",
        event.kind, event.coordinate.latitude, event.coordinate.longitude
    );
}

fn log_position(position: &Coordinate) {
    debug!(
        "Vehicle at ({:.6}, {:.6})",
        position.latitude, position.longitude
    );
}

async fn live(args: LiveArgs, detector: AnomalyDetector) -> anyhow::Result<()> {
    let (feed_tx, feed_rx) = mpsc::channel(64);
    let (update_tx, mut update_rx) = mpsc::channel(256);

    let subscriber = HubSubscriber::new(args.url, args.reconnect);
    let stream = tokio::spawn(async move { subscriber.run(feed_tx).await });
    let detection = tokio::spawn(run_detector(detector, feed_rx, update_tx));

    while let Some(update) = update_rx.recv().await {
        match update {
            MapUpdate::Position(position) => log_position(&position),
            MapUpdate::Anomaly(event) => log_event(&event),
        }
    }

    detection.await?;
    if let Err(e) = stream.await? {
        error!("Hub stream failed: {}", e);
        return Err(e.into());
    }
    info!("Hub stream ended");
    Ok(())
}

async fn replay(args: ReplayArgs, mut detector: AnomalyDetector) -> anyhow::Result<()> {
    let recording = Recording::load(&args.accelerometer, &args.gps)?;
    info!(
        "Replaying {} accelerometer readings against {} GPS fixes",
        recording.len(),
        recording.gps.len()
    );

    let delay = (args.rate_hz > 0).then(|| Duration::from_secs(1) / args.rate_hz);
    let mut found = 0usize;
    for (z, coordinate) in recording.samples() {
        if let Some(position) = &coordinate {
            log_position(position);
        }
        for event in detector.observe_sample(z, coordinate) {
            log_event(&event);
            found += 1;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    info!("Replay finished: {} anomalies", found);
    Ok(())
}
