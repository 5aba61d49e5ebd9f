use clap::Parser;
use roadwatch_hub::{
    FileReplaySource, HubApp, HubConfig, MemoryRecordStore, PostgresRecordStore, RecordStore,
    ReplayConfig, SampleSource,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Road-surface telemetry hub
#[derive(Debug, Parser)]
#[command(name = "roadwatch-hub", version, about)]
struct Cli {
    /// Port to listen on (overrides ROADWATCH_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Bind address (overrides ROADWATCH_BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,

    /// Records per batch (overrides BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Accelerometer CSV to replay (requires --replay-gps)
    #[arg(long, requires = "replay_gps")]
    replay_accelerometer: Option<PathBuf>,

    /// GPS CSV to replay (requires --replay-accelerometer)
    #[arg(long, requires = "replay_accelerometer")]
    replay_gps: Option<PathBuf>,

    /// Delay between replayed samples in milliseconds
    #[arg(long, default_value_t = 100)]
    replay_delay_ms: u64,

    /// Restart the replay when the recording ends
    #[arg(long)]
    replay_loop: bool,
}

impl Cli {
    fn apply(self, config: &mut HubConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let (Some(accelerometer_path), Some(gps_path)) =
            (self.replay_accelerometer, self.replay_gps)
        {
            config.replay = Some(ReplayConfig {
                accelerometer_path,
                gps_path,
                delay_ms: self.replay_delay_ms,
                loop_playback: self.replay_loop,
            });
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roadwatch_hub=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = HubConfig::from_env()?;
    cli.apply(&mut config);
    config.validate()?;

    info!("Starting Roadwatch hub v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "   Batch size: {}, baseline: {}, tolerance: {}",
        config.batch_size, config.road_baseline, config.road_tolerance
    );

    let store = open_store(&config).await?;
    let app = HubApp::start(&config, store);

    let replay_task = config.replay.clone().map(|replay| {
        let sender = app.state.ingestor.sender();
        tokio::spawn(async move {
            let mut source = FileReplaySource::new(
                replay.accelerometer_path,
                replay.gps_path,
                Some(Duration::from_millis(replay.delay_ms)),
                replay.loop_playback,
            );
            info!("Sample source: {}", source.describe());
            if let Err(e) = source.start(sender).await {
                error!("Replay failed: {}", e);
            }
        })
    });

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.router().into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The replay task owns an ingest sender; the pipeline only drains once it is gone
    if let Some(task) = replay_task {
        task.abort();
        let _ = task.await;
    }

    info!("Draining pipeline and distributor...");
    let summary = app.shutdown().await;
    info!(
        "Hub stopped: {} samples, {} anomalies, {} batches, {} records dropped unflushed",
        summary.samples, summary.anomalies, summary.batches, summary.unflushed
    );
    Ok(())
}

async fn open_store(config: &HubConfig) -> anyhow::Result<Arc<dyn RecordStore>> {
    let Some(database_url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set; records are kept in memory only");
        return Ok(Arc::new(MemoryRecordStore::new()));
    };

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    let store = PostgresRecordStore::new(pool);
    store.initialize().await?;
    store.ping().await?;
    info!("Database schema initialized");

    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
