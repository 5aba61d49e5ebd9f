use futures_util::StreamExt;
use roadwatch_hub::{
    Accelerometer, Gps, HubApp, HubConfig, MemoryRecordStore, RawSample, RecordStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

async fn serve(config: HubConfig) -> (HubApp, String) {
    let app = HubApp::start(&config, Arc::new(MemoryRecordStore::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (app, format!("ws://{}/ws", addr))
}

async fn wait_for_subscribers(app: &HubApp, count: usize) {
    for _ in 0..100 {
        if app.state.registry.connection_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} subscribers, have {}",
        count,
        app.state.registry.connection_count()
    );
}

fn sample(z: f64) -> RawSample {
    RawSample::new(
        Accelerometer { x: 0.0, y: 0.0, z },
        Gps {
            latitude: 50.45,
            longitude: 30.52,
        },
        "2024-02-28T12:30:00Z",
    )
    .unwrap()
}

#[tokio::test]
async fn test_subscriber_receives_full_batch_as_one_frame() {
    let config = HubConfig {
        batch_size: 5,
        flush_interval_ms: 0,
        ..HubConfig::default()
    };
    let (app, url) = serve(config).await;

    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    wait_for_subscribers(&app, 1).await;

    let readings = [16541.0, 16600.0, 9000.0, 25000.0, 16541.0];
    for z in readings {
        app.state.ingestor.submit(sample(z)).await.unwrap();
    }

    let frame = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("no batch within 5s")
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected a text frame, got {:?}", frame);
    };

    let batch: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    let states: Vec<&str> = batch
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record["road_state"].as_str().unwrap())
        .collect();
    assert_eq!(states, ["normal", "normal", "bump", "pothole", "normal"]);
    assert_eq!(batch[3]["agent_data"]["accelerometer"]["z"], 25000.0);

    // persisted as well as broadcast
    let stored = app.state.store.list_records().await.unwrap();
    assert_eq!(stored.len(), 5);
}

#[tokio::test]
async fn test_disconnect_unregisters_subscriber() {
    let config = HubConfig {
        batch_size: 1,
        flush_interval_ms: 0,
        ..HubConfig::default()
    };
    let (app, url) = serve(config).await;

    let (mut first, _) = connect_async(url.as_str()).await.unwrap();
    let (second, _) = connect_async(url.as_str()).await.unwrap();
    wait_for_subscribers(&app, 2).await;

    drop(second);
    wait_for_subscribers(&app, 1).await;

    app.state.ingestor.submit(sample(16541.0)).await.unwrap();
    let frame = timeout(Duration::from_secs(5), first.next())
        .await
        .expect("no batch within 5s")
        .unwrap()
        .unwrap();
    assert!(frame.is_text());
}
