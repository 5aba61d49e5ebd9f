use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use roadwatch_hub::{HubApp, HubConfig, MemoryRecordStore};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_app() -> HubApp {
    let config = HubConfig {
        batch_size: 2,
        ..HubConfig::default()
    };
    HubApp::start(&config, Arc::new(MemoryRecordStore::new()))
}

async fn send_request(app: &HubApp, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app
        .router()
        .oneshot(request)
        .await
        .expect("Failed to send request");

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(json!({}));

    (status, json)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn agent_sample(z: f64, timestamp: &str) -> serde_json::Value {
    json!({
        "accelerometer": {"x": 1.0, "y": 2.0, "z": z},
        "gps": {"latitude": 50.45, "longitude": 30.52},
        "timestamp": timestamp,
    })
}

#[tokio::test]
async fn test_health() {
    let app = create_test_app();
    let response = app.router().oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn test_ingest_accepts_single_and_array() {
    let app = create_test_app();

    let (status, json) = send_request(
        &app,
        json_request(
            "POST",
            "/agent_data",
            agent_sample(16541.0, "2024-02-28T12:30:00Z"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["accepted"], 1);

    let (status, json) = send_request(
        &app,
        json_request(
            "POST",
            "/agent_data",
            json!([
                agent_sample(16541.0, "2024-02-28T12:30:01Z"),
                agent_sample(9000.0, "2024-02-28T12:30:02Z"),
            ]),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["accepted"], 2);
    assert_eq!(json["rejected"], json!([]));
}

#[tokio::test]
async fn test_ingest_rejects_bad_timestamp() {
    let app = create_test_app();

    let (status, json) = send_request(
        &app,
        json_request(
            "POST",
            "/agent_data",
            json!([
                agent_sample(16541.0, "2024-02-28T12:30:00Z"),
                agent_sample(16541.0, "yesterday"),
            ]),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["accepted"], 1);
    assert_eq!(json["rejected"][0]["index"], 1);
    assert!(json["rejected"][0]["error"]
        .as_str()
        .unwrap()
        .contains("yesterday"));
}

#[tokio::test]
async fn test_unknown_record_is_not_found() {
    let app = create_test_app();

    let (status, json) = send_request(&app, get("/processed_agent_data/42")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");

    let request = Request::builder()
        .method("DELETE")
        .uri("/processed_agent_data/42")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send_request(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_distribute_then_crud() {
    let app = create_test_app();

    let records = json!([
        {"road_state": "normal", "agent_data": agent_sample(16541.0, "2024-02-28T12:30:00Z")},
        {"road_state": "pothole", "agent_data": agent_sample(25000.0, "2024-02-28T12:30:01Z")},
    ]);
    let (status, json) =
        send_request(&app, json_request("POST", "/processed_agent_data", records)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["persisted"], true);
    assert_eq!(json["delivered"], 0);

    let (status, json) = send_request(&app, get("/processed_agent_data")).await;
    assert_eq!(status, StatusCode::OK);
    let listed = json.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[1]["road_state"], "pothole");
    let id = listed[1]["id"].as_i64().unwrap();

    let update = json!({
        "road_state": "bump",
        "agent_data": agent_sample(8000.0, "2024-02-28T12:30:01Z"),
    });
    let (status, json) = send_request(
        &app,
        json_request("PUT", &format!("/processed_agent_data/{}", id), update),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["road_state"], "bump");
    assert_eq!(json["z"], 8000.0);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/processed_agent_data/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send_request(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, json) = send_request(&app, get("/processed_agent_data")).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}
