use crate::distributor::DistributionResult;
use crate::traits::StoreError;
use crate::types::{Batch, ClassifiedRecord, RawSample, RecordId, StoredRecord};
use crate::websocket::{handle_websocket, HubState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(_) => api_error(StatusCode::NOT_FOUND, e, "NOT_FOUND"),
        other => {
            error!("Store error: {}", other);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other, "STORE_ERROR")
        }
    }
}

/// One rejected sample in an ingest request
#[derive(Debug, Serialize)]
pub struct RejectedSample {
    pub index: usize,
    pub error: String,
}

/// Ingest response
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: Vec<RejectedSample>,
}

/// Build the HTTP surface of the hub
pub fn build_router(state: HubState) -> Router {
    Router::new()
        .route("/ws", get(handle_websocket))
        .route("/health", get(health_check))
        .route("/agent_data", post(ingest_samples))
        .route(
            "/processed_agent_data",
            get(list_records).post(distribute_records),
        )
        .route(
            "/processed_agent_data/{id}",
            get(get_record).put(update_record).delete(delete_record),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Accept one sample or an array of samples from an agent.
///
/// Every element is validated on its own; valid samples are queued even when
/// others in the same request are rejected.
pub async fn ingest_samples(
    State(state): State<HubState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let items = match payload {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };

    let mut response = IngestResponse {
        accepted: 0,
        rejected: Vec::new(),
    };

    for (index, item) in items.into_iter().enumerate() {
        let sample: RawSample = match serde_json::from_value(item) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Rejected sample {}: {}", index, e);
                response.rejected.push(RejectedSample {
                    index,
                    error: e.to_string(),
                });
                continue;
            }
        };

        state.ingestor.submit(sample).await.map_err(|e| {
            api_error(StatusCode::SERVICE_UNAVAILABLE, e, "PIPELINE_CLOSED")
        })?;
        response.accepted += 1;
    }

    let status = if response.rejected.is_empty() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(response)))
}

/// Distribute an already classified batch as-is
pub async fn distribute_records(
    State(state): State<HubState>,
    Json(records): Json<Vec<ClassifiedRecord>>,
) -> (StatusCode, Json<DistributionResult>) {
    let result = state.distributor.distribute(Batch::new(records)).await;
    let status = if result.persisted {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(result))
}

pub async fn list_records(
    State(state): State<HubState>,
) -> Result<Json<Vec<StoredRecord>>, ApiError> {
    state.store.list_records().await.map(Json).map_err(store_error)
}

pub async fn get_record(
    State(state): State<HubState>,
    Path(id): Path<RecordId>,
) -> Result<Json<StoredRecord>, ApiError> {
    state.store.get_record(id).await.map(Json).map_err(store_error)
}

pub async fn update_record(
    State(state): State<HubState>,
    Path(id): Path<RecordId>,
    Json(record): Json<ClassifiedRecord>,
) -> Result<Json<StoredRecord>, ApiError> {
    state
        .store
        .update_record(id, &record)
        .await
        .map(Json)
        .map_err(store_error)
}

pub async fn delete_record(
    State(state): State<HubState>,
    Path(id): Path<RecordId>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .delete_record(id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(store_error)
}
