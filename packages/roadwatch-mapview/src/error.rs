/// Result type for map view operations
pub type MapviewResult<T> = Result<T, MapviewError>;

/// Errors that can occur while following the hub stream
#[derive(Debug, thiserror::Error)]
pub enum MapviewError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Failed to decode batch: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
