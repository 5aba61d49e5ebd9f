use async_trait::async_trait;
use crate::types::{ClassifiedRecord, RecordId, StoredRecord, ValidationError};

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the hub
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Invalid sample: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Subscriber limit reached ({0})")]
    AtCapacity(usize),

    #[error("Pipeline channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors reported by a record store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Storage collaborator for classified records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist an ordered batch, returning the assigned ids in the same order
    async fn persist(&self, records: &[ClassifiedRecord]) -> StoreResult<Vec<RecordId>>;

    /// Fetch one record by id
    async fn get_record(&self, id: RecordId) -> StoreResult<StoredRecord>;

    /// List all stored records, oldest first
    async fn list_records(&self) -> StoreResult<Vec<StoredRecord>>;

    /// Replace the contents of an existing record
    async fn update_record(
        &self,
        id: RecordId,
        record: &ClassifiedRecord,
    ) -> StoreResult<StoredRecord>;

    /// Delete a record
    async fn delete_record(&self, id: RecordId) -> StoreResult<()>;
}
