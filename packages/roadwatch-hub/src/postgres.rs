use crate::traits::{RecordStore, StoreError, StoreResult};
use crate::types::{ClassifiedRecord, RecordId, RoadState, StoredRecord};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;

/// PostgreSQL implementation of RecordStore
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize database schema
    pub async fn initialize(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_agent_data (
                id BIGSERIAL PRIMARY KEY,
                road_state TEXT NOT NULL,
                x DOUBLE PRECISION NOT NULL,
                y DOUBLE PRECISION NOT NULL,
                z DOUBLE PRECISION NOT NULL,
                latitude DOUBLE PRECISION NOT NULL,
                longitude DOUBLE PRECISION NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_processed_agent_data_timestamp
                ON processed_agent_data(timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Cheap connectivity check
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_record(row: &PgRow) -> StoredRecord {
    let id: RecordId = row.get("id");
    let state: String = row.get("road_state");
    let road_state = state.parse().unwrap_or_else(|e| {
        warn!("Record {} has {}; reading it as normal", id, e);
        RoadState::Normal
    });

    StoredRecord {
        id,
        road_state,
        x: row.get("x"),
        y: row.get("y"),
        z: row.get("z"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        timestamp: row.get("timestamp"),
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn persist(&self, records: &[ClassifiedRecord]) -> StoreResult<Vec<RecordId>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(records.len());

        for record in records {
            let accel = record.sample.accelerometer();
            let gps = record.sample.gps();
            let row = sqlx::query(
                r#"
                INSERT INTO processed_agent_data
                    (road_state, x, y, z, latitude, longitude, timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                "#,
            )
            .bind(record.road_state.as_str())
            .bind(accel.x)
            .bind(accel.y)
            .bind(accel.z)
            .bind(gps.latitude)
            .bind(gps.longitude)
            .bind(record.sample.timestamp())
            .fetch_one(&mut *tx)
            .await?;

            ids.push(row.get("id"));
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn get_record(&self, id: RecordId) -> StoreResult<StoredRecord> {
        let row = sqlx::query(
            r#"
            SELECT id, road_state, x, y, z, latitude, longitude, timestamp
            FROM processed_agent_data
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Ok(row_to_record(&row))
    }

    async fn list_records(&self) -> StoreResult<Vec<StoredRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, road_state, x, y, z, latitude, longitude, timestamp
            FROM processed_agent_data
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn update_record(
        &self,
        id: RecordId,
        record: &ClassifiedRecord,
    ) -> StoreResult<StoredRecord> {
        let accel = record.sample.accelerometer();
        let gps = record.sample.gps();

        let row = sqlx::query(
            r#"
            UPDATE processed_agent_data
            SET road_state = $2, x = $3, y = $4, z = $5,
                latitude = $6, longitude = $7, timestamp = $8
            WHERE id = $1
            RETURNING id, road_state, x, y, z, latitude, longitude, timestamp
            "#,
        )
        .bind(id)
        .bind(record.road_state.as_str())
        .bind(accel.x)
        .bind(accel.y)
        .bind(accel.z)
        .bind(gps.latitude)
        .bind(gps.longitude)
        .bind(record.sample.timestamp())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Ok(row_to_record(&row))
    }

    async fn delete_record(&self, id: RecordId) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM processed_agent_data WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }
}
