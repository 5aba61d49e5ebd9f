use crate::traits::{RecordStore, StoreError, StoreResult};
use crate::types::{ClassifiedRecord, RecordId, StoredRecord};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
struct Table {
    rows: BTreeMap<RecordId, StoredRecord>,
    last_id: RecordId,
}

/// Process-local record store, used when no database is configured
#[derive(Default)]
pub struct MemoryRecordStore {
    table: RwLock<Table>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn persist(&self, records: &[ClassifiedRecord]) -> StoreResult<Vec<RecordId>> {
        let mut table = self.table.write();
        let mut ids = Vec::with_capacity(records.len());

        for record in records {
            table.last_id += 1;
            let id = table.last_id;
            table.rows.insert(id, StoredRecord::from_record(id, record));
            ids.push(id);
        }

        Ok(ids)
    }

    async fn get_record(&self, id: RecordId) -> StoreResult<StoredRecord> {
        self.table
            .read()
            .rows
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_records(&self) -> StoreResult<Vec<StoredRecord>> {
        Ok(self.table.read().rows.values().cloned().collect())
    }

    async fn update_record(
        &self,
        id: RecordId,
        record: &ClassifiedRecord,
    ) -> StoreResult<StoredRecord> {
        let mut table = self.table.write();
        let row = table.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        *row = StoredRecord::from_record(id, record);
        Ok(row.clone())
    }

    async fn delete_record(&self, id: RecordId) -> StoreResult<()> {
        self.table
            .write()
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}
