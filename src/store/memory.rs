use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::VulnerabilityRecord;
use crate::traits::{PersistenceError, QueryField, RecordStore};

/// In-memory store keyed by record id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, VulnerabilityRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<VulnerabilityRecord> {
        self.records.lock().ok()?.get(id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_if_absent(&self, record: &VulnerabilityRecord) -> Result<(), PersistenceError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| PersistenceError::Unavailable(format!("lock poisoned: {}", e)))?;
        records
            .entry(record.id.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn query_by_field(
        &self,
        field: QueryField,
        value: &str,
    ) -> Result<Vec<VulnerabilityRecord>, PersistenceError> {
        let records = self
            .records
            .lock()
            .map_err(|e| PersistenceError::Unavailable(format!("lock poisoned: {}", e)))?;
        Ok(records
            .values()
            .filter(|r| field.value_of(r) == value)
            .cloned()
            .collect())
    }
}
