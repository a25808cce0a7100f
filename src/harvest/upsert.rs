use std::sync::Arc;

use tracing::{debug, warn};

use crate::model::{ScanMetadata, VulnerabilityRecord};
use crate::traits::RecordStore;

/// Outcome of persisting one file's records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PersistTally {
    /// Records whose upsert returned success (new or already present).
    pub persisted: usize,

    /// Records the store rejected.
    pub failed: usize,
}

/// Writes normalized records to the shared store, one call per record.
#[derive(Clone)]
pub struct RecordUpserter {
    store: Arc<dyn RecordStore>,
}

impl RecordUpserter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Persists one record. Store failures are logged and reported as `false`.
    pub async fn persist_one(&self, record: &VulnerabilityRecord) -> bool {
        match self.store.upsert_if_absent(record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    id = %record.id,
                    file = %record.source_file,
                    error = %e,
                    "Failed to persist record"
                );
                false
            }
        }
    }

    /// Persists every record; a failed write never stops the ones after it.
    pub async fn persist<I>(&self, records: I) -> PersistTally
    where
        I: IntoIterator<Item = (ScanMetadata, VulnerabilityRecord)>,
    {
        let mut tally = PersistTally::default();
        for (_, record) in records {
            if self.persist_one(&record).await {
                tally.persisted += 1;
            } else {
                tally.failed += 1;
            }
        }
        debug!(
            persisted = tally.persisted,
            failed = tally.failed,
            "Persisted records"
        );
        tally
    }
}
