//! Per-file harvest pipeline.
//!
//! [`FilePipeline`] drives one scan file through its stages:
//! 1. **Fetch**: download the raw bytes with bounded retry
//! 2. **Normalize**: parse the batches into canonical records
//! 3. **Persist**: upsert every record into the shared store
//!
//! Every failure is contained here and reported as a [`FileOutcome`]; nothing
//! a single file does can fail its siblings.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::harvest::normalizer::normalize;
use crate::harvest::retry::FetchRetrier;
use crate::harvest::upsert::RecordUpserter;
use crate::model::RepoRef;
use crate::traits::{ContentFetcher, FetchError};

// ============================================================================
// Pipeline Types
// ============================================================================

/// Terminal state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Every batch was visited; `persisted` records count toward the total.
    Done {
        persisted: usize,
        failed: usize,
        skipped_batches: usize,
        skipped_elements: usize,
    },

    /// Retry budget exhausted.
    FetchFailed,

    /// Content was not an array of batches.
    ParseFailed,

    /// The run was cancelled before the file finished fetching.
    Cancelled,
}

impl FileOutcome {
    /// Contribution of this file to the run total.
    pub fn persisted(&self) -> usize {
        match self {
            FileOutcome::Done { persisted, .. } => *persisted,
            _ => 0,
        }
    }
}

/// Result of one file, with timing.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file: String,
    pub outcome: FileOutcome,
    pub stats: FileStats,
}

/// Timing of one file's stages (milliseconds).
#[derive(Debug, Default, Clone, Serialize)]
pub struct FileStats {
    pub fetch_duration_ms: u64,
    pub persist_duration_ms: u64,
    pub total_duration_ms: u64,
    pub bytes: usize,
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Fetch → normalize → persist for a single file.
///
/// Cheap to clone; the scheduler hands one clone to each worker task.
#[derive(Clone)]
pub struct FilePipeline {
    fetcher: Arc<dyn ContentFetcher>,
    retrier: FetchRetrier,
    upserter: RecordUpserter,
}

impl FilePipeline {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        retrier: FetchRetrier,
        upserter: RecordUpserter,
    ) -> Self {
        Self {
            fetcher,
            retrier,
            upserter,
        }
    }

    /// Runs every stage for `file`. Never fails; see [`FileOutcome`].
    pub async fn execute(
        &self,
        repo: &RepoRef,
        file: &str,
        cancel: &CancellationToken,
    ) -> FileReport {
        let start = Instant::now();
        let mut stats = FileStats::default();

        // ====================================================================
        // Stage 1: Fetch
        // ====================================================================

        let body = match self
            .retrier
            .fetch(self.fetcher.as_ref(), repo, file, cancel)
            .await
        {
            Ok(body) => body,
            Err(e) => {
                let outcome = if e == FetchError::Cancelled {
                    FileOutcome::Cancelled
                } else {
                    FileOutcome::FetchFailed
                };
                stats.total_duration_ms = start.elapsed().as_millis() as u64;
                return FileReport {
                    file: file.to_string(),
                    outcome,
                    stats,
                };
            }
        };
        stats.fetch_duration_ms = start.elapsed().as_millis() as u64;
        stats.bytes = body.len();

        // ====================================================================
        // Stage 2: Normalize
        // ====================================================================

        debug!(file, stage = "normalizing", "Normalizing file");
        let mut records = match normalize(&body, file, Utc::now()) {
            Ok(records) => records,
            Err(e) => {
                warn!(file, error = %e, stage = "parse_failed", "Skipping unparseable file");
                stats.total_duration_ms = start.elapsed().as_millis() as u64;
                return FileReport {
                    file: file.to_string(),
                    outcome: FileOutcome::ParseFailed,
                    stats,
                };
            }
        };

        // ====================================================================
        // Stage 3: Persist
        // ====================================================================
        //
        // Records are pulled lazily, so normalization of later batches
        // interleaves with persistence of earlier ones.

        debug!(file, stage = "persisting", "Persisting records");
        let persist_start = Instant::now();
        let tally = self.upserter.persist(records.by_ref()).await;
        stats.persist_duration_ms = persist_start.elapsed().as_millis() as u64;
        stats.total_duration_ms = start.elapsed().as_millis() as u64;

        let outcome = FileOutcome::Done {
            persisted: tally.persisted,
            failed: tally.failed,
            skipped_batches: records.skipped_batches(),
            skipped_elements: records.skipped_elements(),
        };

        info!(
            file,
            persisted = tally.persisted,
            failed = tally.failed,
            skipped_batches = records.skipped_batches(),
            duration_ms = stats.total_duration_ms,
            stage = "done",
            "File harvested"
        );

        FileReport {
            file: file.to_string(),
            outcome,
            stats,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
