use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::HarvesterConfig;
use crate::harvest::listing::FileLister;
use crate::harvest::pipeline::{FileOutcome, FilePipeline, FileReport};
use crate::harvest::retry::FetchRetrier;
use crate::harvest::upsert::RecordUpserter;
use crate::model::RepoRef;
use crate::traits::{ContentFetcher, DirectoryLister, ListingError, RecordStore};

/// Aggregate result of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    /// Records whose persist call succeeded, summed over all files.
    pub total_persisted: usize,
    pub files_listed: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub files_cancelled: usize,
    /// Batches that yielded nothing because their schema did not match.
    pub batches_skipped: usize,
    pub records_failed: usize,
    pub reports: Vec<FileReport>,
}

impl IngestSummary {
    fn record(&mut self, report: FileReport) {
        match report.outcome {
            FileOutcome::Done {
                failed,
                skipped_batches,
                ..
            } => {
                self.files_succeeded += 1;
                self.batches_skipped += skipped_batches;
                self.records_failed += failed;
            }
            FileOutcome::FetchFailed | FileOutcome::ParseFailed => self.files_failed += 1,
            FileOutcome::Cancelled => self.files_cancelled += 1,
        }
        self.reports.push(report);
    }
}

/// Lists a repository and ingests every candidate file concurrently.
///
/// At most `concurrency` files are fetched at once. Each worker holds a
/// semaphore permit for its whole file and drops it on every exit path.
pub struct IngestionScheduler {
    lister: FileLister,
    pipeline: FilePipeline,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl IngestionScheduler {
    pub fn new(
        config: &HarvesterConfig,
        lister: Arc<dyn DirectoryLister>,
        fetcher: Arc<dyn ContentFetcher>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let pipeline = FilePipeline::new(
            fetcher,
            FetchRetrier::new(config.retry_policy()),
            RecordUpserter::new(store),
        );

        Self {
            lister: FileLister::new(lister, config.file_suffix.clone()),
            pipeline,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `cancel` to stop the run early: pending files are not fetched and
    /// in-flight retry waits end immediately.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ingests `repo` and returns the total number of persisted records.
    pub async fn ingest_total(&self, repo: &RepoRef) -> Result<usize, ListingError> {
        Ok(self.ingest(repo).await?.total_persisted)
    }

    /// Ingests `repo`.
    ///
    /// # Errors
    ///
    /// Only a listing failure is returned. Per-file failures are recorded in
    /// the summary and contribute nothing to the total.
    #[instrument(skip(self, repo), fields(repo = %repo))]
    pub async fn ingest(&self, repo: &RepoRef) -> Result<IngestSummary, ListingError> {
        let files = self.lister.candidates(repo).await?;
        let total = Arc::new(AtomicUsize::new(0));
        let mut summary = IngestSummary {
            files_listed: files.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for file in files {
            let semaphore = self.semaphore.clone();
            let pipeline = self.pipeline.clone();
            let cancel = self.cancel.clone();
            let total = total.clone();
            let repo = repo.clone();

            tasks.spawn(async move {
                debug!(file = %file, stage = "pending", "Waiting for fetch slot");
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return FileReport {
                        file,
                        outcome: FileOutcome::Cancelled,
                        stats: Default::default(),
                    };
                };

                let report = pipeline.execute(&repo, &file, &cancel).await;
                total.fetch_add(report.outcome.persisted(), Ordering::SeqCst);
                report
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => summary.record(report),
                Err(e) => {
                    error!(error = %e, "Ingestion task failed");
                    summary.files_failed += 1;
                }
            }
        }

        summary.total_persisted = total.load(Ordering::SeqCst);
        info!(
            total = summary.total_persisted,
            files = summary.files_listed,
            succeeded = summary.files_succeeded,
            failed = summary.files_failed,
            batches_skipped = summary.batches_skipped,
            "Ingestion finished"
        );
        Ok(summary)
    }
}
