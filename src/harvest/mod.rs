//! Harvest module - the per-file ingestion stages.
//!
//! - **Listing**: candidate discovery via [`FileLister`]
//! - **Retry**: bounded fetching via [`FetchRetrier`] and [`RetryPolicy`]
//! - **Schema / Normalizer**: tolerant parsing into canonical records
//! - **Upsert**: idempotent persistence via [`RecordUpserter`]
//! - **Pipeline**: the fetch → normalize → persist driver, [`FilePipeline`]

pub mod listing;
pub mod normalizer;
pub mod pipeline;
pub mod retry;
pub mod schema;
pub mod upsert;

// Re-export commonly used types
pub use listing::FileLister;
pub use normalizer::{normalize, Records};
pub use pipeline::{FileOutcome, FilePipeline, FileReport, FileStats};
pub use retry::{Backoff, FetchRetrier, RetryPolicy};
pub use schema::{ParseError, SchemaMismatch};
pub use upsert::{PersistTally, RecordUpserter};
