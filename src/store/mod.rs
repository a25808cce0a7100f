//! [`RecordStore`](crate::traits::RecordStore) implementations.
//!
//! - [`SqliteStore`]: the production store, one SQLite file shared by all workers
//! - [`MemoryStore`]: process-local store for tests and dry runs

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
