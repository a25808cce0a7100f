use crate::model::{RemoteFile, RepoRef, VulnerabilityRecord};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ListingError {
    #[error("Failed to list repository files: {0}")]
    Transport(String),
    #[error("Failed to list repository files, status code: {0}")]
    Status(u16),
    #[error("Unexpected listing payload: {0}")]
    InvalidBody(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Unexpected status: {0}")]
    Status(u16),
    #[error("Fetch cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Store task failed: {0}")]
    Task(String),
}

/// Enumerates the entries at the root of a repository.
#[async_trait]
pub trait DirectoryLister: Send + Sync {
    async fn list(&self, repo: &RepoRef) -> Result<Vec<RemoteFile>, ListingError>;
}

/// Retrieves the raw bytes of one file.
///
/// Implementations return `Ok` only for a fully read body answered with 200 OK;
/// any other status maps to [`FetchError::Status`].
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, repo: &RepoRef, file: &str) -> Result<Bytes, FetchError>;
}

/// Columns the read path may filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryField {
    Severity,
    Status,
    PackageName,
    ScanId,
    ResourceType,
    ResourceName,
    SourceFile,
}

impl QueryField {
    pub fn column(self) -> &'static str {
        match self {
            QueryField::Severity => "severity",
            QueryField::Status => "status",
            QueryField::PackageName => "package_name",
            QueryField::ScanId => "scan_id",
            QueryField::ResourceType => "resource_type",
            QueryField::ResourceName => "resource_name",
            QueryField::SourceFile => "source_file",
        }
    }

    /// Reads the matching field from a record.
    pub fn value_of(self, record: &VulnerabilityRecord) -> &str {
        match self {
            QueryField::Severity => &record.severity,
            QueryField::Status => &record.status,
            QueryField::PackageName => &record.package_name,
            QueryField::ScanId => &record.scan_id,
            QueryField::ResourceType => &record.resource_type,
            QueryField::ResourceName => &record.resource_name,
            QueryField::SourceFile => &record.source_file,
        }
    }
}

impl std::str::FromStr for QueryField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "severity" => Ok(QueryField::Severity),
            "status" => Ok(QueryField::Status),
            "package_name" => Ok(QueryField::PackageName),
            "scan_id" => Ok(QueryField::ScanId),
            "resource_type" => Ok(QueryField::ResourceType),
            "resource_name" => Ok(QueryField::ResourceName),
            "source_file" => Ok(QueryField::SourceFile),
            other => Err(format!("Unknown query field: {}", other)),
        }
    }
}

impl fmt::Display for QueryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Shared persistence handle. Implementations must tolerate concurrent use.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts `record` unless a row with the same id exists.
    ///
    /// Returns `Ok(())` in both cases; an existing row is never overwritten.
    async fn upsert_if_absent(&self, record: &VulnerabilityRecord) -> Result<(), PersistenceError>;

    /// Returns all records whose `field` equals `value`, ordered by id.
    async fn query_by_field(
        &self,
        field: QueryField,
        value: &str,
    ) -> Result<Vec<VulnerabilityRecord>, PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_field_parsing() {
        assert_eq!("severity".parse::<QueryField>(), Ok(QueryField::Severity));
        assert_eq!(
            "PACKAGE_NAME".parse::<QueryField>(),
            Ok(QueryField::PackageName)
        );
        assert!("id; DROP TABLE".parse::<QueryField>().is_err());
    }

    #[test]
    fn test_query_field_value_of() {
        let record = VulnerabilityRecord {
            severity: "HIGH".to_string(),
            source_file: "a.json".to_string(),
            ..Default::default()
        };
        assert_eq!(QueryField::Severity.value_of(&record), "HIGH");
        assert_eq!(QueryField::SourceFile.value_of(&record), "a.json");
        assert_eq!(QueryField::Status.value_of(&record), "");
    }
}
