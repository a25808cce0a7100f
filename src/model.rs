use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Repository coordinates (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid repo format '{0}', expected 'owner/repository'")]
pub struct InvalidRepo(pub String);

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl FromStr for RepoRef {
    type Err = InvalidRepo;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(owner, name))
            }
            _ => Err(InvalidRepo(s.to_string())),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Kind of a directory listing entry, as reported by the provider's `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Submodule,
    #[serde(untagged)]
    Other(String),
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

impl RemoteFile {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    /// True for plain files whose name carries `suffix` after a non-empty stem.
    pub fn is_candidate(&self, suffix: &str) -> bool {
        self.kind == EntryKind::File
            && self.name.len() > suffix.len()
            && self.name.ends_with(suffix)
    }
}

/// Per-batch scan context attached to every record produced from the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMetadata {
    pub scan_id: String,
    pub resource_type: String,
    pub resource_name: String,
    pub timestamp: String,
}

/// Canonical, persisted vulnerability entry. `id` is the dedup key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    pub id: String,
    pub severity: String,
    #[serde(rename = "cvss")]
    pub cvss_score: Option<f64>,
    pub status: String,
    pub package_name: String,
    pub current_version: String,
    pub fixed_version: String,
    pub description: String,
    pub published_date: String,
    pub link: String,
    pub risk_factors: Vec<String>,
    pub source_file: String,
    pub scan_time: String,
    pub scan_id: String,
    pub resource_type: String,
    pub resource_name: String,
}

/// Encodes risk factors for storage as a JSON array of strings.
pub fn encode_risk_factors(factors: &[String]) -> String {
    serde_json::to_string(factors).unwrap_or_else(|_| "[]".to_string())
}

/// Decodes stored risk factors.
///
/// A value that is not a JSON array of strings decodes to a single-element
/// list holding the raw stored text; a missing value decodes to an empty list.
pub fn decode_risk_factors(raw: Option<&str>) -> Vec<String> {
    match raw {
        None => Vec::new(),
        Some(text) => {
            serde_json::from_str::<Vec<String>>(text).unwrap_or_else(|_| vec![text.to_string()])
        }
    }
}
