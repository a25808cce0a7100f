//! Typed intermediate representation of scan files.
//!
//! Scan files are produced by several scanners and only loosely agree on
//! their shape. Every field here is resolved once, at deserialization time,
//! into an explicit `Option`: a missing key and a key holding the wrong type
//! both end up as `None`. The `deserialize_with` helpers below never fail, so
//! deserializing any JSON object into these types always succeeds.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::model::{ScanMetadata, VulnerabilityRecord};

// ============================================================================
// Errors
// ============================================================================

/// Fatal for a single file: the top level is not an array of batches.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to parse JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Expected a top-level array, found {0}")]
    NotAnArray(&'static str),
}

/// Non-fatal schema deviations. The offending batch or element is skipped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMismatch {
    #[error("batch has no usable 'scanResults' object")]
    MissingResults,

    #[error("result object has neither a 'vulnerabilities' nor a 'findings' array")]
    MissingRecordList,

    #[error("record list element is not an object")]
    ElementNotObject,

    #[error("record has no string or numeric 'id'")]
    MissingId,
}

// ============================================================================
// Raw structures
// ============================================================================

/// Keys probed for the record list, highest priority first.
pub const RECORD_LIST_KEYS: [RecordListKey; 2] =
    [RecordListKey::Vulnerabilities, RecordListKey::Findings];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordListKey {
    Vulnerabilities,
    Findings,
}

impl RecordListKey {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordListKey::Vulnerabilities => "vulnerabilities",
            RecordListKey::Findings => "findings",
        }
    }
}

/// One element of the top-level array.
#[derive(Debug, Default, Deserialize)]
pub struct RawScanBatch {
    #[serde(rename = "scanResults", default, deserialize_with = "lenient_object")]
    pub scan_results: Option<RawScanResults>,
}

/// The nested result object of a batch.
#[derive(Debug, Default, Deserialize)]
pub struct RawScanResults {
    #[serde(default, deserialize_with = "lenient")]
    pub scan_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub resource_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub resource_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub vulnerabilities: Option<Value>,
    #[serde(default)]
    pub findings: Option<Value>,
}

impl RawScanResults {
    pub fn metadata(&self) -> ScanMetadata {
        ScanMetadata {
            scan_id: self.scan_id.clone().unwrap_or_default(),
            resource_type: self.resource_type.clone().unwrap_or_default(),
            resource_name: self.resource_name.clone().unwrap_or_default(),
            timestamp: self.timestamp.clone().unwrap_or_default(),
        }
    }

    /// Splits off the batch metadata and the first record list, in
    /// [`RECORD_LIST_KEYS`] order, that is present and an array.
    pub fn into_parts(self) -> (ScanMetadata, Option<(RecordListKey, Vec<Value>)>) {
        let metadata = self.metadata();
        let mut slots = [self.vulnerabilities, self.findings];
        let list = RECORD_LIST_KEYS
            .iter()
            .zip(slots.iter_mut())
            .find_map(|(key, slot)| match slot.take() {
                Some(Value::Array(items)) => Some((*key, items)),
                _ => None,
            });
        (metadata, list)
    }
}

/// One vulnerability entry before normalization.
#[derive(Debug, Default, Deserialize)]
pub struct RawVulnerability {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub severity: Option<String>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub cvss: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub package_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub current_version: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub fixed_version: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub published_date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub link: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub risk_factors: Option<Vec<String>>,
}

impl RawVulnerability {
    /// Builds the canonical record, or reports why the element is unusable.
    pub fn into_record(
        self,
        metadata: &ScanMetadata,
        source_file: &str,
        scan_time: &str,
    ) -> Result<VulnerabilityRecord, SchemaMismatch> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(SchemaMismatch::MissingId)?;

        Ok(VulnerabilityRecord {
            id,
            severity: self.severity.unwrap_or_default(),
            cvss_score: self.cvss,
            status: self.status.unwrap_or_default(),
            package_name: self.package_name.unwrap_or_default(),
            current_version: self.current_version.unwrap_or_default(),
            fixed_version: self.fixed_version.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            published_date: self.published_date.unwrap_or_default(),
            link: self.link.unwrap_or_default(),
            risk_factors: self.risk_factors.unwrap_or_default(),
            source_file: source_file.to_string(),
            scan_time: scan_time.to_string(),
            scan_id: metadata.scan_id.clone(),
            resource_type: metadata.resource_type.clone(),
            resource_name: metadata.resource_name.clone(),
        })
    }
}

// ============================================================================
// Lenient field helpers
// ============================================================================

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Like [`lenient`], but only JSON objects qualify. Derived structs would
/// otherwise also accept arrays positionally.
fn lenient_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => Ok(serde_json::from_value(value).ok()),
        _ => Ok(None),
    }
}

/// Accepts non-blank strings and numbers, rendered as their JSON text.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts JSON numbers and numeric strings such as `"7.5"`.
fn lenient_score<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let score = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(score.filter(|s| s.is_finite()))
}

/// Keeps the string entries of an array, in order; anything else is absent.
fn lenient_strings<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    })
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
