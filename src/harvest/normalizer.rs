//! Scan file normalization.
//!
//! [`normalize`] only checks the top-level shape eagerly. Batches and their
//! elements are resolved lazily by [`Records`] as the caller pulls records,
//! and every schema deviation below the top level is contained to the batch
//! or element it occurs in.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use crate::harvest::schema::{
    json_kind, ParseError, RawScanBatch, RawVulnerability, RecordListKey, SchemaMismatch,
};
use crate::model::{ScanMetadata, VulnerabilityRecord};

/// Parses `bytes` as an array of scan batches.
///
/// # Errors
///
/// Returns [`ParseError`] if the content is not JSON or its top level is not
/// an array. Nothing from such a file is ever yielded.
pub fn normalize(
    bytes: &[u8],
    source_file: &str,
    ingested_at: DateTime<Utc>,
) -> Result<Records, ParseError> {
    let batches = match serde_json::from_slice::<Value>(bytes)? {
        Value::Array(batches) => batches,
        other => return Err(ParseError::NotAnArray(json_kind(&other))),
    };

    debug!(
        file = source_file,
        batches = batches.len(),
        "Parsed scan file"
    );

    Ok(Records {
        batch_count: batches.len(),
        batches: batches.into_iter(),
        current: None,
        source_file: source_file.to_string(),
        ingested_at: ingested_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        skipped_batches: 0,
        skipped_elements: 0,
    })
}

/// Lazy sequence of normalized records from one file.
#[derive(Debug)]
pub struct Records {
    batch_count: usize,
    batches: std::vec::IntoIter<Value>,
    current: Option<BatchCursor>,
    source_file: String,
    ingested_at: String,
    skipped_batches: usize,
    skipped_elements: usize,
}

#[derive(Debug)]
struct BatchCursor {
    metadata: ScanMetadata,
    scan_time: String,
    items: std::vec::IntoIter<Value>,
}

impl Records {
    /// Batches seen so far that yielded nothing because of a schema mismatch.
    pub fn skipped_batches(&self) -> usize {
        self.skipped_batches
    }

    /// List elements seen so far that were not usable records.
    pub fn skipped_elements(&self) -> usize {
        self.skipped_elements
    }

    fn open_batch(&mut self, index: usize, batch: Value) -> Option<BatchCursor> {
        let results = match batch {
            Value::Object(_) => serde_json::from_value::<RawScanBatch>(batch)
                .ok()
                .and_then(|b| b.scan_results),
            _ => None,
        };

        let Some(results) = results else {
            self.skip_batch(index, SchemaMismatch::MissingResults);
            return None;
        };

        let (metadata, list) = results.into_parts();
        let Some((key, items)) = list else {
            self.skip_batch(index, SchemaMismatch::MissingRecordList);
            return None;
        };

        if key != RecordListKey::Vulnerabilities {
            debug!(
                file = %self.source_file,
                batch = index,
                key = key.as_str(),
                "Using fallback record list key"
            );
        }

        let scan_time = if metadata.timestamp.is_empty() {
            self.ingested_at.clone()
        } else {
            metadata.timestamp.clone()
        };

        Some(BatchCursor {
            metadata,
            scan_time,
            items: items.into_iter(),
        })
    }

    fn skip_batch(&mut self, index: usize, reason: SchemaMismatch) {
        self.skipped_batches += 1;
        debug!(file = %self.source_file, batch = index, reason = %reason, "Skipping batch");
    }
}

impl Iterator for Records {
    type Item = (ScanMetadata, VulnerabilityRecord);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cursor) = self.current.as_mut() {
                for item in cursor.items.by_ref() {
                    let raw = match item {
                        Value::Object(_) => serde_json::from_value::<RawVulnerability>(item)
                            .map_err(|_| SchemaMismatch::ElementNotObject),
                        _ => Err(SchemaMismatch::ElementNotObject),
                    };
                    let record = raw.and_then(|raw| {
                        raw.into_record(&cursor.metadata, &self.source_file, &cursor.scan_time)
                    });

                    match record {
                        Ok(record) => return Some((cursor.metadata.clone(), record)),
                        Err(reason) => {
                            self.skipped_elements += 1;
                            debug!(file = %self.source_file, reason = %reason, "Skipping element");
                        }
                    }
                }
                self.current = None;
            }

            let index = self.batch_count - self.batches.len();
            let batch = self.batches.next()?;
            self.current = self.open_batch(index, batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ingested_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 28, 10, 0, 0).unwrap()
    }

    fn run(content: Value) -> (Vec<(ScanMetadata, VulnerabilityRecord)>, usize, usize) {
        let bytes = serde_json::to_vec(&content).unwrap();
        let mut records = normalize(&bytes, "scan.json", ingested_at()).unwrap();
        let collected: Vec<_> = records.by_ref().collect();
        (
            collected,
            records.skipped_batches(),
            records.skipped_elements(),
        )
    }

    #[test]
    fn test_well_formed_batch_yields_every_record() {
        let (records, skipped_batches, skipped_elements) = run(json!([{
            "scanResults": {
                "scan_id": "scan-1",
                "resource_type": "container",
                "resource_name": "api:1.2",
                "timestamp": "2025-01-27T08:00:00Z",
                "vulnerabilities": [
                    {"id": "CVE-1", "severity": "HIGH", "cvss": 8.1, "risk_factors": ["Remote Code Execution"]},
                    {"id": "CVE-2", "severity": "LOW"},
                    {"id": "CVE-3", "package_name": "openssl", "current_version": "1.1.1"}
                ]
            }
        }]));

        assert_eq!(records.len(), 3);
        assert_eq!(skipped_batches, 0);
        assert_eq!(skipped_elements, 0);

        let (metadata, first) = &records[0];
        assert_eq!(metadata.scan_id, "scan-1");
        assert_eq!(first.id, "CVE-1");
        assert_eq!(first.cvss_score, Some(8.1));
        assert_eq!(
            first.risk_factors,
            vec!["Remote Code Execution".to_string()]
        );
        assert_eq!(first.source_file, "scan.json");
        assert_eq!(first.scan_time, "2025-01-27T08:00:00Z");
        assert_eq!(first.resource_type, "container");
        assert_eq!(first.resource_name, "api:1.2");
        assert_eq!(records[2].1.package_name, "openssl");
    }

    #[test]
    fn test_findings_key_is_used_as_fallback() {
        let (records, skipped_batches, _) = run(json!([{
            "scanResults": {
                "scan_id": "scan-2",
                "findings": [{"id": "F-1"}, {"id": "F-2"}]
            }
        }]));

        assert_eq!(skipped_batches, 0);
        let ids: Vec<_> = records.iter().map(|(_, r)| r.id.as_str()).collect();
        assert_eq!(ids, vec!["F-1", "F-2"]);
        assert_eq!(records[0].1.scan_id, "scan-2");
    }

    #[test]
    fn test_missing_record_list_skips_batch_only() {
        let (records, skipped_batches, _) = run(json!([
            {"scanResults": {"scan_id": "empty"}},
            {"scanResults": {"vulnerabilities": {"id": "not-a-list"}}},
            {"scanResults": {"vulnerabilities": [{"id": "CVE-9"}]}}
        ]));

        assert_eq!(skipped_batches, 2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.id, "CVE-9");
    }

    #[test]
    fn test_missing_results_object_degrades_batch() {
        let (records, skipped_batches, _) = run(json!([
            {"somethingElse": true},
            "not even an object",
            {"scanResults": null},
            {"scanResults": {"vulnerabilities": [{"id": "CVE-10"}]}}
        ]));

        assert_eq!(skipped_batches, 3);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_bad_elements_are_skipped_individually() {
        let (records, _, skipped_elements) = run(json!([{
            "scanResults": {
                "vulnerabilities": [
                    "CVE-string",
                    42,
                    {"severity": "HIGH"},
                    {"id": "CVE-11", "cvss": "n/a", "severity": ["HIGH"]},
                    {"id": "CVE-12"}
                ]
            }
        }]));

        assert_eq!(skipped_elements, 3);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1.id, "CVE-11");
        assert_eq!(records[0].1.cvss_score, None);
        assert_eq!(records[0].1.severity, "");
    }

    #[test]
    fn test_numeric_id_is_kept_as_text() {
        let (records, _, skipped_elements) = run(json!([{
            "scanResults": {
                "vulnerabilities": [
                    {"id": 12345, "severity": "HIGH"},
                    {"id": "CVE-1"},
                    {"id": true}
                ]
            }
        }]));

        assert_eq!(skipped_elements, 1);
        let ids: Vec<_> = records.iter().map(|(_, r)| r.id.as_str()).collect();
        assert_eq!(ids, vec!["12345", "CVE-1"]);
        assert_eq!(records[0].1.severity, "HIGH");
    }

    #[test]
    fn test_missing_timestamp_uses_ingestion_time() {
        let (records, _, _) = run(json!([{
            "scanResults": {"vulnerabilities": [{"id": "CVE-13"}]}
        }]));
        assert_eq!(records[0].1.scan_time, "2025-01-28T10:00:00Z");
        assert_eq!(records[0].0, ScanMetadata::default());
    }

    #[test]
    fn test_top_level_must_be_array() {
        let err = normalize(br#"{"scanResults": {}}"#, "x.json", ingested_at()).unwrap_err();
        assert!(matches!(err, ParseError::NotAnArray("object")));

        let err = normalize(b"not json", "x.json", ingested_at()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));

        let err = normalize(b"", "x.json", ingested_at()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));
    }

    #[test]
    fn test_empty_array_yields_nothing() {
        let (records, skipped_batches, _) = run(json!([]));
        assert!(records.is_empty());
        assert_eq!(skipped_batches, 0);
    }
}
